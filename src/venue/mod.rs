//! Simulated venues and the multi-venue execution router.

pub mod profile;
pub mod router;
pub mod selection;

pub use profile::{default_venues, VenueProfile, VenueRegistry};
pub use router::{ExecutionRouter, RouterConfig};
pub use selection::select_venue;
