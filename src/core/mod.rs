//! Domain records shared by every pipeline stage.

pub mod clearing;
pub mod execution;
pub mod ids;
pub mod order;
pub mod settlement;
