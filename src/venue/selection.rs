use crate::venue::profile::{VenueProfile, VenueRegistry};
use log::{debug, warn};
use rand::Rng;

/// Pick a venue with probability `weight(v) / Σ weight`.
///
/// Cumulative weights are rebuilt on every call; nothing is cached between
/// calls, so concurrent routings never share selection state. If rounding
/// leaves the sampled threshold above every cumulative weight, the
/// first-registered venue is returned.
pub fn select_venue<'a, R: Rng + ?Sized>(
    registry: &'a VenueRegistry,
    rng: &mut R,
) -> &'a VenueProfile {
    let total_weight = registry.total_weight();
    let choice = rng.gen::<f64>() * total_weight;
    select_with_threshold(registry, choice, total_weight)
}

fn select_with_threshold(
    registry: &VenueRegistry,
    choice: f64,
    total_weight: f64,
) -> &VenueProfile {
    debug!(
        "selecting venue: total_weight={:.6} choice={:.6}",
        total_weight, choice
    );

    let mut cumulative = 0.0;
    for venue in registry.venues() {
        cumulative += venue.weight();
        if cumulative >= choice {
            return venue;
        }
    }

    warn!("venue selection fell through, using {}", registry.primary().id);
    registry.primary()
}
