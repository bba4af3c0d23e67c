use crate::core::ids::VenueId;
use crate::error::{PipelineError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Static characteristics of a simulated trading venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueProfile {
    pub id: VenueId,
    pub name: String,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    /// 0–1, share of the remaining quantity the venue can absorb when thin.
    pub liquidity_factor: f64,
    /// 0–1, probability that an attempt on this venue succeeds.
    pub success_probability: f64,
    /// Fraction of notional charged per fill.
    pub fee_rate: Decimal,
}

impl VenueProfile {
    pub fn new(
        id: impl Into<VenueId>,
        name: impl Into<String>,
        latency_ms: (u64, u64),
        liquidity_factor: f64,
        success_probability: f64,
        fee_rate: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            min_latency_ms: latency_ms.0,
            max_latency_ms: latency_ms.1,
            liquidity_factor,
            success_probability,
            fee_rate,
        }
    }

    /// Selection weight: `liquidity_factor * success_probability`.
    pub fn weight(&self) -> f64 {
        self.liquidity_factor * self.success_probability
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(PipelineError::Config("venue id is required".into()));
        }
        if self.min_latency_ms > self.max_latency_ms {
            return Err(PipelineError::Config(format!(
                "venue {}: min latency {}ms exceeds max latency {}ms",
                self.id, self.min_latency_ms, self.max_latency_ms
            )));
        }
        for (name, value) in [
            ("liquidity_factor", self.liquidity_factor),
            ("success_probability", self.success_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::Config(format!(
                    "venue {}: {} must be within [0, 1], got {}",
                    self.id, name, value
                )));
            }
        }
        if self.fee_rate < Decimal::ZERO {
            return Err(PipelineError::Config(format!(
                "venue {}: fee rate must not be negative, got {}",
                self.id, self.fee_rate
            )));
        }
        Ok(())
    }
}

/// The built-in four-venue catalog.
pub fn default_venues() -> Vec<VenueProfile> {
    vec![
        VenueProfile::new("EXCH1", "Primary Exchange", (5, 30), 0.9, 0.95, dec!(0.001)),
        VenueProfile::new("EXCH2", "Secondary Exchange", (10, 50), 0.7, 0.90, dec!(0.0008)),
        VenueProfile::new("EXCH3", "Regional Exchange", (15, 70), 0.5, 0.85, dec!(0.0005)),
        VenueProfile::new("EXCH4", "Dark Pool", (20, 100), 0.3, 0.75, dec!(0.0003)),
    ]
}

/// Immutable, ordered catalog of venues.
///
/// Registration order matters: it is the order in which cumulative weights
/// are accumulated and the first venue is the selection fallback.
#[derive(Debug, Clone)]
pub struct VenueRegistry {
    venues: Vec<VenueProfile>,
}

impl VenueRegistry {
    pub fn new(venues: Vec<VenueProfile>) -> Result<Self> {
        if venues.is_empty() {
            return Err(PipelineError::Config(
                "venue registry must contain at least one venue".into(),
            ));
        }
        let mut seen = HashSet::new();
        for venue in &venues {
            venue.validate()?;
            if !seen.insert(venue.id.clone()) {
                return Err(PipelineError::Config(format!(
                    "duplicate venue id {}",
                    venue.id
                )));
            }
        }
        let registry = Self { venues };
        if registry.total_weight() <= 0.0 {
            return Err(PipelineError::Config(
                "at least one venue must have a positive selection weight".into(),
            ));
        }
        Ok(registry)
    }

    pub fn venues(&self) -> &[VenueProfile] {
        &self.venues
    }

    pub fn len(&self) -> usize {
        self.venues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }

    pub fn get(&self, id: &VenueId) -> Option<&VenueProfile> {
        self.venues.iter().find(|v| &v.id == id)
    }

    /// The first-registered venue.
    pub fn primary(&self) -> &VenueProfile {
        &self.venues[0]
    }

    pub fn total_weight(&self) -> f64 {
        self.venues.iter().map(VenueProfile::weight).sum()
    }

    /// Expected selection probability, `weight(v) / Σ weight`.
    pub fn selection_probability(&self, id: &VenueId) -> Option<f64> {
        let total = self.total_weight();
        self.get(id).map(|v| v.weight() / total)
    }
}

impl Default for VenueRegistry {
    fn default() -> Self {
        Self {
            venues: default_venues(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_catalog_is_valid() {
        let registry = VenueRegistry::new(default_venues()).unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.primary().id.as_str(), "EXCH1");
    }

    #[test]
    fn test_weights_and_probabilities() {
        let registry = VenueRegistry::default();
        // 0.855 + 0.63 + 0.425 + 0.225
        assert_relative_eq!(registry.total_weight(), 2.135, epsilon = 1e-12);
        let p = registry.selection_probability(&VenueId::new("EXCH1")).unwrap();
        assert_relative_eq!(p, 0.855 / 2.135, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_registry_rejected() {
        assert!(VenueRegistry::new(vec![]).is_err());
    }

    #[test]
    fn test_duplicate_venue_rejected() {
        let venues = vec![
            VenueProfile::new("X", "X", (1, 2), 0.5, 0.5, dec!(0.001)),
            VenueProfile::new("X", "X again", (1, 2), 0.5, 0.5, dec!(0.001)),
        ];
        let err = VenueRegistry::new(venues).unwrap_err();
        assert_eq!(err.reason(), "invalid_config");
    }

    #[test]
    fn test_invalid_profiles_rejected() {
        let inverted = VenueProfile::new("X", "X", (50, 10), 0.5, 0.5, dec!(0.001));
        assert!(inverted.validate().is_err());

        let bad_probability = VenueProfile::new("X", "X", (1, 2), 0.5, 1.5, dec!(0.001));
        assert!(bad_probability.validate().is_err());
    }

    #[test]
    fn test_zero_total_weight_rejected() {
        let venues = vec![VenueProfile::new("X", "X", (1, 2), 0.0, 0.9, dec!(0.001))];
        assert!(VenueRegistry::new(venues).is_err());
    }
}
