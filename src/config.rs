//! Pipeline configuration.
//!
//! One immutable [`PipelineConfig`] is built up front (defaults, or a JSON
//! file) and handed to every component at construction. Sections missing
//! from a file keep their defaults.

use crate::clearing::netting::NettingConfig;
use crate::clearing::validator::{MarketHours, RiskLimits};
use crate::error::{PipelineError, Result};
use crate::settlement::service::SettlementConfig;
use crate::venue::profile::{default_venues, VenueProfile, VenueRegistry};
use crate::venue::router::RouterConfig;
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;

/// Longest span any configured window, delay, TTL or interval may cover.
pub const MAX_SPAN_DAYS: i64 = 36_500;

/// Check a configured span converted to a chrono duration. `converted` is
/// `None` when the raw value does not fit a duration at all.
pub(crate) fn span(field: &str, raw: impl Display, converted: Option<Duration>) -> Result<Duration> {
    match converted {
        Some(d) if d <= Duration::days(MAX_SPAN_DAYS) => Ok(d),
        _ => Err(PipelineError::Config(format!(
            "{} = {} is out of range (at most {} days)",
            field, raw, MAX_SPAN_DAYS
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub venues: Vec<VenueProfile>,
    pub router: RouterConfig,
    pub netting: NettingConfig,
    pub limits: RiskLimits,
    pub market_hours: MarketHours,
    pub settlement: SettlementConfig,
    pub idempotency_ttl_hours: i64,
    /// Run one client's clearing validations one at a time.
    pub serialize_client_clearings: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            venues: default_venues(),
            router: RouterConfig::default(),
            netting: NettingConfig::default(),
            limits: RiskLimits::default(),
            market_hours: MarketHours::default(),
            settlement: SettlementConfig::default(),
            idempotency_ttl_hours: 24,
            serialize_client_clearings: true,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::Config(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Registry construction checks emptiness, duplicates and each profile.
        VenueRegistry::new(self.venues.clone())?;

        if self.router.max_attempts == 0 {
            return Err(PipelineError::Config("router.max_attempts must be at least 1".into()));
        }
        if self.router.price_variance < Decimal::ZERO || self.router.price_variance >= Decimal::ONE {
            return Err(PipelineError::Config(format!(
                "router.price_variance must be within [0, 1), got {}",
                self.router.price_variance
            )));
        }
        if self.netting.window_hours <= 0 {
            return Err(PipelineError::Config("netting.window_hours must be positive".into()));
        }
        self.netting.window()?;
        if self.limits.available_margin <= Decimal::ZERO {
            return Err(PipelineError::Config("limits.available_margin must be positive".into()));
        }
        if self.market_hours.open > self.market_hours.close {
            return Err(PipelineError::Config(format!(
                "market hours open {} is after close {}",
                self.market_hours.open, self.market_hours.close
            )));
        }

        let settlement = &self.settlement;
        if settlement.interval_secs == 0 {
            return Err(PipelineError::Config("settlement.interval_secs must be positive".into()));
        }
        if !(0.0..=1.0).contains(&settlement.verification_probability) {
            return Err(PipelineError::Config(format!(
                "settlement.verification_probability must be within [0, 1], got {}",
                settlement.verification_probability
            )));
        }
        if settlement.delay_days < 0 {
            return Err(PipelineError::Config("settlement.delay_days must not be negative".into()));
        }
        settlement.delay()?;
        settlement.tick_interval()?;
        settlement.retry.backoff()?;
        if settlement.fee_rate < Decimal::ZERO {
            return Err(PipelineError::Config("settlement.fee_rate must not be negative".into()));
        }
        if self.idempotency_ttl_hours <= 0 {
            return Err(PipelineError::Config("idempotency_ttl_hours must be positive".into()));
        }
        self.idempotency_ttl()?;
        Ok(())
    }

    pub fn idempotency_ttl(&self) -> Result<Duration> {
        span(
            "idempotency_ttl_hours",
            self.idempotency_ttl_hours,
            Duration::try_hours(self.idempotency_ttl_hours),
        )
    }

    pub fn venue_registry(&self) -> Result<VenueRegistry> {
        VenueRegistry::new(self.venues.clone())
    }
}
