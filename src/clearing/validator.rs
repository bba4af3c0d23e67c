use crate::core::clearing::Clearing;
use crate::core::order::{Order, OrderKind};
use crate::error::ValidationFailure;
use chrono::{DateTime, NaiveTime, Utc};
use log::{debug, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Weights of the composite risk score.
///
/// `score = min(1, position_weight * min(|net| / normalisation, 1)
///              + margin_weight * margin / normalisation
///              + volatility_weight * volatility)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskScoreModel {
    pub position_weight: Decimal,
    pub margin_weight: Decimal,
    pub volatility_weight: Decimal,
    pub base_volatility: Decimal,
    /// Applied to `base_volatility` for MARKET orders.
    pub market_order_multiplier: Decimal,
    pub normalisation: Decimal,
}

impl Default for RiskScoreModel {
    fn default() -> Self {
        Self {
            position_weight: dec!(0.4),
            margin_weight: dec!(0.3),
            volatility_weight: dec!(0.3),
            base_volatility: dec!(0.15),
            market_order_multiplier: dec!(1.2),
            normalisation: dec!(1000000),
        }
    }
}

impl RiskScoreModel {
    pub fn volatility(&self, kind: OrderKind) -> Decimal {
        match kind {
            OrderKind::Market => self.base_volatility.saturating_mul(self.market_order_multiplier),
            OrderKind::Limit => self.base_volatility,
        }
    }

    pub fn score(&self, net_positions: Decimal, margin_required: Decimal, kind: OrderKind) -> Decimal {
        // Terms saturate instead of overflowing; the score is capped at 1 anyway.
        let position = net_positions
            .abs()
            .checked_div(self.normalisation)
            .unwrap_or(Decimal::ONE)
            .min(Decimal::ONE);
        let margin = margin_required
            .checked_div(self.normalisation)
            .unwrap_or(Decimal::MAX);
        let raw = self
            .position_weight
            .saturating_mul(position)
            .saturating_add(self.margin_weight.saturating_mul(margin))
            .saturating_add(self.volatility_weight.saturating_mul(self.volatility(kind)));
        raw.min(Decimal::ONE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    pub position_limit: Decimal,
    pub available_margin: Decimal,
    pub max_margin_utilization: Decimal,
    pub max_daily_net_position: Decimal,
    pub daily_trading_limit: Decimal,
    pub risk_threshold: Decimal,
    pub risk_model: RiskScoreModel,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            position_limit: dec!(500000),
            available_margin: dec!(1000000),
            max_margin_utilization: dec!(0.80),
            max_daily_net_position: dec!(1000000),
            daily_trading_limit: dec!(5000000),
            risk_threshold: dec!(0.8),
            risk_model: RiskScoreModel::default(),
        }
    }
}

/// Trading session in UTC. Both boundaries are open for business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Default for MarketHours {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(1, 30, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(23, 0, 0).unwrap_or_default(),
        }
    }
}

impl MarketHours {
    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        let t = at.time();
        !(t < self.open || t > self.close)
    }

    pub fn check(&self, at: DateTime<Utc>) -> Result<(), ValidationFailure> {
        if self.is_open(at) {
            Ok(())
        } else {
            Err(ValidationFailure::OutsideMarketHours { now: at })
        }
    }
}

/// Everything one clearing decision reads, captured before the gates run.
#[derive(Debug, Clone)]
pub struct ClearingView<'a> {
    pub clearing: &'a Clearing,
    pub order: &'a Order,
    /// Client's signed same-day net position, from the store.
    pub daily_net_position: Decimal,
    /// Client's unsigned same-day traded notional, from the store.
    pub daily_volume: Decimal,
    pub now: DateTime<Utc>,
}

type GateResult = Result<(), ValidationFailure>;
type Gate = fn(&ClearingValidator, &ClearingView<'_>) -> GateResult;

/// Gates in evaluation order.
const GATES: [(&str, Gate); 6] = [
    ("position_limit", ClearingValidator::check_position_limit),
    ("margin", ClearingValidator::check_margin),
    ("daily_net_position", ClearingValidator::check_daily_net_position),
    ("daily_volume", ClearingValidator::check_daily_volume),
    ("market_hours", ClearingValidator::check_market_hours),
    ("risk_score", ClearingValidator::check_risk_score),
];

#[derive(Debug, Clone, Default)]
pub struct ClearingValidator {
    limits: RiskLimits,
    hours: MarketHours,
}

impl ClearingValidator {
    pub fn new(limits: RiskLimits, hours: MarketHours) -> Self {
        Self { limits, hours }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn market_hours(&self) -> &MarketHours {
        &self.hours
    }

    /// Run every gate in order; the first failure wins.
    pub fn validate(&self, view: &ClearingView<'_>) -> GateResult {
        for (name, gate) in GATES {
            if let Err(failure) = gate(self, view) {
                warn!(
                    "clearing {} rejected by {} gate: {}",
                    view.clearing.id, name, failure
                );
                return Err(failure);
            }
            debug!("clearing {} passed {} gate", view.clearing.id, name);
        }
        Ok(())
    }

    pub fn risk_score(&self, view: &ClearingView<'_>) -> Decimal {
        self.limits.risk_model.score(
            view.clearing.net_positions,
            view.clearing.margin_required,
            view.order.kind,
        )
    }

    fn check_position_limit(&self, view: &ClearingView<'_>) -> GateResult {
        let amount = view.clearing.settlement_amount;
        if amount <= Decimal::ZERO {
            return Err(ValidationFailure::InvalidSettlementAmount { amount });
        }
        if amount > self.limits.position_limit {
            return Err(ValidationFailure::PositionLimitExceeded {
                amount,
                limit: self.limits.position_limit,
            });
        }
        Ok(())
    }

    fn check_margin(&self, view: &ClearingView<'_>) -> GateResult {
        let margin = view.clearing.margin_required;
        if margin <= Decimal::ZERO {
            return Err(ValidationFailure::InvalidMargin { margin });
        }
        let utilization = margin
            .checked_div(self.limits.available_margin)
            .unwrap_or(Decimal::MAX);
        if utilization > self.limits.max_margin_utilization {
            return Err(ValidationFailure::MarginUtilizationExceeded {
                utilization,
                max: self.limits.max_margin_utilization,
            });
        }
        Ok(())
    }

    fn check_daily_net_position(&self, view: &ClearingView<'_>) -> GateResult {
        let projected = view
            .daily_net_position
            .saturating_add(view.clearing.net_positions)
            .abs();
        if projected > self.limits.max_daily_net_position {
            return Err(ValidationFailure::DailyNetPositionExceeded {
                projected,
                limit: self.limits.max_daily_net_position,
            });
        }
        Ok(())
    }

    fn check_daily_volume(&self, view: &ClearingView<'_>) -> GateResult {
        let projected = view.daily_volume.saturating_add(view.clearing.settlement_amount);
        if projected > self.limits.daily_trading_limit {
            return Err(ValidationFailure::DailyVolumeExceeded {
                projected,
                limit: self.limits.daily_trading_limit,
            });
        }
        Ok(())
    }

    fn check_market_hours(&self, view: &ClearingView<'_>) -> GateResult {
        self.hours.check(view.now)
    }

    fn check_risk_score(&self, view: &ClearingView<'_>) -> GateResult {
        let score = self.risk_score(view);
        if score > self.limits.risk_threshold {
            return Err(ValidationFailure::RiskScoreExceeded {
                score,
                threshold: self.limits.risk_threshold,
            });
        }
        Ok(())
    }
}
