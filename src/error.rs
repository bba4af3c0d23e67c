use crate::core::ids::VenueId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the post-trade pipeline.
///
/// Every variant maps to a stable [`reason`](PipelineError::reason) string so
/// callers can branch on the failure kind without parsing messages.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("insufficient liquidity on venue {venue}")]
    InsufficientLiquidity { venue: VenueId },

    #[error("execution rejected by venue {venue}")]
    VenueRejected { venue: VenueId },

    #[error("no venue could execute order {order_id}")]
    NoVenueAvailable { order_id: Uuid },

    #[error("clearing validation failed: {0}")]
    ValidationFailed(ValidationFailure),

    #[error("referential integrity violation: execution {execution_id} references missing order {order_id}")]
    ReferentialIntegrity { execution_id: Uuid, order_id: Uuid },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("clearing {clearing_id} is {status}, settlement requires CLEARED")]
    ClearingNotCleared { clearing_id: Uuid, status: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("settlement processor did not stop within {grace_secs}s")]
    Shutdown { grace_secs: u64 },

    #[error("settlement processor task ended abnormally: {0}")]
    ProcessorTask(String),

    #[error("arithmetic overflow computing {0}")]
    Overflow(&'static str),
}

impl PipelineError {
    pub fn overflow(what: &'static str) -> Self {
        Self::Overflow(what)
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable reason for this failure.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InsufficientLiquidity { .. } => "insufficient_liquidity",
            Self::VenueRejected { .. } => "venue_rejected",
            Self::NoVenueAvailable { .. } => "no_venue_available",
            Self::ValidationFailed(_) => "validation_failed",
            Self::ReferentialIntegrity { .. } => "referential_integrity",
            Self::Persistence(_) => "persistence_failure",
            Self::InvalidOrder(_) => "invalid_order",
            Self::ClearingNotCleared { .. } => "clearing_not_cleared",
            Self::Config(_) => "invalid_config",
            Self::Shutdown { .. } => "shutdown_timeout",
            Self::ProcessorTask(_) => "processor_task_failed",
            Self::Overflow(_) => "arithmetic_overflow",
        }
    }

    /// Failures the router recovers from by moving on to the next attempt.
    pub fn is_recoverable_venue_failure(&self) -> bool {
        matches!(
            self,
            Self::InsufficientLiquidity { .. } | Self::VenueRejected { .. }
        )
    }
}

/// The clearing gate that rejected a clearing, with the values it compared.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationFailure {
    #[error("invalid settlement amount {amount}")]
    InvalidSettlementAmount { amount: Decimal },

    #[error("settlement amount {amount} exceeds position limit of {limit}")]
    PositionLimitExceeded { amount: Decimal, limit: Decimal },

    #[error("invalid margin requirement {margin}")]
    InvalidMargin { margin: Decimal },

    #[error("margin utilization {utilization} exceeds maximum allowed {max}")]
    MarginUtilizationExceeded { utilization: Decimal, max: Decimal },

    #[error("projected net position {projected} would exceed daily limit of {limit}")]
    DailyNetPositionExceeded { projected: Decimal, limit: Decimal },

    #[error("projected daily volume {projected} would exceed limit of {limit}")]
    DailyVolumeExceeded { projected: Decimal, limit: Decimal },

    #[error("{now} is outside market hours")]
    OutsideMarketHours { now: DateTime<Utc> },

    #[error("risk score {score} exceeds acceptable threshold {threshold}")]
    RiskScoreExceeded { score: Decimal, threshold: Decimal },

    #[error("invalid settlement final amount {amount}")]
    InvalidFinalAmount { amount: Decimal },
}

impl ValidationFailure {
    /// Stable code stored on FAILED records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSettlementAmount { .. } => "INVALID_SETTLEMENT_AMOUNT",
            Self::PositionLimitExceeded { .. } => "POSITION_LIMIT_EXCEEDED",
            Self::InvalidMargin { .. } => "INVALID_MARGIN",
            Self::MarginUtilizationExceeded { .. } => "MARGIN_UTILIZATION_EXCEEDED",
            Self::DailyNetPositionExceeded { .. } => "DAILY_NET_POSITION_EXCEEDED",
            Self::DailyVolumeExceeded { .. } => "DAILY_VOLUME_EXCEEDED",
            Self::OutsideMarketHours { .. } => "OUTSIDE_MARKET_HOURS",
            Self::RiskScoreExceeded { .. } => "RISK_SCORE_EXCEEDED",
            Self::InvalidFinalAmount { .. } => "INVALID_FINAL_AMOUNT",
        }
    }
}

impl From<ValidationFailure> for PipelineError {
    fn from(failure: ValidationFailure) -> Self {
        Self::ValidationFailed(failure)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
