use crate::core::ids::{ClientId, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NettingStatus {
    Pending,
    Completed,
    Failed,
}

/// Net same-symbol exposure over one trailing window.
///
/// References executions by identifier only; it owns none of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeNetting {
    pub id: Uuid,
    pub symbol: Symbol,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Signed: BUY adds, SELL subtracts.
    pub net_quantity: Decimal,
    /// Signed: BUY adds, SELL subtracts.
    pub net_amount: Decimal,
    /// `|net_amount|`.
    pub net_settlement: Decimal,
    pub net_margin: Decimal,
    pub status: NettingStatus,
    pub original_trades: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradeNetting {
    pub fn new(symbol: Symbol, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol,
            window_start,
            window_end,
            net_quantity: Decimal::ZERO,
            net_amount: Decimal::ZERO,
            net_settlement: Decimal::ZERO,
            net_margin: Decimal::ZERO,
            status: NettingStatus::Pending,
            original_trades: Vec::new(),
            created_at: window_end,
            updated_at: window_end,
        }
    }

    pub fn trade_count(&self) -> usize {
        self.original_trades.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClearingStatus {
    Pending,
    Cleared,
    Failed,
}

impl ClearingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ClearingStatus::Cleared | ClearingStatus::Failed)
    }
}

impl fmt::Display for ClearingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearingStatus::Pending => f.pad("PENDING"),
            ClearingStatus::Cleared => f.pad("CLEARED"),
            ClearingStatus::Failed => f.pad("FAILED"),
        }
    }
}

/// The clearing outcome for one trade (execution).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clearing {
    pub id: Uuid,
    /// The execution being cleared.
    pub trade_id: Uuid,
    pub client_id: ClientId,
    pub status: ClearingStatus,
    pub margin_required: Decimal,
    /// Signed executed quantity of the triggering execution.
    pub net_positions: Decimal,
    pub settlement_amount: Decimal,
    pub netting_id: Option<Uuid>,
    /// Stable code of the failure when the status is FAILED.
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Clearing {
    pub fn pending(trade_id: Uuid, client_id: ClientId, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trade_id,
            client_id,
            status: ClearingStatus::Pending,
            margin_required: Decimal::ZERO,
            net_positions: Decimal::ZERO,
            settlement_amount: Decimal::ZERO,
            netting_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_cleared(&mut self, now: DateTime<Utc>) {
        self.status = ClearingStatus::Cleared;
        self.failure_reason = None;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = ClearingStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = now;
    }
}
