use crate::core::ids::{ClientId, CurrencyCode};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Settlement lifecycle.
///
/// ```text
/// PENDING ──(due)──▶ SETTLING ──(verified)──▶ SETTLED
/// FAILED  (set at creation/validation time only, terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SettlementStatus {
    Pending,
    Settling,
    Settled,
    Failed,
}

impl SettlementStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SettlementStatus::Settled | SettlementStatus::Failed)
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SettlementStatus::Pending => "PENDING",
            SettlementStatus::Settling => "SETTLING",
            SettlementStatus::Settled => "SETTLED",
            SettlementStatus::Failed => "FAILED",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub trade_id: Uuid,
    pub client_id: ClientId,
    pub status: SettlementStatus,
    /// Not processed by the settlement loop before this instant.
    pub settlement_date: DateTime<Utc>,
    pub final_amount: Decimal,
    pub currency: CurrencyCode,
    pub settlement_account: String,
    pub clearing_id: Uuid,
    pub execution_id: Uuid,
    pub executed_price: Decimal,
    pub executed_quantity: Decimal,
    pub settlement_fees: Decimal,
    pub failure_reason: Option<String>,
    /// Verification checks attempted while SETTLING.
    pub verification_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Settlement {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.settlement_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn settlement(date: DateTime<Utc>) -> Settlement {
        Settlement {
            id: Uuid::new_v4(),
            trade_id: Uuid::new_v4(),
            client_id: ClientId::new("C1"),
            status: SettlementStatus::Pending,
            settlement_date: date,
            final_amount: dec!(1000),
            currency: CurrencyCode::new("USD"),
            settlement_account: "ACC_C1".into(),
            clearing_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            executed_price: dec!(100),
            executed_quantity: dec!(10),
            settlement_fees: dec!(1),
            failure_reason: None,
            verification_attempts: 0,
            last_attempt_at: None,
            created_at: date - Duration::days(2),
            updated_at: date - Duration::days(2),
        }
    }

    #[test]
    fn test_due_boundary_is_inclusive() {
        let date = Utc::now();
        let s = settlement(date);
        assert!(!s.is_due(date - Duration::seconds(1)));
        assert!(s.is_due(date));
    }

    #[test]
    fn test_terminal_states() {
        assert!(SettlementStatus::Settled.is_terminal());
        assert!(SettlementStatus::Failed.is_terminal());
        assert!(!SettlementStatus::Settling.is_terminal());
        assert_eq!(SettlementStatus::Settling.to_string(), "SETTLING");
    }
}
