use crate::core::ids::{Symbol, VenueId};
use crate::core::order::{Order, Side};
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One venue's contribution to an execution. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: Uuid,
    pub venue_id: VenueId,
    pub venue_name: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee_rate: Decimal,
    pub fee_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Fill {
    pub fn notional(&self) -> Result<Decimal> {
        self.price
            .checked_mul(self.quantity)
            .ok_or(PipelineError::Overflow("fill notional"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Completed,
    Failed,
}

/// The aggregate result of routing one order.
///
/// Invariants: `total_quantity == Σ fill.quantity` and
/// `average_price == Σ(fill.price * fill.quantity) / total_quantity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub order_id: Uuid,
    /// Copied from the parent order so executions can be windowed per symbol.
    pub symbol: Symbol,
    pub side: Side,
    pub total_quantity: Decimal,
    pub average_price: Decimal,
    pub status: ExecutionStatus,
    pub fills: Vec<Fill>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    /// Aggregate fills into a COMPLETED execution with a volume-weighted
    /// average price.
    ///
    /// Fails with [`PipelineError::NoVenueAvailable`] when there is nothing to
    /// aggregate, so the average price division is never taken over zero.
    pub fn from_fills(order: &Order, fills: Vec<Fill>, now: DateTime<Utc>) -> Result<Self> {
        let total_quantity = fills
            .iter()
            .try_fold(Decimal::ZERO, |acc, f| acc.checked_add(f.quantity))
            .ok_or(PipelineError::Overflow("execution quantity"))?;
        if fills.is_empty() || total_quantity <= Decimal::ZERO {
            return Err(PipelineError::NoVenueAvailable { order_id: order.id });
        }
        let mut weighted = Decimal::ZERO;
        for fill in &fills {
            weighted = weighted
                .checked_add(fill.notional()?)
                .ok_or(PipelineError::Overflow("execution notional"))?;
        }
        let average_price = weighted
            .checked_div(total_quantity)
            .ok_or(PipelineError::Overflow("average price"))?;

        Ok(Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            total_quantity,
            average_price,
            status: ExecutionStatus::Completed,
            fills,
            created_at: now,
            updated_at: now,
        })
    }

    /// Executed notional, `average_price * total_quantity`.
    pub fn notional(&self) -> Result<Decimal> {
        self.average_price
            .checked_mul(self.total_quantity)
            .ok_or(PipelineError::Overflow("execution notional"))
    }

    pub fn total_fees(&self) -> Result<Decimal> {
        self.fills
            .iter()
            .try_fold(Decimal::ZERO, |acc, f| acc.checked_add(f.fee_amount))
            .ok_or(PipelineError::Overflow("execution fees"))
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::order::{OrderKind, OrderRequest};
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::from_request(
            OrderRequest::new("C1", "AAPL", Side::Sell, OrderKind::Market, dec!(100), dec!(50)),
            Utc::now(),
        )
        .unwrap()
    }

    fn fill(price: Decimal, quantity: Decimal) -> Fill {
        Fill {
            id: Uuid::new_v4(),
            venue_id: VenueId::new("EXCH1"),
            venue_name: "Primary Exchange".into(),
            price,
            quantity,
            fee_rate: dec!(0.001),
            fee_amount: price * quantity * dec!(0.001),
            created_at: Utc::now(),
        }
    }

    fn fill_at(price: Decimal, quantity: Decimal) -> Fill {
        Fill {
            price,
            quantity,
            fee_amount: Decimal::ZERO,
            ..fill(Decimal::ONE, Decimal::ONE)
        }
    }

    #[test]
    fn test_vwap_aggregation() {
        let execution = Execution::from_fills(
            &order(),
            vec![fill(dec!(50), dec!(60)), fill(dec!(51), dec!(40))],
            Utc::now(),
        )
        .unwrap();

        assert_eq!(execution.total_quantity, dec!(100));
        // (50*60 + 51*40) / 100 = 50.4
        assert_eq!(execution.average_price, dec!(50.4));
        assert_eq!(execution.side, Side::Sell);
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.notional().unwrap(), dec!(5040));
    }

    #[test]
    fn test_total_fees() {
        let execution =
            Execution::from_fills(&order(), vec![fill(dec!(100), dec!(10))], Utc::now()).unwrap();
        assert_eq!(execution.total_fees().unwrap(), dec!(1));
    }

    #[test]
    fn test_overflowing_fills_are_an_error() {
        let huge = dec!(10000000000000000000000000);
        let err = Execution::from_fills(&order(), vec![fill_at(huge, huge)], Utc::now())
            .unwrap_err();
        assert_eq!(err.reason(), "arithmetic_overflow");

        let err = Execution::from_fills(
            &order(),
            vec![fill_at(dec!(1), huge), fill_at(dec!(1), Decimal::MAX)],
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.reason(), "arithmetic_overflow");
    }

    #[test]
    fn test_empty_fills_rejected() {
        let err = Execution::from_fills(&order(), vec![], Utc::now()).unwrap_err();
        assert_eq!(err.reason(), "no_venue_available");
    }

    #[test]
    fn test_zero_quantity_fills_rejected() {
        let err = Execution::from_fills(&order(), vec![fill(dec!(10), Decimal::ZERO)], Utc::now())
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoVenueAvailable { .. }));
    }
}
