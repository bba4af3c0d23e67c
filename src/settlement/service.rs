use crate::clearing::validator::MarketHours;
use crate::clock::Clock;
use crate::config::span;
use crate::core::clearing::ClearingStatus;
use crate::core::ids::{ClientId, CurrencyCode};
use crate::core::settlement::{Settlement, SettlementStatus};
use crate::error::{PipelineError, Result, ValidationFailure};
use crate::settlement::processor::RetryPolicy;
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Settlement date is creation time plus this many days (T+2).
    pub delay_days: i64,
    pub fee_rate: Decimal,
    pub currency: CurrencyCode,
    /// Settlement accounts are named `<prefix><client id>`.
    pub account_prefix: String,
    pub interval_secs: u64,
    pub verification_probability: f64,
    pub retry: RetryPolicy,
    pub shutdown_grace_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            delay_days: 2,
            fee_rate: dec!(0.001),
            currency: CurrencyCode::new("USD"),
            account_prefix: "ACC_".to_string(),
            interval_secs: 300,
            verification_probability: 0.95,
            retry: RetryPolicy::default(),
            shutdown_grace_secs: 10,
        }
    }
}

impl SettlementConfig {
    pub fn account_for(&self, client: &ClientId) -> String {
        format!("{}{}", self.account_prefix, client)
    }

    /// Time from creation to the settlement date.
    pub fn delay(&self) -> Result<Duration> {
        span(
            "settlement.delay_days",
            self.delay_days,
            Duration::try_days(self.delay_days),
        )
    }

    /// `interval_secs` as a clock span, for advancing manual clocks per tick.
    pub fn tick_interval(&self) -> Result<Duration> {
        span(
            "settlement.interval_secs",
            self.interval_secs,
            i64::try_from(self.interval_secs)
                .ok()
                .and_then(Duration::try_seconds),
        )
    }
}

/// Creates settlements for cleared trades and answers settlement queries.
pub struct SettlementService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: SettlementConfig,
    hours: MarketHours,
}

impl SettlementService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: SettlementConfig,
        hours: MarketHours,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            hours,
        }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Create the PENDING settlement for a CLEARED trade, or return the one
    /// that already exists. A settlement that fails validation is stored as
    /// FAILED and the failure returned.
    pub fn settle_trade(&self, trade_id: Uuid) -> Result<Settlement> {
        let execution = self
            .store
            .get_execution(trade_id)?
            .ok_or_else(|| PipelineError::not_found("execution", trade_id))?;
        let order = self
            .store
            .get_order(execution.order_id)?
            .ok_or_else(|| PipelineError::not_found("order", execution.order_id))?;
        let clearing = self
            .store
            .get_clearing_by_trade(trade_id)?
            .ok_or_else(|| PipelineError::not_found("clearing", trade_id))?;

        if clearing.status != ClearingStatus::Cleared {
            warn!(
                "trade {} cannot settle: clearing {} is {}",
                trade_id, clearing.id, clearing.status
            );
            return Err(PipelineError::ClearingNotCleared {
                clearing_id: clearing.id,
                status: clearing.status.to_string(),
            });
        }

        if let Some(existing) = self.store.get_settlement_by_trade(trade_id)? {
            info!(
                "trade {} already has settlement {} ({})",
                trade_id, existing.id, existing.status
            );
            return Ok(existing);
        }

        let now = self.clock.now();
        let settlement_date = now
            .checked_add_signed(self.config.delay()?)
            .ok_or(PipelineError::Overflow("settlement date"))?;
        let settlement_fees = execution
            .notional()?
            .checked_mul(self.config.fee_rate)
            .ok_or(PipelineError::Overflow("settlement fees"))?;
        let mut settlement = Settlement {
            id: Uuid::new_v4(),
            trade_id,
            client_id: order.client_id.clone(),
            status: SettlementStatus::Pending,
            settlement_date,
            final_amount: clearing.settlement_amount,
            currency: self.config.currency.clone(),
            settlement_account: self.config.account_for(&order.client_id),
            clearing_id: clearing.id,
            execution_id: execution.id,
            executed_price: execution.average_price,
            executed_quantity: execution.total_quantity,
            settlement_fees,
            failure_reason: None,
            verification_attempts: 0,
            last_attempt_at: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(failure) = self.validate(&settlement) {
            settlement.status = SettlementStatus::Failed;
            settlement.failure_reason = Some(failure.code().to_string());
            error!("settlement {} for trade {} FAILED: {}", settlement.id, trade_id, failure);
            self.store.create_settlement(&settlement)?;
            return Err(failure.into());
        }

        self.store.create_settlement(&settlement)?;
        info!(
            "settlement {} created for trade {}: {} {} due {}, fees {}",
            settlement.id,
            trade_id,
            settlement.final_amount,
            settlement.currency,
            settlement.settlement_date,
            settlement.settlement_fees
        );
        Ok(settlement)
    }

    fn validate(&self, settlement: &Settlement) -> std::result::Result<(), ValidationFailure> {
        if settlement.final_amount <= Decimal::ZERO {
            return Err(ValidationFailure::InvalidFinalAmount {
                amount: settlement.final_amount,
            });
        }
        self.hours.check(settlement.created_at)
    }

    pub fn get_settlement(&self, id: Uuid) -> Result<Settlement> {
        self.store
            .get_settlement(id)?
            .ok_or_else(|| PipelineError::not_found("settlement", id))
    }

    pub fn get_settlement_by_trade(&self, trade_id: Uuid) -> Result<Settlement> {
        self.store
            .get_settlement_by_trade(trade_id)?
            .ok_or_else(|| PipelineError::not_found("settlement", trade_id))
    }

    /// Newest first.
    pub fn client_settlements(&self, client: &ClientId) -> Result<Vec<Settlement>> {
        self.store.client_settlements(client)
    }

    /// Settlements due between `start` and `end` inclusive, latest first.
    pub fn settlements_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Settlement>> {
        self.store.settlements_between(start, end)
    }

    /// Operator override of a settlement's status.
    pub fn update_settlement_status(&self, id: Uuid, status: SettlementStatus) -> Result<Settlement> {
        let current = self.get_settlement(id)?;
        warn!(
            "settlement {} status overridden: {} -> {}",
            id, current.status, status
        );
        self.store
            .update_settlement_status(id, status, self.clock.now())?;
        self.get_settlement(id)
    }
}
