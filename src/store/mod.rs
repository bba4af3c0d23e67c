//! Persistence contract consumed by the pipeline.
//!
//! The pipeline never queries beyond "by id", "by symbol since timestamp",
//! "by client same UTC day", "by status" and "by settlement date range". Implementations carry no
//! business logic; every netting, margin and limit computation re-reads
//! through this trait instead of caching.

pub mod memory;

use crate::core::clearing::{Clearing, TradeNetting};
use crate::core::execution::Execution;
use crate::core::ids::{ClientId, Symbol};
use crate::core::order::Order;
use crate::core::settlement::{Settlement, SettlementStatus};
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Order,
    Execution,
}

/// Maps an idempotency key to the resource it created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub resource_id: Uuid,
    pub resource_kind: ResourceKind,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

pub trait Store: Send + Sync {
    // --- Orders ---

    /// Insert an order and its idempotency record, both or neither.
    fn create_order_with_idempotency(&self, order: &Order, record: &IdempotencyRecord)
        -> Result<()>;
    fn get_order(&self, id: Uuid) -> Result<Option<Order>>;
    fn update_order(&self, order: &Order) -> Result<()>;
    /// Orders keyed by id; ids with no stored order are simply absent.
    fn orders_by_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Order>>;
    fn get_idempotency_record(
        &self,
        kind: ResourceKind,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>>;

    // --- Executions ---

    fn create_execution(&self, execution: &Execution) -> Result<()>;
    /// Insert an execution and its idempotency record, both or neither.
    fn create_execution_with_idempotency(
        &self,
        execution: &Execution,
        record: &IdempotencyRecord,
    ) -> Result<()>;
    fn get_execution(&self, id: Uuid) -> Result<Option<Execution>>;
    /// COMPLETED executions for `symbol` created at or after `since`.
    fn executions_for_symbol_since(
        &self,
        symbol: &Symbol,
        since: DateTime<Utc>,
    ) -> Result<Vec<Execution>>;

    // --- Client aggregates (COMPLETED executions, UTC day) ---

    /// Σ signed quantity, BUY positive and SELL negative.
    fn daily_net_position(&self, client: &ClientId, day: NaiveDate) -> Result<Decimal>;
    /// Σ quantity × average price, unsigned.
    fn daily_trading_volume(&self, client: &ClientId, day: NaiveDate) -> Result<Decimal>;

    // --- Clearing ---

    fn create_clearing(&self, clearing: &Clearing) -> Result<()>;
    fn get_clearing(&self, id: Uuid) -> Result<Option<Clearing>>;
    fn get_clearing_by_trade(&self, trade_id: Uuid) -> Result<Option<Clearing>>;
    /// Insert the netting and upsert the clearing in one transaction.
    fn save_netting_and_clearing(&self, netting: &TradeNetting, clearing: &Clearing)
        -> Result<()>;
    fn get_netting(&self, id: Uuid) -> Result<Option<TradeNetting>>;

    // --- Settlement ---

    fn create_settlement(&self, settlement: &Settlement) -> Result<()>;
    fn get_settlement(&self, id: Uuid) -> Result<Option<Settlement>>;
    fn get_settlement_by_trade(&self, trade_id: Uuid) -> Result<Option<Settlement>>;
    fn update_settlement(&self, settlement: &Settlement) -> Result<()>;
    fn update_settlement_status(
        &self,
        id: Uuid,
        status: SettlementStatus,
        now: DateTime<Utc>,
    ) -> Result<()>;
    /// Every settlement not yet SETTLED, oldest first.
    fn list_pending_settlements(&self) -> Result<Vec<Settlement>>;
    /// A client's settlements, newest first.
    fn client_settlements(&self, client: &ClientId) -> Result<Vec<Settlement>>;
    /// Settlements due within `[start, end]`, latest settlement date first.
    fn settlements_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Settlement>>;
}
