use super::{IdempotencyRecord, ResourceKind, Store};
use crate::core::clearing::{Clearing, TradeNetting};
use crate::core::execution::Execution;
use crate::core::ids::{ClientId, Symbol};
use crate::core::order::{Order, Side};
use crate::core::settlement::{Settlement, SettlementStatus};
use crate::error::{PipelineError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    idempotency: HashMap<(ResourceKind, String), IdempotencyRecord>,
    executions: HashMap<Uuid, Execution>,
    clearings: HashMap<Uuid, Clearing>,
    nettings: HashMap<Uuid, TradeNetting>,
    settlements: HashMap<Uuid, Settlement>,
}

impl Tables {
    /// Completed executions of `client` on `day`, paired with their order.
    /// Executions whose order is missing are skipped, as an inner join would.
    fn client_day_executions<'a>(
        &'a self,
        client: &'a ClientId,
        day: NaiveDate,
    ) -> impl Iterator<Item = (&'a Execution, &'a Order)> + 'a {
        self.executions
            .values()
            .filter(move |e| e.is_completed() && e.created_at.date_naive() == day)
            .filter_map(move |e| {
                self.orders
                    .get(&e.order_id)
                    .filter(|o| &o.client_id == client)
                    .map(|o| (e, o))
            })
    }
}

fn duplicate(entity: &str, id: Uuid) -> PipelineError {
    PipelineError::Persistence(format!("duplicate {} id {}", entity, id))
}

/// In-process [`Store`] backed by hash maps behind a single lock.
///
/// Multi-record writes check every precondition before touching any table,
/// so they either apply completely or not at all.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| PipelineError::Persistence("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| PipelineError::Persistence("store lock poisoned".into()))
    }

    pub fn order_count(&self) -> Result<usize> {
        Ok(self.read()?.orders.len())
    }

    pub fn execution_count(&self) -> Result<usize> {
        Ok(self.read()?.executions.len())
    }

    pub fn netting_count(&self) -> Result<usize> {
        Ok(self.read()?.nettings.len())
    }
}

impl Store for MemoryStore {
    fn create_order_with_idempotency(
        &self,
        order: &Order,
        record: &IdempotencyRecord,
    ) -> Result<()> {
        let mut t = self.write()?;
        if t.orders.contains_key(&order.id) {
            return Err(duplicate("order", order.id));
        }
        t.orders.insert(order.id, order.clone());
        t.idempotency
            .insert((record.resource_kind, record.key.clone()), record.clone());
        Ok(())
    }

    fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    fn update_order(&self, order: &Order) -> Result<()> {
        let mut t = self.write()?;
        match t.orders.get_mut(&order.id) {
            Some(existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(PipelineError::not_found("order", order.id)),
        }
    }

    fn orders_by_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Order>> {
        let t = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| t.orders.get(id).map(|o| (*id, o.clone())))
            .collect())
    }

    fn get_idempotency_record(
        &self,
        kind: ResourceKind,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        Ok(self.read()?.idempotency.get(&(kind, key.to_string())).cloned())
    }

    fn create_execution(&self, execution: &Execution) -> Result<()> {
        let mut t = self.write()?;
        if t.executions.contains_key(&execution.id) {
            return Err(duplicate("execution", execution.id));
        }
        t.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    fn create_execution_with_idempotency(
        &self,
        execution: &Execution,
        record: &IdempotencyRecord,
    ) -> Result<()> {
        let mut t = self.write()?;
        if t.executions.contains_key(&execution.id) {
            return Err(duplicate("execution", execution.id));
        }
        t.executions.insert(execution.id, execution.clone());
        t.idempotency
            .insert((record.resource_kind, record.key.clone()), record.clone());
        Ok(())
    }

    fn get_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        Ok(self.read()?.executions.get(&id).cloned())
    }

    fn executions_for_symbol_since(
        &self,
        symbol: &Symbol,
        since: DateTime<Utc>,
    ) -> Result<Vec<Execution>> {
        let t = self.read()?;
        let mut executions: Vec<Execution> = t
            .executions
            .values()
            .filter(|e| e.is_completed() && &e.symbol == symbol && e.created_at >= since)
            .cloned()
            .collect();
        executions.sort_by_key(|e| e.created_at);
        Ok(executions)
    }

    fn daily_net_position(&self, client: &ClientId, day: NaiveDate) -> Result<Decimal> {
        let t = self.read()?;
        let net = t
            .client_day_executions(client, day)
            .try_fold(Decimal::ZERO, |acc, (e, o)| match o.side {
                Side::Buy => acc.checked_add(e.total_quantity),
                Side::Sell => acc.checked_sub(e.total_quantity),
            })
            .ok_or(PipelineError::Overflow("daily net position"));
        net
    }

    fn daily_trading_volume(&self, client: &ClientId, day: NaiveDate) -> Result<Decimal> {
        let t = self.read()?;
        let mut volume = Decimal::ZERO;
        for (e, _) in t.client_day_executions(client, day) {
            volume = volume
                .checked_add(e.notional()?)
                .ok_or(PipelineError::Overflow("daily trading volume"))?;
        }
        Ok(volume)
    }

    fn create_clearing(&self, clearing: &Clearing) -> Result<()> {
        let mut t = self.write()?;
        if t.clearings.contains_key(&clearing.id) {
            return Err(duplicate("clearing", clearing.id));
        }
        t.clearings.insert(clearing.id, clearing.clone());
        Ok(())
    }

    fn get_clearing(&self, id: Uuid) -> Result<Option<Clearing>> {
        Ok(self.read()?.clearings.get(&id).cloned())
    }

    fn get_clearing_by_trade(&self, trade_id: Uuid) -> Result<Option<Clearing>> {
        let t = self.read()?;
        // Prefer the most recent attempt when a trade was cleared more than once.
        Ok(t.clearings
            .values()
            .filter(|c| c.trade_id == trade_id)
            .max_by_key(|c| c.updated_at)
            .cloned())
    }

    fn save_netting_and_clearing(
        &self,
        netting: &TradeNetting,
        clearing: &Clearing,
    ) -> Result<()> {
        let mut t = self.write()?;
        if t.nettings.contains_key(&netting.id) {
            return Err(duplicate("netting", netting.id));
        }
        t.nettings.insert(netting.id, netting.clone());
        t.clearings.insert(clearing.id, clearing.clone());
        Ok(())
    }

    fn get_netting(&self, id: Uuid) -> Result<Option<TradeNetting>> {
        Ok(self.read()?.nettings.get(&id).cloned())
    }

    fn create_settlement(&self, settlement: &Settlement) -> Result<()> {
        let mut t = self.write()?;
        if t.settlements.contains_key(&settlement.id) {
            return Err(duplicate("settlement", settlement.id));
        }
        t.settlements.insert(settlement.id, settlement.clone());
        Ok(())
    }

    fn get_settlement(&self, id: Uuid) -> Result<Option<Settlement>> {
        Ok(self.read()?.settlements.get(&id).cloned())
    }

    fn get_settlement_by_trade(&self, trade_id: Uuid) -> Result<Option<Settlement>> {
        let t = self.read()?;
        Ok(t.settlements
            .values()
            .find(|s| s.trade_id == trade_id)
            .cloned())
    }

    fn update_settlement(&self, settlement: &Settlement) -> Result<()> {
        let mut t = self.write()?;
        match t.settlements.get_mut(&settlement.id) {
            Some(existing) => {
                *existing = settlement.clone();
                Ok(())
            }
            None => Err(PipelineError::not_found("settlement", settlement.id)),
        }
    }

    fn update_settlement_status(
        &self,
        id: Uuid,
        status: SettlementStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut t = self.write()?;
        let settlement = t
            .settlements
            .get_mut(&id)
            .ok_or_else(|| PipelineError::not_found("settlement", id))?;
        settlement.status = status;
        settlement.updated_at = now;
        Ok(())
    }

    fn list_pending_settlements(&self) -> Result<Vec<Settlement>> {
        let t = self.read()?;
        let mut pending: Vec<Settlement> = t
            .settlements
            .values()
            .filter(|s| s.status != SettlementStatus::Settled)
            .cloned()
            .collect();
        pending.sort_by_key(|s| s.created_at);
        Ok(pending)
    }

    fn client_settlements(&self, client: &ClientId) -> Result<Vec<Settlement>> {
        let t = self.read()?;
        let mut settlements: Vec<Settlement> = t
            .settlements
            .values()
            .filter(|s| &s.client_id == client)
            .cloned()
            .collect();
        settlements.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(settlements)
    }

    fn settlements_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Settlement>> {
        let t = self.read()?;
        let mut settlements: Vec<Settlement> = t
            .settlements
            .values()
            .filter(|s| s.settlement_date >= start && s.settlement_date <= end)
            .cloned()
            .collect();
        settlements.sort_by(|a, b| b.settlement_date.cmp(&a.settlement_date));
        Ok(settlements)
    }
}
