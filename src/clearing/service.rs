use crate::clearing::netting::NettingEngine;
use crate::clearing::validator::{ClearingValidator, ClearingView};
use crate::clock::Clock;
use crate::core::clearing::Clearing;
use crate::core::execution::Execution;
use crate::core::ids::ClientId;
use crate::core::order::{Order, Side};
use crate::error::{PipelineError, Result};
use crate::store::Store;
use dashmap::DashMap;
use log::{debug, error, info};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Turns an executed trade into a CLEARED or FAILED clearing.
pub struct ClearingService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    netting: NettingEngine,
    validator: ClearingValidator,
    serialize_clients: bool,
    client_locks: DashMap<ClientId, Arc<Mutex<()>>>,
}

impl ClearingService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        netting: NettingEngine,
        validator: ClearingValidator,
    ) -> Self {
        Self {
            store,
            clock,
            netting,
            validator,
            serialize_clients: true,
            client_locks: DashMap::new(),
        }
    }

    /// Whether one client's clearings run one at a time. On by default.
    pub fn with_client_serialization(mut self, enabled: bool) -> Self {
        self.serialize_clients = enabled;
        self
    }

    pub fn validator(&self) -> &ClearingValidator {
        &self.validator
    }

    /// Clear the trade identified by its execution id.
    ///
    /// A netting or validation failure is persisted as a FAILED clearing
    /// carrying the failure reason, and the error is returned. Only a CLEARED
    /// clearing is written together with its netting.
    ///
    /// Callers must not clear the same trade twice; this is not re-checked.
    pub fn clear_trade(&self, trade_id: Uuid) -> Result<Clearing> {
        let execution = self
            .store
            .get_execution(trade_id)?
            .ok_or_else(|| PipelineError::not_found("execution", trade_id))?;
        let order = self.parent_order(&execution)?;

        let lock = self.client_lock(&order.client_id);
        let _guard = lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(|e| e.into_inner()));
        self.clear_locked(&execution, &order)
    }

    /// Persist a trade of `client` through `commit`, then clear it.
    ///
    /// The client's lock is held from the execution write through the
    /// clearing write, so the daily aggregates a clearing reads contain every
    /// earlier trade of that client and none that commits after it. A trade
    /// that already has a clearing gets that clearing back.
    pub fn commit_and_clear<F>(&self, client: &ClientId, commit: F) -> Result<(Execution, Clearing)>
    where
        F: FnOnce() -> Result<Execution>,
    {
        let lock = self.client_lock(client);
        let _guard = lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(|e| e.into_inner()));

        let execution = commit()?;
        if let Some(existing) = self.store.get_clearing_by_trade(execution.id)? {
            debug!(
                "trade {} already has clearing {} ({})",
                execution.id, existing.id, existing.status
            );
            return Ok((execution, existing));
        }
        let order = self.parent_order(&execution)?;
        let clearing = self.clear_locked(&execution, &order)?;
        Ok((execution, clearing))
    }

    fn parent_order(&self, execution: &Execution) -> Result<Order> {
        self.store
            .get_order(execution.order_id)?
            .ok_or_else(|| PipelineError::not_found("order", execution.order_id))
    }

    // Callers hold the client lock when serialization is on.
    fn clear_locked(&self, execution: &Execution, order: &Order) -> Result<Clearing> {
        let trade_id = execution.id;
        let now = self.clock.now();
        let mut clearing = Clearing::pending(trade_id, order.client_id.clone(), now);
        info!(
            "clearing {} started for trade {} (client {}, {} {})",
            clearing.id, trade_id, order.client_id, order.side, order.symbol
        );

        let netted = self
            .netting
            .net_and_margin(self.store.as_ref(), execution, order, now)
            .and_then(|netting| execution.notional().map(|notional| (netting, notional)));
        let (netting, notional) = match netted {
            Ok(netted) => netted,
            Err(e) => {
                clearing.mark_failed(e.reason(), now);
                return Err(self.persist_failure(&clearing, e));
            }
        };

        clearing.margin_required = netting.net_margin;
        clearing.netting_id = Some(netting.id);
        // The clearing carries the trade's own exposure; the window only
        // drives the margin.
        clearing.settlement_amount = notional;
        clearing.net_positions = match order.side {
            Side::Buy => execution.total_quantity,
            Side::Sell => -execution.total_quantity,
        };

        let day = now.date_naive();
        let view = ClearingView {
            clearing: &clearing,
            order,
            daily_net_position: self.store.daily_net_position(&order.client_id, day)?,
            daily_volume: self.store.daily_trading_volume(&order.client_id, day)?,
            now,
        };

        if let Err(failure) = self.validator.validate(&view) {
            clearing.netting_id = None;
            clearing.mark_failed(failure.code(), now);
            return Err(self.persist_failure(&clearing, failure.into()));
        }

        clearing.mark_cleared(now);
        self.store.save_netting_and_clearing(&netting, &clearing)?;
        info!(
            "clearing {} CLEARED: amount {} net {} margin {} (netting {})",
            clearing.id,
            clearing.settlement_amount,
            clearing.net_positions,
            clearing.margin_required,
            netting.id
        );
        Ok(clearing)
    }

    pub fn get_clearing_status(&self, clearing_id: Uuid) -> Result<Clearing> {
        self.store
            .get_clearing(clearing_id)?
            .ok_or_else(|| PipelineError::not_found("clearing", clearing_id))
    }

    fn client_lock(&self, client: &ClientId) -> Option<Arc<Mutex<()>>> {
        if !self.serialize_clients {
            return None;
        }
        Some(self.client_locks.entry(client.clone()).or_default().value().clone())
    }

    /// Persist a FAILED clearing and hand back the error to return. A store
    /// failure here takes precedence over the original cause.
    fn persist_failure(&self, clearing: &Clearing, cause: PipelineError) -> PipelineError {
        error!(
            "clearing {} for trade {} FAILED: {}",
            clearing.id, clearing.trade_id, cause
        );
        match self.store.create_clearing(clearing) {
            Ok(()) => cause,
            Err(e) => {
                error!("could not record failed clearing {}: {}", clearing.id, e);
                e
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clearing::validator::{MarketHours, RiskLimits};
    use crate::clock::ManualClock;
    use crate::core::clearing::ClearingStatus;
    use crate::core::execution::Fill;
    use crate::core::ids::VenueId;
    use crate::core::order::{OrderKind, OrderRequest};
    use crate::store::{IdempotencyRecord, MemoryStore, ResourceKind};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Barrier;
    use std::thread;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        service: ClearingService,
    }

    fn fixture(limits: RiskLimits) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(noon()));
        let service = ClearingService::new(
            store.clone(),
            clock.clone(),
            NettingEngine::default(),
            ClearingValidator::new(limits, MarketHours::default()),
        );
        Fixture {
            store,
            clock,
            service,
        }
    }

    /// An order stored with its execution built but not yet persisted.
    fn unbooked_trade(store: &MemoryStore, side: Side, qty: Decimal, price: Decimal) -> (Order, Execution) {
        let order = Order::from_request(
            OrderRequest::new("C1", "AAPL", side, OrderKind::Limit, qty, price),
            noon(),
        )
        .unwrap();
        let record = IdempotencyRecord {
            key: order.id.to_string(),
            resource_id: order.id,
            resource_kind: ResourceKind::Order,
            expires_at: noon() + Duration::hours(24),
        };
        store.create_order_with_idempotency(&order, &record).unwrap();

        let fill = Fill {
            id: Uuid::new_v4(),
            venue_id: VenueId::new("EXCH1"),
            venue_name: "Primary Exchange".into(),
            price,
            quantity: qty,
            fee_rate: dec!(0.001),
            fee_amount: price * qty * dec!(0.001),
            created_at: noon(),
        };
        let execution = Execution::from_fills(&order, vec![fill], noon()).unwrap();
        (order, execution)
    }

    fn trade(store: &MemoryStore, side: Side, qty: Decimal, price: Decimal) -> (Order, Execution) {
        let (order, execution) = unbooked_trade(store, side, qty, price);
        store.create_execution(&execution).unwrap();
        (order, execution)
    }

    #[test]
    fn test_clear_trade_accepts_small_buy() {
        let f = fixture(RiskLimits::default());
        let (_, execution) = trade(&f.store, Side::Buy, dec!(10), dec!(100));

        let clearing = f.service.clear_trade(execution.id).unwrap();
        assert_eq!(clearing.status, ClearingStatus::Cleared);
        assert_eq!(clearing.settlement_amount, dec!(1000));
        assert_eq!(clearing.net_positions, dec!(10));
        assert_eq!(clearing.margin_required, dec!(120));

        let netting_id = clearing.netting_id.unwrap();
        let netting = f.store.get_netting(netting_id).unwrap().unwrap();
        assert_eq!(netting.original_trades, vec![execution.id]);

        let stored = f.service.get_clearing_status(clearing.id).unwrap();
        assert_eq!(stored.status, ClearingStatus::Cleared);
    }

    #[test]
    fn test_sell_records_negative_net_position() {
        let f = fixture(RiskLimits::default());
        let (_, execution) = trade(&f.store, Side::Sell, dec!(10), dec!(100));

        let clearing = f.service.clear_trade(execution.id).unwrap();
        assert_eq!(clearing.net_positions, dec!(-10));
        assert_eq!(clearing.settlement_amount, dec!(1000));
    }

    #[test]
    fn test_validation_failure_persists_failed_clearing_only() {
        let f = fixture(RiskLimits::default());
        let (_, execution) = trade(&f.store, Side::Buy, dec!(6000), dec!(100));

        let err = f.service.clear_trade(execution.id).unwrap_err();
        assert_eq!(err.reason(), "validation_failed");

        let stored = f.store.get_clearing_by_trade(execution.id).unwrap().unwrap();
        assert_eq!(stored.status, ClearingStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("POSITION_LIMIT_EXCEEDED"));
        assert_eq!(stored.netting_id, None);
        assert_eq!(f.store.netting_count().unwrap(), 0);
    }

    #[test]
    fn test_outside_market_hours_fails() {
        let f = fixture(RiskLimits::default());
        let (_, execution) = trade(&f.store, Side::Buy, dec!(10), dec!(100));
        f.clock.set(Utc.with_ymd_and_hms(2024, 3, 4, 23, 30, 0).unwrap());

        let err = f.service.clear_trade(execution.id).unwrap_err();
        match err {
            PipelineError::ValidationFailed(failure) => {
                assert_eq!(failure.code(), "OUTSIDE_MARKET_HOURS")
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_missing_execution_persists_nothing() {
        let f = fixture(RiskLimits::default());
        let err = f.service.clear_trade(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.reason(), "not_found");
        assert_eq!(f.store.netting_count().unwrap(), 0);
    }

    #[test]
    fn test_netting_failure_is_recorded() {
        let f = fixture(RiskLimits::default());
        let (_, execution) = trade(&f.store, Side::Buy, dec!(10), dec!(100));

        // An execution in the same window whose order was never stored.
        let ghost = Order::from_request(
            OrderRequest::new("C2", "AAPL", Side::Sell, OrderKind::Limit, dec!(1), dec!(100)),
            noon(),
        )
        .unwrap();
        let fill = execution.fills[0].clone();
        let orphan = Execution::from_fills(&ghost, vec![fill], noon()).unwrap();
        f.store.create_execution(&orphan).unwrap();

        let err = f.service.clear_trade(execution.id).unwrap_err();
        assert_eq!(err.reason(), "referential_integrity");

        let stored = f.store.get_clearing_by_trade(execution.id).unwrap().unwrap();
        assert_eq!(stored.status, ClearingStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("referential_integrity"));
    }

    #[test]
    fn test_unknown_clearing_is_not_found() {
        let f = fixture(RiskLimits::default());
        assert!(matches!(
            f.service.get_clearing_status(Uuid::new_v4()),
            Err(PipelineError::NotFound { entity: "clearing", .. })
        ));
    }

    #[test]
    fn test_concurrent_trades_of_one_client_see_each_other() {
        let f = fixture(RiskLimits {
            daily_trading_limit: dec!(5000),
            ..Default::default()
        });
        // Each 20 @ 100 is 2000 of volume: one fits under the limit, two do not.
        let (_, first) = unbooked_trade(&f.store, Side::Buy, dec!(20), dec!(100));
        let (_, second) = unbooked_trade(&f.store, Side::Buy, dec!(20), dec!(100));
        let client = ClientId::new("C1");
        let start = Barrier::new(2);

        let outcomes: Vec<Result<(Execution, Clearing)>> = thread::scope(|scope| {
            let handles: Vec<_> = [first, second]
                .into_iter()
                .map(|execution| {
                    let (f, client, start) = (&f, &client, &start);
                    scope.spawn(move || {
                        start.wait();
                        f.service.commit_and_clear(client, || {
                            f.store.create_execution(&execution)?;
                            Ok(execution)
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let cleared = outcomes.iter().filter(|o| o.is_ok()).count();
        assert_eq!(cleared, 1);
        let rejected: Vec<&'static str> = outcomes
            .iter()
            .filter_map(|o| match o {
                Err(PipelineError::ValidationFailed(failure)) => Some(failure.code()),
                _ => None,
            })
            .collect();
        assert_eq!(rejected, vec!["DAILY_VOLUME_EXCEEDED"]);
        assert_eq!(f.store.netting_count().unwrap(), 1);
    }

    #[test]
    fn test_commit_and_clear_returns_existing_clearing() {
        let f = fixture(RiskLimits::default());
        let (order, execution) = unbooked_trade(&f.store, Side::Buy, dec!(10), dec!(100));

        let (_, first) = f
            .service
            .commit_and_clear(&order.client_id, || {
                f.store.create_execution(&execution)?;
                Ok(execution.clone())
            })
            .unwrap();
        let (_, again) = f
            .service
            .commit_and_clear(&order.client_id, || Ok(execution.clone()))
            .unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(f.store.netting_count().unwrap(), 1);
    }

    #[test]
    fn test_failed_commit_clears_nothing() {
        let f = fixture(RiskLimits::default());
        let err = f
            .service
            .commit_and_clear(&ClientId::new("C1"), || {
                Err(PipelineError::Persistence("disk full".into()))
            })
            .unwrap_err();
        assert_eq!(err.reason(), "persistence_failure");
        assert_eq!(f.store.netting_count().unwrap(), 0);
    }

    #[test]
    fn test_client_serialization_toggle() {
        let f = fixture(RiskLimits::default());
        let (_, execution) = trade(&f.store, Side::Buy, dec!(10), dec!(100));
        let service = f.service.with_client_serialization(false);
        service.clear_trade(execution.id).unwrap();
        assert!(service.client_locks.is_empty());
    }
}
