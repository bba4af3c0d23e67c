use chrono::{DateTime, Duration, TimeZone, Utc};
use clearing_pipeline::clock::ManualClock;
use clearing_pipeline::config::PipelineConfig;
use clearing_pipeline::core::clearing::ClearingStatus;
use clearing_pipeline::core::ids::{ClientId, VenueId};
use clearing_pipeline::core::order::{OrderKind, OrderRequest, OrderStatus, Side};
use clearing_pipeline::core::settlement::{Settlement, SettlementStatus};
use clearing_pipeline::error::PipelineError;
use clearing_pipeline::pipeline::Pipeline;
use clearing_pipeline::settlement::SettlementVerifier;
use clearing_pipeline::store::{MemoryStore, Store};
use clearing_pipeline::venue::{select_venue, RouterConfig, VenueProfile, VenueRegistry};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
}

/// One venue that always fills completely at the reference price.
fn reliable_config() -> PipelineConfig {
    PipelineConfig {
        venues: vec![VenueProfile::new(
            "EXCH1",
            "Primary Exchange",
            (5, 30),
            1.0,
            1.0,
            dec!(0.001),
        )],
        router: RouterConfig {
            price_variance: Decimal::ZERO,
            ..Default::default()
        },
        ..Default::default()
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    pipeline: Pipeline,
}

fn harness(config: PipelineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(noon()));
    let pipeline = Pipeline::with_seed(config, store.clone(), clock.clone(), 42).unwrap();
    Harness {
        store,
        clock,
        pipeline,
    }
}

fn always_verified() -> Arc<dyn SettlementVerifier> {
    Arc::new(|_: &Settlement| true)
}

/// Order → execution → netting → clearing → settlement → SETTLED.
#[tokio::test(start_paused = true)]
async fn end_to_end_buy_settles_after_two_ticks() {
    let h = harness(reliable_config());
    let request = OrderRequest::new("CLIENT-1", "AAPL", Side::Buy, OrderKind::Market, dec!(10), dec!(100));

    let outcome = h.pipeline.process(request, "order-1").await.unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Filled);
    assert_eq!(outcome.execution.total_quantity, dec!(10));
    assert_eq!(outcome.execution.average_price, dec!(100));
    assert_eq!(outcome.execution.fills.len(), 1);

    // Empty prior window: net 10 / 1000, margin 1000 * 0.10 * 1.20.
    assert_eq!(outcome.clearing.status, ClearingStatus::Cleared);
    assert_eq!(outcome.clearing.settlement_amount, dec!(1000));
    assert_eq!(outcome.clearing.net_positions, dec!(10));
    assert_eq!(outcome.clearing.margin_required, dec!(120));
    let netting = h
        .store
        .get_netting(outcome.clearing.netting_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(netting.net_quantity, dec!(10));
    assert_eq!(netting.net_amount, dec!(1000));

    let settlement = outcome.settlement;
    assert_eq!(settlement.status, SettlementStatus::Pending);
    assert_eq!(settlement.settlement_date, noon() + Duration::days(2));
    assert_eq!(settlement.settlement_fees, dec!(1));
    assert_eq!(settlement.settlement_account, "ACC_CLIENT-1");

    let processor = h.pipeline.settlement_processor(always_verified());

    // Not yet due: nothing moves.
    h.clock.set(settlement.settlement_date - Duration::seconds(1));
    assert_eq!(processor.tick().unwrap().not_due, 1);

    h.clock.set(settlement.settlement_date);
    assert_eq!(processor.tick().unwrap().initiated, 1);
    assert_eq!(
        h.pipeline.settlement().get_settlement(settlement.id).unwrap().status,
        SettlementStatus::Settling
    );

    h.clock.advance(Duration::minutes(5));
    assert_eq!(processor.tick().unwrap().settled, 1);
    assert_eq!(
        h.pipeline.settlement().get_settlement(settlement.id).unwrap().status,
        SettlementStatus::Settled
    );
}

#[tokio::test(start_paused = true)]
async fn idempotent_replay_returns_same_records() {
    let h = harness(reliable_config());
    let request = || OrderRequest::new("CLIENT-1", "MSFT", Side::Sell, OrderKind::Limit, dec!(5), dec!(300));

    let first = h.pipeline.process(request(), "replay-key").await.unwrap();
    let second = h.pipeline.process(request(), "replay-key").await.unwrap();

    assert_eq!(first.order.id, second.order.id);
    assert_eq!(first.execution.id, second.execution.id);
    assert_eq!(first.clearing.id, second.clearing.id);
    assert_eq!(first.settlement.id, second.settlement.id);
    assert_eq!(h.store.order_count().unwrap(), 1);
    assert_eq!(h.store.execution_count().unwrap(), 1);
    assert_eq!(h.store.netting_count().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_clearing_is_recorded_and_blocks_settlement() {
    let h = harness(reliable_config());
    let request = OrderRequest::new("CLIENT-1", "AAPL", Side::Buy, OrderKind::Limit, dec!(6000), dec!(100));

    let err = h.pipeline.process(request, "too-big").await.unwrap_err();
    let failure = match err {
        PipelineError::ValidationFailed(failure) => failure,
        other => panic!("unexpected error {other}"),
    };
    assert_eq!(failure.code(), "POSITION_LIMIT_EXCEEDED");

    assert!(h.store.list_pending_settlements().unwrap().is_empty());
    assert_eq!(h.store.netting_count().unwrap(), 0);

    // The execution stands; only clearing refused it.
    assert_eq!(h.store.execution_count().unwrap(), 1);
    let settlements = h
        .pipeline
        .settlement()
        .client_settlements(&ClientId::new("CLIENT-1"))
        .unwrap();
    assert!(settlements.is_empty());
}

#[tokio::test(start_paused = true)]
async fn netting_spans_orders_in_the_window() {
    let h = harness(reliable_config());

    let buy = OrderRequest::new("CLIENT-1", "AAPL", Side::Buy, OrderKind::Limit, dec!(100), dec!(50));
    h.pipeline.process(buy, "buy").await.unwrap();

    h.clock.advance(Duration::hours(1));
    let sell = OrderRequest::new("CLIENT-2", "AAPL", Side::Sell, OrderKind::Limit, dec!(40), dec!(50));
    let outcome = h.pipeline.process(sell, "sell").await.unwrap();

    // BUY 100 @ 50 and SELL 40 @ 50 net to 60 / 3000; margin 3000 * 0.10 * 1.20.
    let netting = h
        .store
        .get_netting(outcome.clearing.netting_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(netting.net_quantity, dec!(60));
    assert_eq!(netting.net_amount, dec!(3000));
    assert_eq!(netting.net_settlement, dec!(3000));
    assert_eq!(netting.trade_count(), 2);
    assert_eq!(outcome.clearing.margin_required, dec!(360));

    // The clearing itself carries only the triggering trade.
    assert_eq!(outcome.clearing.settlement_amount, dec!(2000));
    assert_eq!(outcome.clearing.net_positions, dec!(-40));

    // A day later both earlier trades have left the window.
    h.clock.advance(Duration::hours(25));
    let again = OrderRequest::new("CLIENT-2", "AAPL", Side::Sell, OrderKind::Limit, dec!(40), dec!(50));
    let later = h.pipeline.process(again, "sell-2").await.unwrap();
    let netting = h
        .store
        .get_netting(later.clearing.netting_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(netting.trade_count(), 1);
    assert_eq!(netting.net_quantity, dec!(-40));
}

#[tokio::test(start_paused = true)]
async fn daily_volume_limit_counts_same_day_trades() {
    let mut config = reliable_config();
    config.limits.daily_trading_limit = dec!(2500);
    let h = harness(config);
    let order = || OrderRequest::new("CLIENT-9", "META", Side::Buy, OrderKind::Limit, dec!(10), dec!(100));

    // The stored aggregate already includes the trade being cleared.
    h.pipeline.process(order(), "v-1").await.unwrap();
    let err = h.pipeline.process(order(), "v-2").await.unwrap_err();
    match err {
        PipelineError::ValidationFailed(failure) => {
            assert_eq!(failure.code(), "DAILY_VOLUME_EXCEEDED")
        }
        other => panic!("unexpected error {other}"),
    }

    // Another client is unaffected.
    let other = OrderRequest::new("CLIENT-8", "META", Side::Buy, OrderKind::Limit, dec!(10), dec!(100));
    h.pipeline.process(other, "v-3").await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_same_client_trades_cannot_both_use_the_limit() {
    let mut config = reliable_config();
    config.venues[0].min_latency_ms = 1;
    config.venues[0].max_latency_ms = 1;
    config.limits.daily_trading_limit = dec!(2500);
    let h = harness(config);
    let pipeline = Arc::new(h.pipeline);

    let tasks: Vec<_> = ["c-1", "c-2"]
        .into_iter()
        .map(|key| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let order = OrderRequest::new("CLIENT-5", "AMZN", Side::Buy, OrderKind::Limit, dec!(10), dec!(100));
                pipeline.process(order, key).await
            })
        })
        .collect();

    let mut cleared = 0;
    let mut rejected = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(outcome) => {
                assert_eq!(outcome.clearing.status, ClearingStatus::Cleared);
                cleared += 1;
            }
            Err(PipelineError::ValidationFailed(failure)) => rejected.push(failure.code()),
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(cleared, 1);
    assert_eq!(rejected, vec!["DAILY_VOLUME_EXCEEDED"]);
}

#[tokio::test(start_paused = true)]
async fn unrepresentable_order_is_rejected_not_panicking() {
    let h = harness(reliable_config());
    let order = OrderRequest::new(
        "CLIENT-1",
        "AAPL",
        Side::Buy,
        OrderKind::Market,
        dec!(1000000000000000),
        dec!(1000000000000000),
    );
    let err = h.pipeline.process(order, "huge-1").await.unwrap_err();
    assert_eq!(err.reason(), "invalid_order");
    assert_eq!(h.store.order_count().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn settlement_loop_runs_on_interval_and_stops() {
    let h = harness(reliable_config());
    let request = OrderRequest::new("CLIENT-1", "GOOGL", Side::Buy, OrderKind::Market, dec!(3), dec!(150));
    let outcome = h.pipeline.process(request, "loop").await.unwrap();
    h.clock.set(outcome.settlement.settlement_date + Duration::minutes(1));

    let processor = Arc::new(h.pipeline.settlement_processor(always_verified()));
    let interval = processor.interval();
    let handle = processor.start();

    tokio::time::sleep(interval * 2 + std::time::Duration::from_secs(1)).await;
    let settled = h
        .pipeline
        .settlement()
        .get_settlement(outcome.settlement.id)
        .unwrap();
    assert_eq!(settled.status, SettlementStatus::Settled);

    handle
        .shutdown(std::time::Duration::from_secs(10))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn seeded_default_venues_respect_fill_invariants() {
    let h = harness(PipelineConfig::default());
    let mut filled = 0;
    for n in 0..40 {
        let request = OrderRequest::new("CLIENT-1", "AMZN", Side::Buy, OrderKind::Market, dec!(50), dec!(200));
        let order = h.pipeline.trading().create_order(request, &format!("o-{}", n)).unwrap();
        let execution = match h.pipeline.trading().execute_order(order.id, &format!("e-{}", n)).await {
            Ok(execution) => execution,
            Err(PipelineError::NoVenueAvailable { .. }) => continue,
            Err(e) => panic!("unexpected error {e}"),
        };
        filled += 1;

        assert!(!execution.fills.is_empty() && execution.fills.len() <= 3);
        let qty: Decimal = execution.fills.iter().map(|f| f.quantity).sum();
        assert_eq!(qty, execution.total_quantity);
        assert!(execution.total_quantity <= dec!(50));

        let notional: Decimal = execution.fills.iter().map(|f| f.price * f.quantity).sum();
        assert!((execution.average_price - notional / qty).abs() < dec!(0.000000001));
        for fill in &execution.fills {
            assert!(fill.price >= dec!(196) && fill.price <= dec!(204));
            assert_eq!(fill.fee_amount, fill.price * fill.quantity * fill.fee_rate);
        }
    }
    assert!(filled > 30, "only {} of 40 orders filled", filled);
}

/// Chi-square goodness of fit of venue selection against `weight / Σ weight`.
#[test]
fn venue_selection_matches_weights() {
    let registry = VenueRegistry::default();
    let mut rng = StdRng::seed_from_u64(20240304);
    let samples = 100_000;

    let mut counts: HashMap<VenueId, usize> = HashMap::new();
    for _ in 0..samples {
        *counts.entry(select_venue(&registry, &mut rng).id.clone()).or_default() += 1;
    }

    let chi_square: f64 = registry
        .venues()
        .iter()
        .map(|v| {
            let expected = registry.selection_probability(&v.id).unwrap() * samples as f64;
            let observed = *counts.get(&v.id).unwrap_or(&0) as f64;
            (observed - expected).powi(2) / expected
        })
        .sum();

    // 3 degrees of freedom, p = 0.001.
    assert!(chi_square < 16.27, "chi-square {}", chi_square);
}

