//! The background settlement loop advancing trades to SETTLED.
//!
//! Settlements are created T+2 against a manual clock, the clock is moved
//! past the settlement date and the loop is run on a short interval until
//! every settlement is final, then shut down gracefully.

use chrono::{Duration, TimeZone, Utc};
use clearing_pipeline::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("╔═══════════════════════════════════════════════╗");
    println!("║  clearing-pipeline: Settlement Cycle Example  ║");
    println!("╚═══════════════════════════════════════════════╝\n");

    let mut config = PipelineConfig::default();
    config.settlement.interval_secs = 1;

    let start = Utc
        .with_ymd_and_hms(2024, 3, 4, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let clock = Arc::new(ManualClock::new(start));
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::with_seed(config, store.clone(), clock.clone(), 11)
        .expect("valid configuration");

    let symbols = ["AAPL", "GOOGL", "MSFT", "AMZN", "META"];
    let mut created = Vec::new();
    for (n, symbol) in symbols.iter().enumerate() {
        let side = if n % 2 == 0 { Side::Buy } else { Side::Sell };
        let qty = Decimal::from(10 * (n as u32 + 1));
        let request = OrderRequest::new("DESK-A", *symbol, side, OrderKind::Market, qty, Decimal::from(250));
        match pipeline.process(request, &format!("cycle-{}", n)).await {
            Ok(outcome) => {
                println!(
                    "  {:<6} {:<4} {:>4} -> settlement {} due {}",
                    symbol,
                    side,
                    qty,
                    outcome.settlement.id,
                    outcome.settlement.settlement_date
                );
                created.push(outcome.settlement.id);
            }
            Err(e) => println!("  {:<6} failed: {}", symbol, e),
        }
    }

    clock.advance(Duration::days(2) + Duration::minutes(1));
    println!("\nClock moved to {}\n", clock.now());

    let processor = Arc::new(pipeline.random_settlement_processor(Some(11)));
    let handle = processor.start();

    for _ in 0..30 {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        let open = store
            .list_pending_settlements()
            .map(|pending| pending.len())
            .unwrap_or(0);
        println!("  unsettled: {}", open);
        if open == 0 {
            break;
        }
    }

    let grace = std::time::Duration::from_secs(pipeline.config().settlement.shutdown_grace_secs);
    if let Err(e) = handle.shutdown(grace).await {
        eprintln!("shutdown: {}", e);
    }

    println!("\n━━━ Final state ━━━\n");
    for id in created {
        if let Ok(s) = pipeline.settlement().get_settlement(id) {
            println!(
                "  {}  {:<8}  {:>10.2} {}  after {} verification attempt(s)",
                s.id, s.status, s.final_amount, s.currency, s.verification_attempts
            );
        }
    }
}
