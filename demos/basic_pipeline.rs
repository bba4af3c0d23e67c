//! A handful of orders through execution, netting, clearing and settlement.
//!
//! Shows how same-symbol trades net inside the 24h window, how margin is
//! priced on the net exposure, and how an oversized order is refused.

use chrono::{TimeZone, Utc};
use clearing_pipeline::prelude::*;
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    println!("╔════════════════════════════════════════════╗");
    println!("║  clearing-pipeline: Basic Pipeline Example ║");
    println!("╚════════════════════════════════════════════╝\n");

    let start = Utc
        .with_ymd_and_hms(2024, 3, 4, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let clock = Arc::new(ManualClock::new(start));
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::with_seed(PipelineConfig::default(), store.clone(), clock.clone(), 7)
        .expect("default configuration is valid");

    // --- Scenario 1: Opposing trades on one symbol ---
    println!("━━━ Scenario 1: Netting BUY and SELL on AAPL ━━━\n");

    let orders = [
        ("DESK-A", Side::Buy, dec!(100), dec!(50)),
        ("DESK-B", Side::Sell, dec!(40), dec!(50)),
        ("DESK-C", Side::Buy, dec!(15), dec!(51)),
    ];
    for (n, (client, side, qty, price)) in orders.into_iter().enumerate() {
        let request = OrderRequest::new(client, "AAPL", side, OrderKind::Limit, qty, price);
        match pipeline.process(request, &format!("demo-{}", n)).await {
            Ok(outcome) => {
                let netting = outcome
                    .clearing
                    .netting_id
                    .and_then(|id| store.get_netting(id).ok().flatten());
                println!(
                    "  {:<7} {:<4} {:>5} @ {:>8} -> avg {:.4} over {} fill(s)",
                    client,
                    side,
                    qty,
                    price,
                    outcome.execution.average_price,
                    outcome.execution.fills.len()
                );
                if let Some(netting) = netting {
                    println!(
                        "          window net qty {:>10.4}  settlement {:>12.2}  margin {:>10.2}",
                        netting.net_quantity, netting.net_settlement, netting.net_margin
                    );
                }
                println!(
                    "          clearing {}  settlement {} due {}",
                    outcome.clearing.status,
                    outcome.settlement.status,
                    outcome.settlement.settlement_date.format("%Y-%m-%d")
                );
            }
            Err(e) => println!("  {:<7} {} {} failed: {}", client, side, qty, e),
        }
    }
    println!();

    // --- Scenario 2: Position limit ---
    println!("━━━ Scenario 2: Order above the position limit ━━━\n");

    let request = OrderRequest::new("DESK-A", "MSFT", Side::Buy, OrderKind::Market, dec!(2000), dec!(400));
    match pipeline.process(request, "demo-big").await {
        // Thin venues can leave the fill small enough to pass.
        Ok(outcome) => println!(
            "  cleared after a partial fill of {} / 2000",
            outcome.execution.total_quantity
        ),
        Err(PipelineError::ValidationFailed(failure)) => {
            println!("  rejected with {}: {}", failure.code(), failure)
        }
        Err(e) => println!("  failed before clearing: {}", e),
    }
    println!();

    // --- Scenario 3: Settlements per client ---
    println!("━━━ Settlements ━━━\n");
    for client in ["DESK-A", "DESK-B", "DESK-C"] {
        let settlements = pipeline
            .settlement()
            .client_settlements(&ClientId::new(client))
            .unwrap_or_default();
        for s in settlements {
            println!(
                "  {:<7} {:>12.2} {}  {}  fees {:.2}",
                client, s.final_amount, s.currency, s.status, s.settlement_fees
            );
        }
    }
}
