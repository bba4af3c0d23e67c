//! clearing-pipeline CLI
//!
//! Drive the post-trade pipeline from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Push 50 random orders through an in-memory pipeline and settle them
//! clearing-pipeline simulate --orders 50 --seed 7
//!
//! # Same, with a configuration file and JSON output
//! clearing-pipeline simulate --config pipeline.json --format json
//!
//! # Show the venue catalog and selection probabilities
//! clearing-pipeline venues
//! ```

use chrono::{Duration, Utc};
use clearing_pipeline::clock::{Clock, ManualClock};
use clearing_pipeline::config::PipelineConfig;
use clearing_pipeline::core::order::{OrderKind, OrderRequest, Side};
use clearing_pipeline::core::settlement::SettlementStatus;
use clearing_pipeline::error::PipelineError;
use clearing_pipeline::pipeline::Pipeline;
use clearing_pipeline::store::{MemoryStore, Store};
use env_logger::Env;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::process;
use std::sync::Arc;

const SYMBOLS: [&str; 5] = ["AAPL", "GOOGL", "MSFT", "AMZN", "META"];
const CLIENTS: usize = 5;
const MAX_SETTLEMENT_TICKS: usize = 20;

fn print_usage() {
    eprintln!(
        r#"clearing-pipeline: multi-venue execution, clearing and settlement simulator

USAGE:
    clearing-pipeline <COMMAND> [OPTIONS]

COMMANDS:
    simulate    Route random orders through clearing and settlement
    venues      Show the venue catalog with selection probabilities
    help        Show this message

OPTIONS (simulate):
    --orders <N>        Number of orders (default: 20)
    --seed <S>          Seed for orders, routing and verification
    --config <FILE>     JSON pipeline configuration
    --format <FORMAT>   Output format: text (default) or json

OPTIONS (venues):
    --config <FILE>     JSON pipeline configuration
    --format <FORMAT>   Output format: text (default) or json

Logging is controlled with RUST_LOG (default: info).

EXAMPLES:
    clearing-pipeline simulate --orders 50 --seed 7
    clearing-pipeline simulate --config pipeline.json --format json
    clearing-pipeline venues"#
    );
}

#[derive(serde::Serialize, Default)]
struct SimulationSummary {
    orders: usize,
    executed: usize,
    cleared: usize,
    clearing_failures: BTreeMap<String, usize>,
    other_failures: BTreeMap<String, usize>,
    settlements_created: usize,
    settled: usize,
    still_settling: usize,
    settlement_ticks: usize,
    traded_notional: String,
    margin_required: String,
    fees: String,
}

#[derive(serde::Serialize)]
struct VenueOutput {
    id: String,
    name: String,
    latency_ms: String,
    liquidity_factor: f64,
    success_probability: f64,
    fee_rate: String,
    selection_probability: f64,
}

fn load_config(path: Option<&str>) -> PipelineConfig {
    match path {
        Some(path) => PipelineConfig::from_json_file(path).unwrap_or_else(|e| {
            eprintln!("Error loading config '{}': {}", path, e);
            process::exit(1);
        }),
        None => PipelineConfig::default(),
    }
}

fn required_value<'a>(args: &'a [String], i: usize, flag: &str, what: &str) -> &'a str {
    args.get(i).map(String::as_str).unwrap_or_else(|| {
        eprintln!("{} requires {}", flag, what);
        process::exit(1);
    })
}

async fn cmd_simulate(args: &[String]) {
    let mut orders = 20usize;
    let mut seed: Option<u64> = None;
    let mut config_path: Option<String> = None;
    let mut format = "text".to_string();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--orders" => {
                i += 1;
                orders = required_value(args, i, "--orders", "a number")
                    .parse()
                    .unwrap_or_else(|_| {
                        eprintln!("--orders requires a number");
                        process::exit(1);
                    });
            }
            "--seed" => {
                i += 1;
                seed = Some(
                    required_value(args, i, "--seed", "a number")
                        .parse()
                        .unwrap_or_else(|_| {
                            eprintln!("--seed requires a number");
                            process::exit(1);
                        }),
                );
            }
            "--config" => {
                i += 1;
                config_path = Some(required_value(args, i, "--config", "a file path").to_string());
            }
            "--format" => {
                i += 1;
                format = required_value(args, i, "--format", "'text' or 'json'").to_string();
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let config = load_config(config_path.as_deref());
    let (delay, interval) = match (config.settlement.delay(), config.settlement.tick_interval()) {
        (Ok(delay), Ok(interval)) => (delay, interval),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error in configuration: {}", e);
            process::exit(1);
        }
    };

    // Midday UTC keeps the run inside the default market hours.
    let start = Utc::now()
        .date_naive()
        .and_hms_opt(12, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or_else(Utc::now);
    let clock = Arc::new(ManualClock::new(start));
    let store = Arc::new(MemoryStore::new());

    let built = match seed {
        Some(seed) => Pipeline::with_seed(config, store.clone(), clock.clone(), seed),
        None => Pipeline::new(config, store.clone(), clock.clone()),
    };
    let pipeline = built.unwrap_or_else(|e| {
        eprintln!("Error building pipeline: {}", e);
        process::exit(1);
    });

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut summary = SimulationSummary {
        orders,
        ..Default::default()
    };
    let mut notional = Decimal::ZERO;
    let mut margin = Decimal::ZERO;
    let mut fees = Decimal::ZERO;

    for n in 0..orders {
        let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
        let request = OrderRequest::new(
            format!("CLIENT-{}", n % CLIENTS + 1).as_str(),
            SYMBOLS[rng.gen_range(0..SYMBOLS.len())],
            side,
            OrderKind::Market,
            Decimal::from(rng.gen_range(1..=100u32)),
            Decimal::from(rng.gen_range(100..=1099u32)),
        );

        match pipeline.process(request, &format!("sim-{:05}", n)).await {
            Ok(outcome) => {
                summary.executed += 1;
                summary.cleared += 1;
                summary.settlements_created += 1;
                notional += outcome.clearing.settlement_amount;
                margin += outcome.clearing.margin_required;
                fees += outcome.execution.total_fees().unwrap_or_default()
                    + outcome.settlement.settlement_fees;
            }
            Err(PipelineError::ValidationFailed(failure)) => {
                summary.executed += 1;
                *summary
                    .clearing_failures
                    .entry(failure.code().to_string())
                    .or_default() += 1;
                warn!("order {} rejected: {}", n, failure);
            }
            Err(e) => {
                *summary.other_failures.entry(e.reason().to_string()).or_default() += 1;
                warn!("order {} not processed: {}", n, e);
            }
        }
    }

    clock.advance(delay + Duration::minutes(1));
    info!("clock advanced to {}", clock.now());

    let processor = pipeline.random_settlement_processor(seed);
    while summary.settlement_ticks < MAX_SETTLEMENT_TICKS {
        let report = processor.tick().unwrap_or_else(|e| {
            eprintln!("Settlement tick failed: {}", e);
            process::exit(1);
        });
        summary.settlement_ticks += 1;
        if report.initiated == 0 && report.verification_failures == 0 {
            break;
        }
        clock.advance(interval);
    }

    let remaining = store.list_pending_settlements().unwrap_or_default();
    summary.still_settling = remaining
        .iter()
        .filter(|s| s.status == SettlementStatus::Settling)
        .count();
    let unsettled = remaining
        .iter()
        .filter(|s| s.status != SettlementStatus::Failed)
        .count();
    summary.settled = summary.settlements_created.saturating_sub(unsettled);
    summary.traded_notional = notional.round_dp(2).to_string();
    summary.margin_required = margin.round_dp(2).to_string();
    summary.fees = fees.round_dp(2).to_string();

    if format == "json" {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing summary: {}", e);
                process::exit(1);
            }
        }
    } else {
        print_summary(&summary);
    }
}

fn print_summary(summary: &SimulationSummary) {
    println!("Simulation Summary");
    println!("==================");
    println!("  Orders:            {}", summary.orders);
    println!("  Executed:          {}", summary.executed);
    println!("  Cleared:           {}", summary.cleared);
    for (code, count) in &summary.clearing_failures {
        println!("    rejected {:<28} {}", code, count);
    }
    for (reason, count) in &summary.other_failures {
        println!("    failed   {:<28} {}", reason, count);
    }
    println!("  Settlements:       {}", summary.settlements_created);
    println!("  Settled:           {}", summary.settled);
    println!("  Still settling:    {}", summary.still_settling);
    println!("  Settlement ticks:  {}", summary.settlement_ticks);
    println!("  Traded notional:   {}", summary.traded_notional);
    println!("  Margin required:   {}", summary.margin_required);
    println!("  Fees:              {}", summary.fees);
}

fn cmd_venues(args: &[String]) {
    let mut config_path: Option<String> = None;
    let mut format = "text".to_string();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = Some(required_value(args, i, "--config", "a file path").to_string());
            }
            "--format" => {
                i += 1;
                format = required_value(args, i, "--format", "'text' or 'json'").to_string();
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let config = load_config(config_path.as_deref());
    let registry = config.venue_registry().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        process::exit(1);
    });

    let venues: Vec<VenueOutput> = registry
        .venues()
        .iter()
        .map(|v| VenueOutput {
            id: v.id.to_string(),
            name: v.name.clone(),
            latency_ms: format!("{}-{}", v.min_latency_ms, v.max_latency_ms),
            liquidity_factor: v.liquidity_factor,
            success_probability: v.success_probability,
            fee_rate: v.fee_rate.to_string(),
            selection_probability: registry.selection_probability(&v.id).unwrap_or(0.0),
        })
        .collect();

    if format == "json" {
        match serde_json::to_string_pretty(&venues) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing venues: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    println!(
        "{:<8} {:<20} {:>10} {:>10} {:>8} {:>8} {:>10}",
        "ID", "NAME", "LATENCY", "LIQUIDITY", "SUCCESS", "FEE", "SELECTED"
    );
    for v in &venues {
        println!(
            "{:<8} {:<20} {:>10} {:>10.2} {:>8.2} {:>8} {:>9.1}%",
            v.id,
            v.name,
            v.latency_ms,
            v.liquidity_factor,
            v.success_probability,
            v.fee_rate,
            v.selection_probability * 100.0
        );
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "simulate" => cmd_simulate(rest).await,
        "venues" => cmd_venues(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}
