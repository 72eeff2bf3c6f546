//! BakriPay Simulator
//!
//! Drives concurrent workloads through the ledger engine and checks that
//! every ledger invariant still holds afterwards.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bakripay_common::monetary::format_amount;
use bakripay_ledger::{
    InMemoryStore, LargeAmountFlagHook, LedgerConfig, LedgerEngine, LoggingHook,
};

mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use scenario::Scenario;

/// BakriPay Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "BakriPay ledger workload simulator")]
struct Args {
    /// Number of accounts to open
    #[arg(short, long, default_value = "10")]
    accounts: usize,

    /// Number of operations to generate
    #[arg(short, long, default_value = "1000")]
    operations: usize,

    /// Maximum operations in flight
    #[arg(short, long, default_value = "32")]
    concurrency: usize,

    /// Scenario to run (random, crossing-transfers, idempotent-retries, reversals)
    #[arg(short, long, default_value = "random")]
    scenario: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Lock acquisition timeout, overriding LEDGER_LOCK_TIMEOUT_MS
    #[arg(long)]
    lock_timeout_ms: Option<u64>,

    /// Balance each account is funded with
    #[arg(long, default_value = "1000.00")]
    initial_balance: Decimal,

    /// Retries after Busy or a storage failure
    #[arg(long, default_value = "5")]
    max_retries: u32,

    /// Flag completed transactions at or above this amount
    #[arg(long, default_value = "400.00")]
    large_amount: Decimal,

    /// Log a notification line for every committed transaction
    #[arg(long)]
    notify: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let mut config = LedgerConfig::from_env();
    if let Some(ms) = args.lock_timeout_ms {
        config.lock_timeout = Duration::from_millis(ms);
    }

    let seed = args.seed.unwrap_or_else(rand::random);
    info!("Starting BakriPay Simulator");
    info!("Accounts: {}", args.accounts);
    info!("Scenario: {} (seed {})", args.scenario, seed);

    let mut rng = StdRng::seed_from_u64(seed);
    let scenario = Scenario::load(&args.scenario, args.accounts, args.operations, &mut rng)?;

    // Storage is owned here and injected into the engine.
    let store = Arc::new(InMemoryStore::new());
    let flagger = Arc::new(LargeAmountFlagHook::new(args.large_amount));
    let mut engine = LedgerEngine::new(store, config)?.with_hook(flagger.clone());
    if args.notify {
        engine = engine.with_hook(Arc::new(LoggingHook));
    }
    let engine = Arc::new(engine);

    let mut controller = SimulationController::new(
        engine.clone(),
        args.concurrency,
        args.initial_balance,
        args.max_retries,
    );
    controller.initialize(args.accounts).await?;

    let started = Instant::now();
    controller.run_scenario(scenario).await?;
    let elapsed = started.elapsed();

    let report = controller.verify().await?;
    let metrics = controller.get_metrics().await;
    let history = controller.sample_history(5).await?;

    info!("Simulation complete in {:.2}s", elapsed.as_secs_f64());
    info!("Total operations: {}", metrics.total_operations);
    info!("Successful: {}", metrics.successful_operations);
    info!("Failed: {}", metrics.failed_operations);
    for (code, count) in &metrics.failures_by_code {
        info!("  {}: {}", code, count);
    }
    info!("Retries: {}", metrics.retries);
    info!("Success rate: {:.1}%", metrics.success_rate() * 100.0);
    info!(
        "Throughput: {:.0} ops/s",
        metrics.throughput(elapsed.as_secs_f64())
    );
    info!(
        "Latency: avg {}us, p50 {}us, p99 {}us",
        metrics.average_latency_us(),
        metrics.p50_latency_us(),
        metrics.p99_latency_us()
    );
    info!("Large transactions flagged: {}", flagger.flagged().len());
    info!(
        "Ledger consistent: {} accounts, {} transactions, total balance {}",
        report.accounts_checked,
        report.transactions_checked,
        format_amount(report.total_balance)
    );
    info!("Latest entries on first account: {}", history.len());
    info!("Engine metrics:\n{}", engine.metrics().to_prometheus());

    Ok(())
}
