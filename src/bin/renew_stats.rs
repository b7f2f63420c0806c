use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use kdjv_engine::config::Config;
use kdjv_engine::dispatch::Dispatcher;
use kdjv_engine::provider::JsonStore;
use kdjv_engine::rpc::{HttpCluster, ProcStatCpu};
use kdjv_engine::scoring::{KdjvEngine, StatsRenewal};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    // Codes to renew, all securities when none given
    let codes: Vec<String> = std::env::args().skip(1).collect();

    let store = Arc::new(JsonStore::open(&cfg.data_dir).await?);
    let cluster = Arc::new(HttpCluster::new(&cfg)?);
    let cpu = Arc::new(ProcStatCpu::new(Duration::from_millis(cfg.cpu_sample_ms)));
    let dispatcher = Arc::new(Dispatcher::new(&cfg, cluster.clone(), cpu));
    let engine = Arc::new(KdjvEngine::new(store.clone(), cfg.use_raw_features));

    let job = StatsRenewal::new(store.clone(), store, engine, cluster, dispatcher);
    let summary = job.renew(&codes).await?;

    println!(
        "KDJV stats: {} securities, {} written, {} skipped",
        summary.total, summary.written, summary.skipped
    );
    info!("stats written to {}", cfg.data_dir);

    Ok(())
}
