use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use kdjv_engine::config::Config;
use kdjv_engine::dispatch::Dispatcher;
use kdjv_engine::provider::JsonStore;
use kdjv_engine::rpc::{HttpCluster, ProcStatCpu};
use kdjv_engine::scoring::{KdjvScorer, Scorer};

/// Usage: `kdjv-engine [--sync] [--limit N] [CODE...]`
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

    let mut sync = false;
    let mut limit: isize = -1;
    let mut codes = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--sync" => sync = true,
            "--limit" => {
                limit = args
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| anyhow::anyhow!("--limit needs a number"))?;
            }
            _ => codes.push(arg),
        }
    }

    info!(
        "kdjv engine starting: mode={}, {} rpc servers, data dir {}",
        cfg.run_mode,
        cfg.rpc_servers.len(),
        cfg.data_dir
    );

    let store = Arc::new(JsonStore::open(&cfg.data_dir).await?);
    let cluster = Arc::new(HttpCluster::new(&cfg)?);
    let cpu = Arc::new(ProcStatCpu::new(Duration::from_millis(cfg.cpu_sample_ms)));
    let dispatcher = Arc::new(Dispatcher::new(&cfg, cluster.clone(), cpu));

    let scorer = KdjvScorer::new(
        store.clone(),
        store.clone(),
        store,
        cluster,
        dispatcher,
    );

    if sync && !scorer.sync_features().await? {
        warn!("feature library was not accepted by every server");
    }

    let result = scorer.get(&codes, limit, true).await?;
    println!("{}: {}", scorer.id(), scorer.description());
    println!("Code\tName\tScore\t{}", scorer.fields().join("\t"));
    for item in &result.items {
        let mut row = vec![
            item.code.clone(),
            item.name.clone(),
            format!("{:.2}", item.score),
        ];
        for f in scorer.fields() {
            row.push(item.field(scorer.id(), f)?.replace('\n', " "));
        }
        println!("{}", row.join("\t"));
        if !item.comments.is_empty() {
            println!("\t{}", item.comment_text().replace('\n', "\n\t"));
        }
    }
    info!("{} securities scored", result.len());

    Ok(())
}
