use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const PROC_STAT: &str = "/proc/stat";

/// Source of host CPU utilisation, in percent.
#[async_trait]
pub trait CpuMonitor: Send + Sync {
    async fn cpu_usage(&self) -> Result<f64>;
}

/// Samples the aggregate `cpu` line of `/proc/stat` twice, `window` apart.
///
/// A sample younger than `window` is handed out again.
pub struct ProcStatCpu {
    window: Duration,
    last: Mutex<Option<(Instant, f64)>>,
}

impl ProcStatCpu {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

fn parse_cpu_line(content: &str) -> Result<CpuTimes> {
    let line = content
        .lines()
        .find(|l| l.starts_with("cpu "))
        .context("no aggregate cpu line")?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .context("malformed cpu line")?;
    if fields.len() < 4 {
        bail!("cpu line has {} fields", fields.len());
    }

    let total: u64 = fields.iter().sum();
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Ok(CpuTimes {
        busy: total - idle,
        total,
    })
}

fn usage_between(before: CpuTimes, after: CpuTimes) -> Result<f64> {
    let total = after.total.saturating_sub(before.total);
    if total == 0 {
        bail!("no cpu ticks elapsed during sample");
    }
    let busy = after.busy.saturating_sub(before.busy);
    Ok(busy as f64 / total as f64 * 100.0)
}

async fn read_times() -> Result<CpuTimes> {
    let content = tokio::fs::read_to_string(PROC_STAT)
        .await
        .with_context(|| format!("reading {}", PROC_STAT))?;
    parse_cpu_line(&content)
}

#[async_trait]
impl CpuMonitor for ProcStatCpu {
    async fn cpu_usage(&self) -> Result<f64> {
        let mut last = self.last.lock().await;
        if let Some((at, usage)) = *last {
            if at.elapsed() < self.window {
                return Ok(usage);
            }
        }

        let before = read_times().await?;
        tokio::time::sleep(self.window).await;
        let after = read_times().await?;
        let usage = usage_between(before, after)?;
        *last = Some((Instant::now(), usage));
        Ok(usage)
    }
}
