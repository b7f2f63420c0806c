pub mod pool;

pub use pool::{run_pool, BatchBackend, PoolReport};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ScoreError;
use crate::rpc::{ClusterHealth, CpuMonitor};

/// Units buffered by a worker before one remote call.
pub const BATCH_SIZE: usize = 64;

// Share of local cores used in LOCAL mode.
const LOCAL_CORE_SHARE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Local,
    Remote,
    Auto,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Local => "local",
            RunMode::Remote => "remote",
            RunMode::Auto => "auto",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<RunMode> {
        match s.to_lowercase().as_str() {
            "local" => Some(RunMode::Local),
            "remote" => Some(RunMode::Remote),
            "auto" => Some(RunMode::Auto),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<RunMode, ScoreError> {
        Self::from_str_loose(s).ok_or_else(|| ScoreError::UnsupportedRunMode(s.to_string()))
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Share of the local cores, rounded down.
fn local_level() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores as f64 * LOCAL_CORE_SHARE) as usize
}

/// Where a unit of work is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Local,
    Remote,
}

/// Load-aware choice between local computation and the scoring cluster.
pub struct Dispatcher {
    mode: RunMode,
    concurrency: usize,
    cpu_threshold: f64,
    health: Arc<dyn ClusterHealth>,
    cpu: Arc<dyn CpuMonitor>,
}

impl Dispatcher {
    pub fn new(cfg: &Config, health: Arc<dyn ClusterHealth>, cpu: Arc<dyn CpuMonitor>) -> Self {
        Self {
            mode: cfg.run_mode,
            concurrency: cfg.concurrency,
            cpu_threshold: cfg.cpu_usage_threshold,
            health,
            cpu,
        }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Worker count for the current mode and cluster health, at least 1.
    pub async fn parallel_level(&self) -> usize {
        let level = match self.mode {
            RunMode::Local => local_level(),
            RunMode::Auto => {
                let (servers, health) = self.health.available_servers(true).await;
                debug!("available rpc servers: {}, {:.2}%", servers, health * 100.0);
                if servers > 0 {
                    (self.concurrency as f64 * health) as usize
                } else {
                    local_level()
                }
            }
            RunMode::Remote => self.concurrency,
        };
        level.max(1)
    }

    /// Decide where the next unit runs.
    pub async fn route(&self) -> Route {
        match self.mode {
            RunMode::Local => Route::Local,
            RunMode::Remote => Route::Remote,
            RunMode::Auto => {
                let (servers, _) = self.health.available_servers(false).await;
                if servers == 0 {
                    return Route::Local;
                }
                match self.cpu.cpu_usage().await {
                    Ok(usage) if usage < self.cpu_threshold => Route::Local,
                    Ok(usage) => {
                        debug!("cpu {:.1}% >= {:.1}%, offloading", usage, self.cpu_threshold);
                        Route::Remote
                    }
                    Err(e) => {
                        warn!("cpu sampling failed, offloading: {:#}", e);
                        Route::Remote
                    }
                }
            }
        }
    }

    /// Run one unit where `route` says.
    ///
    /// In AUTO mode a remote failure is retried locally exactly once. In
    /// REMOTE mode it is returned to the caller.
    pub async fn run<T, L, LF, R, RF>(&self, label: &str, local: L, remote: R) -> Result<T>
    where
        L: FnOnce() -> LF,
        LF: Future<Output = Result<T>>,
        R: FnOnce() -> RF,
        RF: Future<Output = Result<T>>,
    {
        match self.route().await {
            Route::Local => local().await,
            Route::Remote => match remote().await {
                Ok(v) => Ok(v),
                Err(e) if self.mode == RunMode::Auto => {
                    warn!("{}: remote failed, retrying locally: {:#}", label, e);
                    local().await
                }
                Err(e) => Err(e),
            },
        }
    }
}
