use serde::{Deserialize, Serialize};

use crate::dispatch::RunMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Dispatch
    pub run_mode: RunMode,
    pub concurrency: usize,
    /// CPU usage percent at or above which AUTO mode offloads to the cluster
    pub cpu_usage_threshold: f64,
    /// Window over which the CPU sampler averages utilisation
    pub cpu_sample_ms: u64,

    // RPC cluster
    pub rpc_servers: Vec<String>,
    pub rpc_timeout_secs: u64,
    pub rpc_retry: usize,

    // Scoring
    pub use_raw_features: bool,

    // Storage
    pub data_dir: String,

    // Logging
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let rpc_servers = env("RPC_SERVERS", "")
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Config {
            run_mode: RunMode::from_str_loose(&env("RUN_MODE", "auto")).unwrap_or(RunMode::Auto),
            concurrency: env("CONCURRENCY", "16").parse().unwrap_or(16),
            cpu_usage_threshold: env("CPU_USAGE_THRESHOLD", "40").parse().unwrap_or(40.0),
            cpu_sample_ms: env("CPU_SAMPLE_MS", "500").parse().unwrap_or(500),
            rpc_servers,
            rpc_timeout_secs: env("RPC_TIMEOUT_SECS", "120").parse().unwrap_or(120),
            rpc_retry: env("RPC_RETRY", "3").parse().unwrap_or(3),
            use_raw_features: env("USE_RAW_FEATURES", "false").to_lowercase() == "true",
            data_dir: env("DATA_DIR", "data"),
            log_level: env("LOG_LEVEL", "INFO"),
        }
    }
}
