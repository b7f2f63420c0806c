use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::{Dispatcher, RunMode};
use crate::models::{
    FeatureVector, IndicatorPoint, KdjWindow, PeriodType, PriceBar, ScoringStat, Security, Side,
};
use crate::provider::MemoryStore;
use crate::rpc::{ClusterHealth, CpuMonitor};

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
}

fn wave_kdj(i: usize, phase: f64) -> (f64, f64, f64) {
    let x = i as f64 * 0.5 + phase;
    let k = 50.0 + 30.0 * x.sin();
    let d = 50.0 + 20.0 * (x - 0.5).sin();
    (k, d, 3.0 * k - 2.0 * d)
}

/// Create indicator points from (k, d, j) tuples; `seq` is the index, one day apart.
pub fn make_points(code: &str, data: &[(f64, f64, f64)]) -> Vec<IndicatorPoint> {
    data.iter()
        .enumerate()
        .map(|(i, &(k, d, j))| IndicatorPoint {
            code: code.to_string(),
            date: base_date() + Duration::days(i as i64),
            seq: i as i64,
            k,
            d,
            j,
        })
        .collect()
}

/// Sinusoidal K/D/J window of length `n`.
pub fn wave_window(n: usize, phase: f64) -> KdjWindow {
    let mut w = KdjWindow::default();
    for i in 0..n {
        let (k, d, j) = wave_kdj(i, phase);
        w.push(k, d, j);
    }
    w
}

pub fn wave_points(code: &str, n: usize, phase: f64) -> Vec<IndicatorPoint> {
    let tuples: Vec<(f64, f64, f64)> = (0..n).map(|i| wave_kdj(i, phase)).collect();
    make_points(code, &tuples)
}

fn dated_wave(code: &str, n: usize, step_days: i64) -> Vec<IndicatorPoint> {
    let mut pts = wave_points(code, n, 0.0);
    for (i, p) in pts.iter_mut().enumerate() {
        p.date = base_date() + Duration::days(i as i64 * step_days);
    }
    pts
}

pub fn bars_from_closes(closes: &[f64]) -> Vec<PriceBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| PriceBar {
            code: "600000".to_string(),
            date: base_date() + Duration::days(400 + i as i64),
            seq: i as i64,
            close,
        })
        .collect()
}

/// `n` strictly rising daily closes.
pub fn rising_bars(code: &str, n: usize) -> Vec<PriceBar> {
    let closes: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
    let mut bars = bars_from_closes(&closes);
    bars.iter_mut().for_each(|b| b.code = code.to_string());
    bars
}

/// `n` closes swinging roughly +/-8% around 100.
pub fn swing_bars(code: &str, n: usize) -> Vec<PriceBar> {
    let closes: Vec<f64> = (0..n)
        .map(|i| 100.0 * (1.0 + 0.08 * (i as f64 * 0.3).sin()))
        .collect();
    let mut bars = bars_from_closes(&closes);
    bars.iter_mut().for_each(|b| b.code = code.to_string());
    bars
}

pub fn sample_stat(code: &str, buy_mean: f64) -> ScoringStat {
    let d = base_date();
    ScoringStat {
        code: code.to_string(),
        from_date: d,
        to_date: d + Duration::days(600),
        buy_low: 10.0,
        buy_high: 90.0,
        sell_low: 5.0,
        sell_high: 40.0,
        buy_mean,
        sell_mean: 20.0,
        buy_count: 12,
        sell_count: 8,
        buy_overlap_ratio: 0.25,
        sell_overlap_ratio: 0.5,
        degree_of_distinction: 66.0,
        updated_at: Utc::now(),
    }
}

/// Pruned library: buy vectors are phase-0 waves, sell vectors their mirror image.
pub fn wave_library() -> Vec<FeatureVector> {
    let mut fvs = Vec::new();
    for period in PeriodType::ALL {
        for len in 2..=16 {
            let buy = wave_window(len, 0.0);
            let sell = KdjWindow::new(
                buy.k.iter().map(|v| 100.0 - v).collect(),
                buy.d.iter().map(|v| 100.0 - v).collect(),
                buy.j.iter().map(|v| 100.0 - v).collect(),
            );
            for (side, window) in [(Side::Buy, buy), (Side::Sell, sell)] {
                fvs.push(FeatureVector {
                    fid: format!("{}{}{:02}", period, side.prefix(), len),
                    period,
                    side,
                    window,
                    weight: 0.2,
                });
            }
        }
    }
    fvs
}

/// Store with wave-shaped indicator history for `codes` and a wave library.
pub fn seeded_store(codes: &[&str]) -> MemoryStore {
    let mut store = MemoryStore::new();
    store.load_securities(
        codes
            .iter()
            .map(|c| Security {
                code: c.to_string(),
                name: format!("Sec {}", c),
            })
            .collect(),
    );
    for code in codes {
        store.load_indicators(code, PeriodType::Day, dated_wave(code, 1200, 1));
        store.load_indicators(code, PeriodType::Week, dated_wave(code, 200, 7));
        store.load_indicators(code, PeriodType::Month, dated_wave(code, 50, 30));
        store.load_bars(code, swing_bars(code, 600));
    }
    store.load_pruned(wave_library());
    store
}

pub fn test_config() -> Config {
    Config {
        run_mode: RunMode::Auto,
        concurrency: 16,
        cpu_usage_threshold: 40.0,
        cpu_sample_ms: 10,
        rpc_servers: Vec::new(),
        rpc_timeout_secs: 5,
        rpc_retry: 3,
        use_raw_features: false,
        data_dir: std::env::temp_dir()
            .join("kdjv_engine_test")
            .to_string_lossy()
            .to_string(),
        log_level: "ERROR".to_string(),
    }
}

/// CPU monitor returning a fixed reading, or failing.
pub struct FixedCpu(Option<f64>);

impl FixedCpu {
    pub fn ok(usage: f64) -> Self {
        Self(Some(usage))
    }

    pub fn failing() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CpuMonitor for FixedCpu {
    async fn cpu_usage(&self) -> Result<f64> {
        self.0.ok_or_else(|| anyhow::anyhow!("cpu sampling unavailable"))
    }
}

/// Fixed cluster view that counts refreshing lookups.
pub struct StaticHealth {
    servers: usize,
    fraction: f64,
    refreshes: AtomicUsize,
}

impl StaticHealth {
    pub fn new(servers: usize, fraction: f64) -> Self {
        Self {
            servers,
            fraction,
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterHealth for StaticHealth {
    async fn available_servers(&self, refresh: bool) -> (usize, f64) {
        if refresh {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
        }
        (self.servers, self.fraction)
    }
}

pub fn dispatcher(mode: RunMode, health: StaticHealth, cpu: FixedCpu) -> Dispatcher {
    let mut cfg = test_config();
    cfg.run_mode = mode;
    Dispatcher::new(&cfg, Arc::new(health), Arc::new(cpu))
}
