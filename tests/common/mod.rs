use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kdjv_engine::config::Config;
use kdjv_engine::dispatch::{Dispatcher, RunMode};
use kdjv_engine::models::{
    FeatureVector, IndicatorPoint, KdjWindow, PeriodType, PriceBar, Security, Side,
};
use kdjv_engine::provider::MemoryStore;
use kdjv_engine::rpc::{
    ClusterHealth, CpuMonitor, ScoreReply, ScoreRequest, ScoringCluster,
};
use kdjv_engine::scoring::KdjvEngine;

pub fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
}

fn wave_kdj(i: usize, phase: f64) -> (f64, f64, f64) {
    let x = i as f64 * 0.5 + phase;
    let k = 50.0 + 30.0 * x.sin();
    let d = 50.0 + 20.0 * (x - 0.5).sin();
    (k, d, 3.0 * k - 2.0 * d)
}

pub fn wave_window(n: usize, phase: f64) -> KdjWindow {
    let mut w = KdjWindow::default();
    for i in 0..n {
        let (k, d, j) = wave_kdj(i, phase);
        w.push(k, d, j);
    }
    w
}

/// `n` indicator points `step_days` apart. `phase` shifts the wave per security.
pub fn wave_history(code: &str, n: usize, step_days: i64, phase: f64) -> Vec<IndicatorPoint> {
    (0..n)
        .map(|i| {
            let (k, d, j) = wave_kdj(i, phase);
            IndicatorPoint {
                code: code.to_string(),
                date: base_date() + Duration::days(i as i64 * step_days),
                seq: i as i64,
                k,
                d,
                j,
            }
        })
        .collect()
}

pub fn bars(code: &str, closes: &[f64]) -> Vec<PriceBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| PriceBar {
            code: code.to_string(),
            date: base_date() + Duration::days(400 + i as i64),
            seq: i as i64,
            close,
        })
        .collect()
}

pub fn swing_closes(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 100.0 * (1.0 + 0.08 * (i as f64 * 0.3).sin()))
        .collect()
}

pub fn rising_closes(n: usize) -> Vec<f64> {
    (0..n).map(|i| 100.0 + i as f64).collect()
}

/// Buy vectors are phase-0 waves, sell vectors their mirror image.
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

pub fn securities(codes: &[&str]) -> Vec<Security> {
    codes
        .iter()
        .map(|c| Security {
            code: c.to_string(),
            name: format!("Sec {}", c),
        })
        .collect()
}

/// Store where security `i` has its waves shifted by `0.7 * i` and the given closes.
pub fn store_with(codes: &[&str], closes: &[f64]) -> MemoryStore {
    let mut store = MemoryStore::new();
    store.load_securities(securities(codes));
    for (i, code) in codes.iter().enumerate() {
        let phase = 0.7 * i as f64;
        store.load_indicators(code, PeriodType::Day, wave_history(code, 1200, 1, phase));
        store.load_indicators(code, PeriodType::Week, wave_history(code, 200, 7, phase));
        store.load_indicators(code, PeriodType::Month, wave_history(code, 50, 30, phase));
        store.load_bars(code, bars(code, closes));
    }
    store.load_pruned(wave_library());
    store
}

pub fn config(mode: RunMode) -> Config {
    Config {
        run_mode: mode,
        concurrency: 4,
        cpu_usage_threshold: 40.0,
        cpu_sample_ms: 10,
        rpc_servers: Vec::new(),
        rpc_timeout_secs: 5,
        rpc_retry: 1,
        use_raw_features: false,
        data_dir: "data".to_string(),
        log_level: "ERROR".to_string(),
    }
}

pub struct FixedCpu(pub f64);

#[async_trait]
impl CpuMonitor for FixedCpu {
    async fn cpu_usage(&self) -> Result<f64> {
        Ok(self.0)
    }
}

pub struct StaticHealth(pub usize, pub f64);

#[async_trait]
impl ClusterHealth for StaticHealth {
    async fn available_servers(&self, _refresh: bool) -> (usize, f64) {
        (self.0, self.1)
    }
}

/// Dispatcher with one healthy server. AUTO offloads whenever `cpu` >= 40.
pub fn dispatcher(mode: RunMode, cpu: f64) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(
        &config(mode),
        Arc::new(StaticHealth(1, 1.0)),
        Arc::new(FixedCpu(cpu)),
    ))
}

/// In-process stand-in for the scoring cluster, answering with a local engine.
pub struct EngineCluster {
    engine: KdjvEngine,
    pub calls: AtomicUsize,
    pub synced: AtomicUsize,
}

impl EngineCluster {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            engine: KdjvEngine::new(store, false),
            calls: AtomicUsize::new(0),
            synced: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringCluster for EngineCluster {
    async fn score(&self, req: &ScoreRequest) -> Result<ScoreReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.engine.answer(req).await
    }

    async fn sync_features(&self, features: &[FeatureVector]) -> Result<bool> {
        self.synced.store(features.len(), Ordering::SeqCst);
        Ok(true)
    }
}

/// Cluster that answers with row ids nobody asked for.
#[derive(Default)]
pub struct MismatchCluster {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ScoringCluster for MismatchCluster {
    async fn score(&self, req: &ScoreRequest) -> Result<ScoreReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = req.series.len();
        Ok(ScoreReply {
            row_ids: (0..n).map(|i| format!("bogus-{}", i)).collect(),
            scores: vec![99.0; n],
            detail: vec![Default::default(); n],
        })
    }

    async fn sync_features(&self, _features: &[FeatureVector]) -> Result<bool> {
        Ok(false)
    }
}
