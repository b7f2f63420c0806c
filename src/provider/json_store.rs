use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{FeatureLibrary, IndicatorHistory, MemoryStore, StatsStore};
use crate::models::{
    FeatureVector, FeatureVectorRaw, IndicatorPoint, PeriodType, PriceBar, ScoringStat, Security,
    Side,
};

pub const SECURITIES_FILE: &str = "securities.json";
pub const BARS_FILE: &str = "bars.json";
pub const INDICATORS_FILE: &str = "indicators.json";
pub const FEATURES_FILE: &str = "features.json";
pub const RAW_FEATURES_FILE: &str = "features_raw.json";
pub const STATS_FILE: &str = "kdjv_stats.json";

/// One indicator series as laid out in `indicators.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSeries {
    pub code: String,
    pub period: PeriodType,
    pub points: Vec<IndicatorPoint>,
}

/// Store backed by JSON files in a data directory.
///
/// Everything is read once on open. Stats are written back to
/// `kdjv_stats.json` after every upsert.
pub struct JsonStore {
    inner: MemoryStore,
    stats_file: PathBuf,
}

impl JsonStore {
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating data dir {}", dir.display()))?;

        let mut inner = MemoryStore::new();

        let securities: Vec<Security> = read_or_default(&dir.join(SECURITIES_FILE))?;
        info!("Loaded {} securities from {}", securities.len(), dir.display());
        inner.load_securities(securities);

        let bars: Vec<PriceBar> = read_or_default(&dir.join(BARS_FILE))?;
        let mut by_code: HashMap<String, Vec<PriceBar>> = HashMap::new();
        for bar in bars {
            by_code.entry(bar.code.clone()).or_default().push(bar);
        }
        for (code, bars) in by_code {
            inner.load_bars(&code, bars);
        }

        let series: Vec<IndicatorSeries> = read_or_default(&dir.join(INDICATORS_FILE))?;
        debug!("  {} indicator series", series.len());
        for s in series {
            inner.load_indicators(&s.code, s.period, s.points);
        }

        let pruned: Vec<FeatureVector> = read_or_default(&dir.join(FEATURES_FILE))?;
        info!("  {} pruned feature vectors", pruned.len());
        inner.load_pruned(pruned);

        let raw: Vec<FeatureVectorRaw> = read_or_default(&dir.join(RAW_FEATURES_FILE))?;
        debug!("  {} raw feature vectors", raw.len());
        inner.load_raw(raw);

        let stats_file = dir.join(STATS_FILE);
        let stats: Vec<ScoringStat> = read_or_default(&stats_file)?;
        inner.load_stats(stats).await;

        Ok(Self { inner, stats_file })
    }

    async fn save_stats(&self) -> Result<()> {
        let all = self.inner.stats_snapshot().await;
        let json = serde_json::to_string_pretty(&all)?;
        tokio::fs::write(&self.stats_file, json)
            .await
            .with_context(|| format!("writing {}", self.stats_file.display()))
    }
}

fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

#[async_trait]
impl IndicatorHistory for JsonStore {
    async fn securities(&self, codes: &[String]) -> Result<Vec<Security>> {
        self.inner.securities(codes).await
    }

    async fn indicator_history(
        &self,
        code: &str,
        period: PeriodType,
        max_count: usize,
        as_of: Option<NaiveDate>,
    ) -> Result<Vec<IndicatorPoint>> {
        self.inner.indicator_history(code, period, max_count, as_of).await
    }

    async fn daily_bars(&self, code: &str, max_count: usize) -> Result<Vec<PriceBar>> {
        self.inner.daily_bars(code, max_count).await
    }
}

#[async_trait]
impl FeatureLibrary for JsonStore {
    async fn pruned_features(
        &self,
        period: PeriodType,
        side: Side,
        window_len: usize,
    ) -> Result<Vec<FeatureVector>> {
        self.inner.pruned_features(period, side, window_len).await
    }

    async fn raw_features(
        &self,
        period: PeriodType,
        side: Side,
        window_len: usize,
    ) -> Result<Vec<FeatureVectorRaw>> {
        self.inner.raw_features(period, side, window_len).await
    }

    async fn all_pruned(&self) -> Result<Vec<FeatureVector>> {
        self.inner.all_pruned().await
    }
}

#[async_trait]
impl StatsStore for JsonStore {
    async fn upsert_stats(&self, stat: ScoringStat) -> Result<()> {
        self.inner.upsert_stats(stat).await?;
        self.save_stats().await
    }

    async fn get_stats(&self, code: &str) -> Result<Option<ScoringStat>> {
        self.inner.get_stats(code).await
    }
}
