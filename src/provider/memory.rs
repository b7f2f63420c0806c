use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{FeatureLibrary, IndicatorHistory, StatsStore};
use crate::models::{
    FeatureVector, FeatureVectorRaw, IndicatorPoint, PeriodType, PriceBar, ScoringStat, Security,
    Side,
};

type FeatureKey = (PeriodType, Side, usize);

/// Store over pre-loaded data.
///
/// History lookups honour an `as_of` cursor: only points dated on or
/// before it are visible, so the same data can be replayed at any date.
#[derive(Default)]
pub struct MemoryStore {
    securities: Vec<Security>,
    indicators: HashMap<(String, PeriodType), Vec<IndicatorPoint>>,
    bars: HashMap<String, Vec<PriceBar>>,
    pruned: HashMap<FeatureKey, Vec<FeatureVector>>,
    raw: HashMap<FeatureKey, Vec<FeatureVectorRaw>>,
    stats: RwLock<HashMap<String, ScoringStat>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_securities(&mut self, securities: Vec<Security>) {
        self.securities = securities;
    }

    /// Load one indicator series. Points are re-sorted by sequence index.
    pub fn load_indicators(&mut self, code: &str, period: PeriodType, mut points: Vec<IndicatorPoint>) {
        points.sort_by_key(|p| p.seq);
        self.indicators.insert((code.to_string(), period), points);
    }

    pub fn load_bars(&mut self, code: &str, mut bars: Vec<PriceBar>) {
        bars.sort_by_key(|b| b.seq);
        self.bars.insert(code.to_string(), bars);
    }

    pub fn load_pruned(&mut self, features: Vec<FeatureVector>) {
        for fv in features {
            let key = (fv.period, fv.side, fv.window.len());
            self.pruned.entry(key).or_default().push(fv);
        }
    }

    pub fn load_raw(&mut self, features: Vec<FeatureVectorRaw>) {
        for fv in features {
            let key = (fv.period, fv.side, fv.window.len());
            self.raw.entry(key).or_default().push(fv);
        }
    }

    pub async fn load_stats(&self, stats: Vec<ScoringStat>) {
        let mut map = self.stats.write().await;
        for s in stats {
            map.insert(s.code.clone(), s);
        }
    }

    /// All stored stats, ordered by code.
    pub async fn stats_snapshot(&self) -> Vec<ScoringStat> {
        let map = self.stats.read().await;
        let mut all: Vec<ScoringStat> = map.values().cloned().collect();
        all.sort_by(|a, b| a.code.cmp(&b.code));
        all
    }
}

#[async_trait]
impl IndicatorHistory for MemoryStore {
    async fn securities(&self, codes: &[String]) -> Result<Vec<Security>> {
        if codes.is_empty() {
            return Ok(self.securities.clone());
        }
        Ok(self
            .securities
            .iter()
            .filter(|s| codes.contains(&s.code))
            .cloned()
            .collect())
    }

    async fn indicator_history(
        &self,
        code: &str,
        period: PeriodType,
        max_count: usize,
        as_of: Option<NaiveDate>,
    ) -> Result<Vec<IndicatorPoint>> {
        let Some(all) = self.indicators.get(&(code.to_string(), period)) else {
            return Ok(Vec::new());
        };
        let end = match as_of {
            Some(date) => all.partition_point(|p| p.date <= date),
            None => all.len(),
        };
        let start = end.saturating_sub(max_count);
        Ok(all[start..end].to_vec())
    }

    async fn daily_bars(&self, code: &str, max_count: usize) -> Result<Vec<PriceBar>> {
        let Some(all) = self.bars.get(code) else {
            return Ok(Vec::new());
        };
        let start = all.len().saturating_sub(max_count);
        Ok(all[start..].to_vec())
    }
}

#[async_trait]
impl FeatureLibrary for MemoryStore {
    async fn pruned_features(
        &self,
        period: PeriodType,
        side: Side,
        window_len: usize,
    ) -> Result<Vec<FeatureVector>> {
        Ok(self
            .pruned
            .get(&(period, side, window_len))
            .cloned()
            .unwrap_or_default())
    }

    async fn raw_features(
        &self,
        period: PeriodType,
        side: Side,
        window_len: usize,
    ) -> Result<Vec<FeatureVectorRaw>> {
        Ok(self
            .raw
            .get(&(period, side, window_len))
            .cloned()
            .unwrap_or_default())
    }

    async fn all_pruned(&self) -> Result<Vec<FeatureVector>> {
        let mut all: Vec<FeatureVector> = self.pruned.values().flatten().cloned().collect();
        all.sort_by(|a, b| a.fid.cmp(&b.fid));
        Ok(all)
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn upsert_stats(&self, stat: ScoringStat) -> Result<()> {
        self.stats.write().await.insert(stat.code.clone(), stat);
        Ok(())
    }

    async fn get_stats(&self, code: &str) -> Result<Option<ScoringStat>> {
        Ok(self.stats.read().await.get(code).cloned())
    }
}
