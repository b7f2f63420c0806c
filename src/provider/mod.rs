pub mod json_store;
pub mod memory;

pub use json_store::JsonStore;
pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{
    FeatureVector, FeatureVectorRaw, IndicatorPoint, PeriodType, PriceBar, ScoringStat, Security,
    Side,
};

/// Read access to securities and their indicator and price history.
#[async_trait]
pub trait IndicatorHistory: Send + Sync {
    /// Securities matching `codes`, or every known security when `codes` is empty.
    async fn securities(&self, codes: &[String]) -> Result<Vec<Security>>;

    /// Up to `max_count` trailing points dated on or before `as_of`, oldest first.
    async fn indicator_history(
        &self,
        code: &str,
        period: PeriodType,
        max_count: usize,
        as_of: Option<NaiveDate>,
    ) -> Result<Vec<IndicatorPoint>>;

    /// Up to `max_count` trailing daily closes, oldest first.
    async fn daily_bars(&self, code: &str, max_count: usize) -> Result<Vec<PriceBar>>;
}

/// Labeled reference trajectories, keyed by period, side and window length.
#[async_trait]
pub trait FeatureLibrary: Send + Sync {
    async fn pruned_features(
        &self,
        period: PeriodType,
        side: Side,
        window_len: usize,
    ) -> Result<Vec<FeatureVector>>;

    async fn raw_features(
        &self,
        period: PeriodType,
        side: Side,
        window_len: usize,
    ) -> Result<Vec<FeatureVectorRaw>>;

    /// The whole pruned library, as published to the scoring cluster.
    async fn all_pruned(&self) -> Result<Vec<FeatureVector>>;
}

/// Persistence of per-security scoring statistics.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn upsert_stats(&self, stat: ScoringStat) -> Result<()>;
    async fn get_stats(&self, code: &str) -> Result<Option<ScoringStat>>;
}

/// Window lengths searched for a probe of length `n`.
pub fn reference_lengths(n: usize) -> impl Iterator<Item = usize> {
    n.saturating_sub(2).max(2)..=n + 2
}

/// Pruned references for a probe of length `n`, across neighbouring lengths.
pub async fn pruned_references(
    lib: &dyn FeatureLibrary,
    period: PeriodType,
    side: Side,
    n: usize,
) -> Result<Vec<FeatureVector>> {
    let mut refs = Vec::new();
    for len in reference_lengths(n) {
        refs.extend(lib.pruned_features(period, side, len).await?);
    }
    Ok(refs)
}

/// Raw references for a probe of length `n`, across neighbouring lengths.
pub async fn raw_references(
    lib: &dyn FeatureLibrary,
    period: PeriodType,
    side: Side,
    n: usize,
) -> Result<Vec<FeatureVectorRaw>> {
    let mut refs = Vec::new();
    for len in reference_lengths(n) {
        refs.extend(lib.raw_features(period, side, len).await?);
    }
    Ok(refs)
}
