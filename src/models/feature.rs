use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::indicator::KdjWindow;
use super::period::{PeriodType, Side};

/// Pruned (clustered) reference trajectory with a relevance weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub fid: String,
    pub period: PeriodType,
    pub side: Side,
    pub window: KdjWindow,
    pub weight: f64,
}

/// Individual historical sample, decayed by age when matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVectorRaw {
    pub code: String,
    pub period: PeriodType,
    pub side: Side,
    /// Sequence index of the first point of the sample
    pub start_seq: i64,
    pub sample_date: NaiveDate,
    pub window: KdjWindow,
}
