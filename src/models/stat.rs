use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Distribution of historical buy/sell event scores for one security.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringStat {
    pub code: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub buy_low: f64,
    pub buy_high: f64,
    pub sell_low: f64,
    pub sell_high: f64,
    pub buy_mean: f64,
    pub sell_mean: f64,
    pub buy_count: usize,
    pub sell_count: usize,
    pub buy_overlap_ratio: f64,
    pub sell_overlap_ratio: f64,
    pub degree_of_distinction: f64,
    pub updated_at: DateTime<Utc>,
}
