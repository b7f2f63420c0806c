use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    pub code: String,
    pub name: String,
}

/// Daily close used when replaying history for stats renewal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub code: String,
    pub date: NaiveDate,
    pub seq: i64,
    pub close: f64,
}
