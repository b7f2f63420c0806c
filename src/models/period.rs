use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ScoreError;

/// Granularity bucket of an indicator history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodType {
    #[serde(rename = "D")]
    Day,
    #[serde(rename = "W")]
    Week,
    #[serde(rename = "M")]
    Month,
}

impl PeriodType {
    pub const ALL: [PeriodType; 3] = [PeriodType::Day, PeriodType::Week, PeriodType::Month];

    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Day => "D",
            PeriodType::Week => "W",
            PeriodType::Month => "M",
        }
    }

    /// Weight of this period in the composite score.
    pub fn weight(&self) -> f64 {
        match self {
            PeriodType::Day => 30.0,
            PeriodType::Week => 30.0,
            PeriodType::Month => 40.0,
        }
    }

    pub fn from_str_loose(s: &str) -> Option<PeriodType> {
        match s {
            "D" | "d" | "day" => Some(PeriodType::Day),
            "W" | "w" | "week" => Some(PeriodType::Week),
            "M" | "m" | "month" => Some(PeriodType::Month),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<PeriodType, ScoreError> {
        Self::from_str_loose(s).ok_or_else(|| ScoreError::UnsupportedPeriod(s.to_string()))
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// Prefix used in diagnostic detail keys ("b" / "s").
    pub fn prefix(&self) -> &'static str {
        match self {
            Side::Buy => "b",
            Side::Sell => "s",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
