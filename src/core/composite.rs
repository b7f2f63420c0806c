use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::devia::DeviaResult;
use crate::models::{PeriodType, Side};

const PART_A: f64 = 30.0;
const PART_B: f64 = 70.0;
const DIRAT_SAT: f64 = 0.995;
const BUY_DI_LOW: f64 = 0.201;
const BUY_DI_SAT: f64 = 0.81;

/// Relative strength of the buy-side DI over the sell-side DI.
pub fn dirat(buy_di: f64, sell_di: f64) -> f64 {
    if sell_di == 0.0 {
        buy_di
    } else {
        (buy_di - sell_di) / sell_di.abs()
    }
}

fn quartic(x: f64, c: [f64; 5]) -> f64 {
    c[0] + c[1] * x + c[2] * x.powi(2) + c[3] * x.powi(3) + c[4] * x.powi(4)
}

/// Score of one period type, in [0, 100].
pub fn period_score(buy_di: f64, sell_di: f64) -> f64 {
    let d = dirat(buy_di, sell_di);
    let a = if d > 0.0 && d < DIRAT_SAT {
        PART_A * quartic(d, [0.0015, 3.3609, -4.3302, 2.5115, -0.5449])
    } else if d >= DIRAT_SAT {
        PART_A
    } else {
        0.0
    };

    let b = if buy_di > BUY_DI_LOW && buy_di < BUY_DI_SAT {
        PART_B * quartic(buy_di, [0.0283, -1.8257, 10.4231, -10.8682, 3.2234])
    } else if buy_di >= BUY_DI_SAT {
        PART_B
    } else {
        0.0
    };

    a + b
}

/// Weighted day/week/month blend, clamped to [0, 100].
pub fn composite(day: f64, week: f64, month: f64) -> f64 {
    let total = PeriodType::Day.weight() * day
        + PeriodType::Week.weight() * week
        + PeriodType::Month.weight() * month;
    (total / 100.0).clamp(0.0, 100.0)
}

/// Buy and sell DEVIA of a probe for one period type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodAssessment {
    pub period: PeriodType,
    pub buy: DeviaResult,
    pub sell: DeviaResult,
}

impl PeriodAssessment {
    pub fn new(period: PeriodType, buy: DeviaResult, sell: DeviaResult) -> Self {
        Self { period, buy, sell }
    }

    pub fn score(&self) -> f64 {
        period_score(self.buy.indicator_index, self.sell.indicator_index)
    }

    pub fn side(&self, side: Side) -> &DeviaResult {
        match side {
            Side::Buy => &self.buy,
            Side::Sell => &self.sell,
        }
    }

    /// Two-line diagnostic, buy then sell.
    pub fn summary(&self) -> String {
        format!("{}\n{}\n", self.buy.summary(), self.sell.summary())
    }

    /// Flatten into `"D.bhdr"`-style keys, as carried in RPC replies.
    pub fn to_detail(&self, detail: &mut HashMap<String, f64>) {
        for side in [Side::Buy, Side::Sell] {
            let r = self.side(side);
            let p = format!("{}.{}", self.period.as_str(), side.prefix());
            detail.insert(format!("{}hdr", p), r.high_sim_ratio);
            detail.insert(format!("{}pdr", p), r.positive_sim_ratio);
            detail.insert(format!("{}mpd", p), r.mean_positive_sim);
            detail.insert(format!("{}di", p), r.indicator_index);
        }
    }

    /// Rebuild from a detail map; missing keys read as 0.
    pub fn from_detail(period: PeriodType, detail: &HashMap<String, f64>) -> Self {
        let read = |side: Side| {
            let p = format!("{}.{}", period.as_str(), side.prefix());
            let get = |k: &str| detail.get(&format!("{}{}", p, k)).copied().unwrap_or(0.0);
            DeviaResult {
                high_sim_ratio: get("hdr"),
                positive_sim_ratio: get("pdr"),
                mean_positive_sim: get("mpd"),
                indicator_index: get("di"),
            }
        };
        Self::new(period, read(Side::Buy), read(Side::Sell))
    }
}

/// Composite score over the three period assessments.
pub fn score_assessments(day: &PeriodAssessment, week: &PeriodAssessment, month: &PeriodAssessment) -> f64 {
    composite(day.score(), week.score(), month.score())
}
