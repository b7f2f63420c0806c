use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::f64::consts::{E, PI};

use super::matcher::best_devia;
use crate::models::{FeatureVector, FeatureVectorRaw, Probe};

/// Similarity at or above which a match counts as "high".
pub const HIGH_DEVIA: f64 = 0.8;

// Raw samples older than this many days have their similarity decayed.
const DECAY_AFTER_DAYS: f64 = 800.0;
const DECAY_FLOOR: f64 = 0.8;

/// Summary of a probe's DEVIA against one side of the feature library.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviaResult {
    pub high_sim_ratio: f64,
    pub positive_sim_ratio: f64,
    pub mean_positive_sim: f64,
    pub indicator_index: f64,
}

impl DeviaResult {
    pub fn from_parts(high_sim_ratio: f64, positive_sim_ratio: f64, mean_positive_sim: f64) -> Self {
        Self {
            high_sim_ratio,
            positive_sim_ratio,
            mean_positive_sim,
            indicator_index: indicator_index(high_sim_ratio, positive_sim_ratio, mean_positive_sim),
        }
    }

    /// `hdr/pdr/mpd/di` with two decimals, as shown in reports.
    pub fn summary(&self) -> String {
        format!(
            "{:.2}/{:.2}/{:.2}/{:.2}",
            self.high_sim_ratio, self.positive_sim_ratio, self.mean_positive_sim, self.indicator_index
        )
    }
}

/// Blend the three DEVIA statistics into a single [0, 1] index.
pub fn indicator_index(hdr: f64, pdr: f64, mpd: f64) -> f64 {
    let mut di = 0.5 * (hdr + 0.92).powf(50.0).min(1.0);
    di += 0.3
        * ((pdr + 1.0).ln().powf(0.37) + 0.4 * pdr.powf(PI) + pdr.powf(0.476145)).min(1.0);
    di += 0.2
        * ((mpd.powf(E * PI / 1.1) + 1.0).ln().powf(0.06) + E / 1.25 / PI * mpd.powf(E * PI))
            .min(1.0);
    di
}

/// Similarity multiplier for a raw sample `days` old.
pub fn age_decay(days: f64) -> f64 {
    if days > DECAY_AFTER_DAYS {
        (-0.0003 * (days - DECAY_AFTER_DAYS).powf(1.0002) + 1.0).max(DECAY_FLOOR)
    } else {
        1.0
    }
}

/// Evaluate a probe against pruned, weighted feature vectors.
pub fn devia_pruned(probe: &Probe, refs: &[FeatureVector]) -> DeviaResult {
    if probe.is_empty() {
        return DeviaResult::default();
    }
    let samples = refs
        .iter()
        .map(|fd| (best_devia(probe.window.as_slice(), fd.window.as_slice()), fd.weight));
    aggregate(samples)
}

/// Evaluate a probe against raw samples, decaying old ones and skipping itself.
pub fn devia_raw(probe: &Probe, refs: &[FeatureVectorRaw], as_of: NaiveDate) -> DeviaResult {
    if probe.is_empty() {
        return DeviaResult::default();
    }
    let samples = refs.iter().map(|fd| {
        if is_self_match(probe, fd) {
            // counted in the total, never as a match
            return (f64::NEG_INFINITY, 1.0);
        }
        let days = (as_of - fd.sample_date).num_days() as f64;
        let sim = best_devia(probe.window.as_slice(), fd.window.as_slice()) * age_decay(days);
        (sim, 1.0)
    });
    aggregate(samples)
}

fn is_self_match(probe: &Probe, fd: &FeatureVectorRaw) -> bool {
    probe.code == fd.code && probe.start_seq == Some(fd.start_seq)
}

fn aggregate<I>(samples: I) -> DeviaResult
where
    I: Iterator<Item = (f64, f64)>,
{
    let mut total = 0.0;
    let mut positive = 0.0;
    let mut high = 0.0;
    let mut pds: Vec<f64> = Vec::with_capacity(16);

    for (sim, weight) in samples {
        total += weight;
        if sim >= 0.0 {
            pds.push(sim);
            positive += weight;
            if sim >= HIGH_DEVIA {
                high += weight;
            }
        }
    }

    if total <= 0.0 {
        return DeviaResult::default();
    }
    let mpd = if pds.is_empty() { 0.0 } else { pds.iter().mean() };
    DeviaResult::from_parts(high / total, positive / total, mpd)
}
