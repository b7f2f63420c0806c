use statrs::statistics::Statistics;

use crate::models::KdjSlice;

/// Returned for windows that cannot be compared at all.
const NO_MATCH: f64 = -1.0;

// Contribution of each line to the blended correlation.
const K_WEIGHT: f64 = 1.0;
const D_WEIGHT: f64 = 4.0;
const J_WEIGHT: f64 = 5.0;

// Penalty applied to the spread of point-wise differences.
const DEVIATION_SCALE: f64 = 0.001;

/// DEVIA between two windows of equal length.
///
/// Blends the K/D/J correlations and subtracts a penalty growing with the
/// spread of their differences. Ranges over (-inf, 1], 1 for identical windows.
pub fn devia(s: KdjSlice, t: KdjSlice) -> f64 {
    if s.is_empty() || s.len() != t.len() {
        return NO_MATCH;
    }

    let cc = (K_WEIGHT * correlation(s.k, t.k)
        + D_WEIGHT * correlation(s.d, t.d)
        + J_WEIGHT * correlation(s.j, t.j))
        / (K_WEIGHT + D_WEIGHT + J_WEIGHT);

    let spread = [
        diff_spread(s.k, t.k),
        diff_spread(s.d, t.d),
        diff_spread(s.j, t.j),
    ]
    .iter()
    .mean();

    cc - DEVIATION_SCALE * spread.powf(std::f64::consts::E)
}

/// Best DEVIA over every alignment of the shorter window inside the longer one.
pub fn best_devia(s: KdjSlice, t: KdjSlice) -> f64 {
    best_devia_with(s, t, devia)
}

/// Sliding search with a pluggable kernel.
///
/// Evaluates `|len(s) - len(t)| + 1` offsets and keeps the maximum.
pub fn best_devia_with<F>(s: KdjSlice, t: KdjSlice, mut kernel: F) -> f64
where
    F: FnMut(KdjSlice, KdjSlice) -> f64,
{
    if s.len() == t.len() {
        return kernel(s, t);
    }

    let (long, short, short_is_s) = if s.len() > t.len() {
        (s, t, false)
    } else {
        (t, s, true)
    };

    let dif = long.len() - short.len();
    let mut best = f64::NEG_INFINITY;
    for offset in 0..=dif {
        let part = long.window(offset, short.len());
        let cc = if short_is_s {
            kernel(short, part)
        } else {
            kernel(part, short)
        };
        if cc > best {
            best = cc;
        }
    }
    best
}

fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let sa = a.iter().population_std_dev();
    let sb = b.iter().population_std_dev();
    if sa <= f64::EPSILON || sb <= f64::EPSILON {
        return if a == b { 1.0 } else { 0.0 };
    }
    let cov = a.iter().population_covariance(b.iter());
    (cov / (sa * sb)).clamp(-1.0, 1.0)
}

fn diff_spread(a: &[f64], b: &[f64]) -> f64 {
    let diffs: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    diffs.iter().population_std_dev()
}
