use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One KDJ reading of a security, ordered by `seq` within its period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    pub code: String,
    pub date: NaiveDate,
    pub seq: i64,
    pub k: f64,
    pub d: f64,
    pub j: f64,
}

/// K/D/J arrays of equal length.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KdjWindow {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
    pub j: Vec<f64>,
}

impl KdjWindow {
    pub fn new(k: Vec<f64>, d: Vec<f64>, j: Vec<f64>) -> Self {
        debug_assert!(k.len() == d.len() && d.len() == j.len());
        Self { k, d, j }
    }

    pub fn from_points(points: &[IndicatorPoint]) -> Self {
        Self {
            k: points.iter().map(|p| p.k).collect(),
            d: points.iter().map(|p| p.d).collect(),
            j: points.iter().map(|p| p.j).collect(),
        }
    }

    pub fn push(&mut self, k: f64, d: f64, j: f64) {
        self.k.push(k);
        self.d.push(d);
        self.j.push(j);
    }

    pub fn len(&self) -> usize {
        self.k.len()
    }

    pub fn is_empty(&self) -> bool {
        self.k.is_empty()
    }

    pub fn as_slice(&self) -> KdjSlice<'_> {
        KdjSlice {
            k: &self.k,
            d: &self.d,
            j: &self.j,
        }
    }
}

/// Borrowed view over a `KdjWindow`, cheap to re-slice during alignment.
#[derive(Debug, Clone, Copy)]
pub struct KdjSlice<'a> {
    pub k: &'a [f64],
    pub d: &'a [f64],
    pub j: &'a [f64],
}

impl<'a> KdjSlice<'a> {
    pub fn len(&self) -> usize {
        self.k.len()
    }

    pub fn is_empty(&self) -> bool {
        self.k.is_empty()
    }

    /// Sub-window `[start, start + len)`.
    pub fn window(&self, start: usize, len: usize) -> KdjSlice<'a> {
        let end = start + len;
        KdjSlice {
            k: &self.k[start..end],
            d: &self.d[start..end],
            j: &self.j[start..end],
        }
    }
}

/// Trim a history to the segment since J last crossed D.
///
/// The point just before the sign change of `J - D` is kept as the first
/// element. Without any cross the whole history is returned.
pub fn last_jd_cross(points: &[IndicatorPoint]) -> &[IndicatorPoint] {
    for i in (1..points.len()).rev() {
        let now = points[i].j - points[i].d >= 0.0;
        let before = points[i - 1].j - points[i - 1].d >= 0.0;
        if now != before {
            return &points[i - 1..];
        }
    }
    points
}

/// The window being scored, with the identity needed to skip self-matches.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    pub code: String,
    pub start_seq: Option<i64>,
    pub window: KdjWindow,
}

impl Probe {
    pub fn from_points(code: &str, points: &[IndicatorPoint]) -> Self {
        Self {
            code: code.to_string(),
            start_seq: points.first().map(|p| p.seq),
            window: KdjWindow::from_points(points),
        }
    }

    /// Probe from a bare window, as received over RPC.
    pub fn anonymous(window: KdjWindow) -> Self {
        Self {
            code: String::new(),
            start_seq: None,
            window,
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}
