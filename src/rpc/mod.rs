pub mod cpu;
pub mod http;

pub use cpu::{CpuMonitor, ProcStatCpu};
pub use http::HttpCluster;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::ScoreError;
use crate::models::{FeatureVector, KdjWindow, PeriodType};

pub const SCORE_METHOD: &str = "IndcScorer.ScoreKdj";
pub const SYNC_METHOD: &str = "DataSync.SyncKdjFd";

/// Probe windows of one unit of remote scoring work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeSeries {
    pub row_id: String,
    pub kdj_dy: KdjWindow,
    pub kdj_wk: KdjWindow,
    pub kdj_mo: KdjWindow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub series: Vec<ProbeSeries>,
    pub weight_day: f64,
    pub weight_week: f64,
    pub weight_month: f64,
}

impl ScoreRequest {
    pub fn new(series: Vec<ProbeSeries>) -> Self {
        Self {
            series,
            weight_day: PeriodType::Day.weight(),
            weight_week: PeriodType::Week.weight(),
            weight_month: PeriodType::Month.weight(),
        }
    }

    pub fn row_ids(&self) -> Vec<String> {
        self.series.iter().map(|s| s.row_id.clone()).collect()
    }
}

/// Parallel arrays: `scores[i]` and `detail[i]` belong to `row_ids[i]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreReply {
    pub row_ids: Vec<String>,
    pub scores: Vec<f64>,
    pub detail: Vec<HashMap<String, f64>>,
}

/// Check a reply covers exactly the requested row ids, in any order.
pub fn verify_reply(req: &ScoreRequest, rep: &ScoreReply) -> Result<(), ScoreError> {
    if rep.scores.len() != rep.row_ids.len() {
        return Err(ScoreError::ReplyLength {
            scores: rep.scores.len(),
            row_ids: rep.row_ids.len(),
        });
    }

    let requested: HashSet<&str> = req.series.iter().map(|s| s.row_id.as_str()).collect();
    let replied: HashSet<&str> = rep.row_ids.iter().map(|s| s.as_str()).collect();
    if requested == replied && rep.row_ids.len() == req.series.len() {
        return Ok(());
    }

    let mut missing: Vec<String> = requested.difference(&replied).map(|s| s.to_string()).collect();
    let mut unexpected: Vec<String> = replied.difference(&requested).map(|s| s.to_string()).collect();
    missing.sort();
    unexpected.sort();
    Err(ScoreError::RowIdMismatch { missing, unexpected })
}

/// A pool of remote scoring services.
#[async_trait]
pub trait ScoringCluster: Send + Sync {
    /// One multi-item call. Retries are the implementation's concern.
    async fn score(&self, req: &ScoreRequest) -> Result<ScoreReply>;

    /// Publish the pruned feature library to every available server.
    /// Returns true only if all of them accepted it.
    async fn sync_features(&self, features: &[FeatureVector]) -> Result<bool>;
}

#[async_trait]
pub trait ClusterHealth: Send + Sync {
    /// Reachable server count and its fraction of the configured pool.
    async fn available_servers(&self, refresh: bool) -> (usize, f64);
}

/// Score a batch remotely and verify the reply before handing it back.
pub async fn fetch_scores(cluster: &dyn ScoringCluster, req: &ScoreRequest) -> Result<ScoreReply> {
    let rep = cluster.score(req).await?;
    verify_reply(req, &rep)?;
    Ok(rep)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(ids: &[&str]) -> ScoreRequest {
        ScoreRequest::new(
            ids.iter()
                .map(|id| ProbeSeries {
                    row_id: id.to_string(),
                    ..Default::default()
                })
                .collect(),
        )
    }

    fn reply(ids: &[&str]) -> ScoreReply {
        ScoreReply {
            row_ids: ids.iter().map(|s| s.to_string()).collect(),
            scores: vec![50.0; ids.len()],
            detail: vec![HashMap::new(); ids.len()],
        }
    }

    #[test]
    fn reply_order_does_not_matter() {
        let req = request(&["a", "b", "c"]);
        assert!(verify_reply(&req, &reply(&["c", "a", "b"])).is_ok());
    }

    #[test]
    fn id_mismatch_is_reported_both_ways() {
        let req = request(&["a", "b"]);
        let err = verify_reply(&req, &reply(&["a", "x"])).unwrap_err();
        match err {
            ScoreError::RowIdMismatch { missing, unexpected } => {
                assert_eq!(missing, vec!["b".to_string()]);
                assert_eq!(unexpected, vec!["x".to_string()]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn duplicate_ids_do_not_pass() {
        let req = request(&["a", "b"]);
        assert!(verify_reply(&req, &reply(&["a", "a", "b"])).is_err());
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let req = request(&["a"]);
        let mut rep = reply(&["a"]);
        rep.scores.push(1.0);
        assert!(matches!(
            verify_reply(&req, &rep),
            Err(ScoreError::ReplyLength { scores: 2, row_ids: 1 })
        ));
    }

    #[test]
    fn request_carries_period_weights() {
        let req = request(&["a"]);
        assert_eq!(req.weight_day + req.weight_week + req.weight_month, 100.0);
        assert_eq!(req.row_ids(), vec!["a".to_string()]);
    }
}
