use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{ClusterHealth, ScoreReply, ScoreRequest, ScoringCluster, SCORE_METHOD, SYNC_METHOD};
use crate::config::Config;
use crate::models::FeatureVector;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncReply {
    pub accepted: bool,
}

/// JSON-over-HTTP client for a pool of scoring servers.
///
/// Calls go round-robin over the servers that answered the last health
/// check, each retried up to `retry` times with no backoff.
pub struct HttpCluster {
    client: Client,
    servers: Vec<String>,
    retry: usize,
    next: AtomicUsize,
    available: RwLock<Option<Vec<String>>>,
}

impl HttpCluster {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.rpc_timeout_secs))
            .build()
            .context("Failed to build RPC client")?;
        Ok(Self {
            client,
            servers: cfg.rpc_servers.clone(),
            retry: cfg.rpc_retry.max(1),
            next: AtomicUsize::new(0),
            available: RwLock::new(None),
        })
    }

    async fn refresh_health(&self) -> Vec<String> {
        let mut set = JoinSet::new();
        for (i, server) in self.servers.iter().enumerate() {
            let client = self.client.clone();
            let url = format!("{}/health", server);
            set.spawn(async move {
                let ok = client
                    .get(&url)
                    .timeout(HEALTH_TIMEOUT)
                    .send()
                    .await
                    .map(|r| r.status().is_success())
                    .unwrap_or(false);
                (i, ok)
            });
        }

        let mut up = vec![false; self.servers.len()];
        while let Some(res) = set.join_next().await {
            match res {
                Ok((i, ok)) => up[i] = ok,
                Err(e) => warn!("health probe task failed: {}", e),
            }
        }

        let available: Vec<String> = self
            .servers
            .iter()
            .zip(up)
            .filter(|(_, ok)| *ok)
            .map(|(s, _)| s.clone())
            .collect();
        debug!("{}/{} RPC servers available", available.len(), self.servers.len());
        *self.available.write().await = Some(available.clone());
        available
    }

    async fn live_servers(&self) -> Vec<String> {
        if let Some(cached) = self.available.read().await.as_ref() {
            return cached.clone();
        }
        self.refresh_health().await
    }

    async fn post<B, R>(&self, server: &str, method: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let resp = self
            .client
            .post(format!("{}/rpc/{}", server, method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to call {} on {}", method, server))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("{} error {} from {}: {}", method, status, server, text);
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse {} reply from {}", method, server))
    }
}

#[async_trait]
impl ScoringCluster for HttpCluster {
    async fn score(&self, req: &ScoreRequest) -> Result<ScoreReply> {
        let servers = self.live_servers().await;
        if servers.is_empty() {
            bail!("no RPC server available");
        }

        let mut last_err = None;
        for attempt in 1..=self.retry {
            let idx = self.next.fetch_add(1, Ordering::Relaxed) % servers.len();
            let server = &servers[idx];
            match self.post::<_, ScoreReply>(server, SCORE_METHOD, req).await {
                Ok(rep) => return Ok(rep),
                Err(e) => {
                    warn!(
                        "{} attempt {}/{} failed for {} series: {:#}",
                        SCORE_METHOD,
                        attempt,
                        self.retry,
                        req.series.len(),
                        e
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} not attempted", SCORE_METHOD)))
    }

    async fn sync_features(&self, features: &[FeatureVector]) -> Result<bool> {
        let servers = self.refresh_health().await;
        if servers.is_empty() {
            warn!("no RPC server available, feature data not published");
            return Ok(false);
        }

        let mut all_ok = true;
        for server in &servers {
            let mut accepted = false;
            for attempt in 1..=self.retry {
                match self.post::<_, SyncReply>(server, SYNC_METHOD, features).await {
                    Ok(rep) if rep.accepted => {
                        accepted = true;
                        break;
                    }
                    Ok(_) => warn!("{} rejected feature data (attempt {})", server, attempt),
                    Err(e) => warn!("{} attempt {} on {} failed: {:#}", SYNC_METHOD, attempt, server, e),
                }
            }
            if accepted {
                info!("Published {} feature vectors to {}", features.len(), server);
            } else {
                error!("Failed to publish feature data to {}", server);
                all_ok = false;
            }
        }
        Ok(all_ok)
    }
}

#[async_trait]
impl ClusterHealth for HttpCluster {
    async fn available_servers(&self, refresh: bool) -> (usize, f64) {
        if self.servers.is_empty() {
            return (0, 0.0);
        }
        let live = if refresh {
            self.refresh_health().await
        } else {
            self.live_servers().await
        };
        (live.len(), live.len() as f64 / self.servers.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_config;

    #[tokio::test]
    async fn empty_pool_reports_no_servers() {
        let cluster = HttpCluster::new(&test_config()).unwrap();
        assert_eq!(cluster.available_servers(true).await, (0, 0.0));
        assert!(cluster.score(&ScoreRequest::new(Vec::new())).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_server_is_not_available() {
        let mut cfg = test_config();
        cfg.rpc_servers = vec!["http://127.0.0.1:9".to_string()];
        let cluster = HttpCluster::new(&cfg).unwrap();
        let (n, frac) = cluster.available_servers(true).await;
        assert_eq!(n, 0);
        assert_eq!(frac, 0.0);
        assert!(!cluster.sync_features(&[]).await.unwrap());
    }
}
