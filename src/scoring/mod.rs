pub mod kdjv;
pub mod result;
pub mod stats;

pub use kdjv::{KdjvEngine, KdjvScorer};
pub use result::{FieldHolder, Item, Profile, ScoreResult};
pub use stats::StatsRenewal;

use anyhow::Result;
use async_trait::async_trait;

/// One scoring aspect over a set of securities.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn id(&self) -> &'static str;
    fn fields(&self) -> &'static [&'static str];
    fn description(&self) -> &'static str;

    /// Score `codes` (all securities when empty), optionally ranked, keeping
    /// at most `limit` items when `limit` is non-negative.
    async fn get(&self, codes: &[String], limit: isize, ranked: bool) -> Result<ScoreResult>;

    async fn get_all(&self) -> Result<ScoreResult> {
        self.get(&[], -1, false).await
    }
}
