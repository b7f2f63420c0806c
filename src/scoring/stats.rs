use anyhow::Result;
use chrono::{NaiveDate, Utc};
use statrs::statistics::Statistics;
use std::f64::consts::{E, PI};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::kdjv::{load_probes, KdjvEngine};
use crate::dispatch::Dispatcher;
use crate::error::ScoreError;
use crate::models::{PriceBar, ScoringStat, Security, Side};
use crate::provider::{IndicatorHistory, StatsStore};
use crate::rpc::{fetch_scores, ScoreRequest, ScoringCluster};

/// Minimum rise (buy) or fall (sell), in percent, for a bar to count as an event.
pub const EXPECTED_VALUE: f64 = 5.0;
/// Retrace, in percent, that ends the walk from an event bar.
pub const MAX_RETRACE: f64 = 2.0;
/// Consecutive adverse bars tolerated during the walk.
pub const MAX_HOLD: usize = 3;
/// Daily bars replayed per security.
pub const RETRO_WINDOW: usize = 600;

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Bars that started a rise of at least `EXPECTED_VALUE` percent.
pub fn scan_buy_events(bars: &[PriceBar]) -> Vec<usize> {
    scan_events(bars, Side::Buy)
}

/// Bars that started a fall of at least `EXPECTED_VALUE` percent.
pub fn scan_sell_events(bars: &[PriceBar]) -> Vec<usize> {
    scan_events(bars, Side::Sell)
}

fn scan_events(bars: &[PriceBar], side: Side) -> Vec<usize> {
    let n = bars.len();
    let close = |i: usize| bars[i].close;
    let mut events = Vec::new();

    let mut i = 1;
    while i + 1 < n {
        let start = close(i);
        let moving = match side {
            Side::Buy => start < close(i + 1),
            Side::Sell => start > close(i + 1),
        };
        if !moving {
            i += 1;
            continue;
        }

        // running extreme of the move and the offset it was reached at
        let mut extreme = match side {
            Side::Buy => f64::NEG_INFINITY,
            Side::Sell => f64::INFINITY,
        };
        let mut span = 0;
        let mut prev = close(i - 1);
        let mut patience = 0;
        let mut j = 0;
        while i + j < n {
            let c = close(i + j);
            let (extends, adverse) = match side {
                Side::Buy => (c > extreme, prev >= c),
                Side::Sell => (c < extreme, prev <= c),
            };
            if extends {
                extreme = c;
                span = j;
            }
            if adverse {
                let retrace = match side {
                    Side::Buy => (extreme - c) / extreme.abs() * 100.0,
                    Side::Sell => (c - extreme) / extreme.abs() * 100.0,
                };
                if retrace >= MAX_RETRACE || patience > MAX_HOLD {
                    break;
                }
                if j > 0 {
                    patience += 1;
                }
            } else {
                patience = 0;
            }
            prev = c;
            j += 1;
        }

        let (mut s, mut x) = (start, extreme);
        if s == 0.0 {
            match side {
                Side::Buy => {
                    s = 0.01;
                    x += 0.01;
                }
                Side::Sell => {
                    s = -0.01;
                    x -= 0.01;
                }
            }
        }
        let mark = (x - s) / s.abs() * 100.0;
        let hit = match side {
            Side::Buy => mark >= EXPECTED_VALUE,
            Side::Sell => mark <= -EXPECTED_VALUE,
        };
        if hit {
            events.push(i);
        }
        i += span + 1;
    }
    events
}

/// Separation between the buy and sell score distributions, in [.., 100].
///
/// `bor` and `sor` are the overlap ratios of each side.
pub fn degree_of_distinction(bor: f64, sor: f64) -> f64 {
    let dor = (bor - sor).abs();
    let x = if bor >= sor { bor } else { sor };
    let mut dod = 100.0 * (1.0 - (dor - 1.0).powi(2));
    dod += 100.0 * (1.0 - E * PI * x.powf(PI / 2.0)).max(0.0);
    round2(dod.min(100.0))
}

/// Distribution statistics of one security's event scores.
pub fn summarize(
    code: &str,
    from_date: NaiveDate,
    to_date: NaiveDate,
    mut buys: Vec<f64>,
    mut sells: Vec<f64>,
) -> ScoringStat {
    buys.sort_by(|a, b| a.total_cmp(b));
    sells.sort_by(|a, b| a.total_cmp(b));

    let low = |v: &[f64]| v.first().copied().map(round2).unwrap_or(0.0);
    let high = |v: &[f64]| v.last().copied().map(round2).unwrap_or(0.0);
    let mean = |v: &[f64]| if v.is_empty() { 0.0 } else { round2(v.iter().mean()) };

    let mut stat = ScoringStat {
        code: code.to_string(),
        from_date,
        to_date,
        buy_low: low(&buys),
        buy_high: high(&buys),
        sell_low: low(&sells),
        sell_high: high(&sells),
        buy_mean: mean(&buys),
        sell_mean: mean(&sells),
        buy_count: buys.len(),
        sell_count: sells.len(),
        buy_overlap_ratio: 0.0,
        sell_overlap_ratio: 0.0,
        degree_of_distinction: 100.0,
        updated_at: Utc::now(),
    };

    if !buys.is_empty() && !sells.is_empty() && stat.sell_high >= stat.buy_low {
        let boc = buys.iter().take_while(|&&b| b <= stat.sell_high).count();
        let soc = sells.iter().rev().take_while(|&&s| s >= stat.buy_low).count();
        stat.buy_overlap_ratio = round2(boc as f64 / buys.len() as f64);
        stat.sell_overlap_ratio = round2(soc as f64 / sells.len() as f64);
        stat.degree_of_distinction =
            degree_of_distinction(stat.buy_overlap_ratio, stat.sell_overlap_ratio);
    }
    stat
}

/// Totals of one renewal run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewSummary {
    pub total: usize,
    pub written: usize,
    pub skipped: usize,
}

/// Replays price history to rebuild the per-security scoring statistics.
#[derive(Clone)]
pub struct StatsRenewal {
    history: Arc<dyn IndicatorHistory>,
    stats: Arc<dyn StatsStore>,
    engine: Arc<KdjvEngine>,
    cluster: Arc<dyn ScoringCluster>,
    dispatcher: Arc<Dispatcher>,
}

impl StatsRenewal {
    pub fn new(
        history: Arc<dyn IndicatorHistory>,
        stats: Arc<dyn StatsStore>,
        engine: Arc<KdjvEngine>,
        cluster: Arc<dyn ScoringCluster>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            history,
            stats,
            engine,
            cluster,
            dispatcher,
        }
    }

    /// Renew stats for `codes`, or for every security when empty.
    ///
    /// One task per security runs up to the parallel level; a single
    /// aggregator task performs every store write.
    pub async fn renew(&self, codes: &[String]) -> Result<RenewSummary> {
        let securities = self.history.securities(codes).await?;
        let total = securities.len();
        let level = self.dispatcher.parallel_level().await;
        let started = Instant::now();
        info!("Renewing KDJV stats of {} securities, parallel level {}", total, level);

        let (tx, mut rx) = mpsc::channel::<Option<ScoringStat>>(level);
        let store = self.stats.clone();
        let aggregator = tokio::spawn(async move {
            let mut summary = RenewSummary {
                total,
                ..Default::default()
            };
            let mut seen = 0usize;
            while let Some(msg) = rx.recv().await {
                seen += 1;
                match msg {
                    Some(stat) => match store.upsert_stats(stat).await {
                        Ok(()) => summary.written += 1,
                        Err(e) => {
                            error!("failed to save kdjv stats: {:#}", e);
                            summary.skipped += 1;
                        }
                    },
                    None => summary.skipped += 1,
                }
                info!(
                    "KDJ stats renew progress: {}/{}, {:.2}%",
                    seen,
                    total,
                    100.0 * seen as f64 / total.max(1) as f64
                );
            }
            summary
        });

        let permits = Arc::new(Semaphore::new(level));
        let mut tasks = JoinSet::new();
        for sec in securities {
            let permit = permits.clone().acquire_owned().await?;
            let job = self.clone();
            let tx = tx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let msg = match job.renew_one(&sec).await {
                    Ok(stat) => Some(stat),
                    Err(e) => {
                        warn!("{}: {:#}", sec.code, e);
                        None
                    }
                };
                let _ = tx.send(msg).await;
            });
        }
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!("renewal task panicked: {}", e);
            }
        }
        drop(tx);

        let summary = aggregator.await?;
        info!(
            "KDJ stats renewed: {} written, {} skipped in {:.1}s",
            summary.written,
            summary.skipped,
            started.elapsed().as_secs_f64()
        );
        Ok(summary)
    }

    /// Stats of one security. Short history is an error the caller skips.
    pub async fn renew_one(&self, sec: &Security) -> Result<ScoringStat> {
        let start = Instant::now();
        let code = sec.code.as_str();
        let bars = self.history.daily_bars(code, RETRO_WINDOW).await?;
        if bars.len() < RETRO_WINDOW {
            return Err(ScoreError::InsufficientHistory {
                code: code.to_string(),
                got: bars.len(),
                want: RETRO_WINDOW,
            }
            .into());
        }
        let from_date = bars[0].date;
        let to_date = bars[bars.len() - 1].date;

        let buy_events = scan_buy_events(&bars);
        let sell_events = scan_sell_events(&bars);
        debug!(
            "{} kdj events: {} buy, {} sell",
            code,
            buy_events.len(),
            sell_events.len()
        );

        let (bars, buy_events, sell_events) = (&bars[..], &buy_events[..], &sell_events[..]);
        let (buys, sells) = self
            .dispatcher
            .run(
                code,
                move || async move {
                    Ok((
                        self.score_local(code, bars, buy_events).await?,
                        self.score_local(code, bars, sell_events).await?,
                    ))
                },
                move || async move {
                    Ok((
                        self.score_remote(code, bars, buy_events, Side::Buy).await?,
                        self.score_remote(code, bars, sell_events, Side::Sell).await?,
                    ))
                },
            )
            .await?;

        let stat = summarize(code, from_date, to_date, buys, sells);
        debug!(
            "{} kdjv DOD: {:.2}, time: {:.2}",
            code,
            stat.degree_of_distinction,
            start.elapsed().as_secs_f64()
        );
        Ok(stat)
    }

    async fn score_local(&self, code: &str, bars: &[PriceBar], events: &[usize]) -> Result<Vec<f64>> {
        let mut scores = Vec::with_capacity(events.len());
        for &i in events {
            let date = bars[i].date;
            let probes = load_probes(self.history.as_ref(), code, Some(date)).await?;
            scores.push(self.engine.assess_all(&probes, date).await?.score());
        }
        Ok(scores)
    }

    async fn score_remote(
        &self,
        code: &str,
        bars: &[PriceBar],
        events: &[usize],
        side: Side,
    ) -> Result<Vec<f64>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let mut series = Vec::with_capacity(events.len());
        for &i in events {
            let probes = load_probes(self.history.as_ref(), code, Some(bars[i].date)).await?;
            let row_id = format!(
                "{}-{}-{}-{}-{}",
                side.as_str().to_uppercase(),
                probes.day.len(),
                probes.week.len(),
                probes.month.len(),
                Uuid::new_v4()
            );
            series.push(probes.to_series(row_id));
        }
        let rep = fetch_scores(self.cluster.as_ref(), &ScoreRequest::new(series)).await?;
        Ok(rep.scores)
    }
}
