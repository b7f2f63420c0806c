use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use super::result::{FieldHolder, Item, Profile, ScoreResult};
use super::Scorer;
use crate::core::composite::score_assessments;
use crate::core::{devia_pruned, devia_raw, PeriodAssessment};
use crate::dispatch::{run_pool, BatchBackend, Dispatcher};
use crate::error::ScoreError;
use crate::models::{last_jd_cross, PeriodType, Probe, ScoringStat, Side};
use crate::provider::{
    pruned_references, raw_references, FeatureLibrary, IndicatorHistory, StatsStore,
};
use crate::rpc::{fetch_scores, ProbeSeries, ScoreReply, ScoreRequest, ScoringCluster};

pub const ASPECT_ID: &str = "KDJV";
pub const FIELDS: [&str; 8] = ["DOD", "SFL", "BMEAN", "SMEAN", "LEN", "KDJ_DY", "KDJ_WK", "KDJ_MO"];

/// Indicator points fetched per period before trimming to the last J/D cross.
pub const INDICATOR_LOOKBACK: usize = 100;

/// Report fields of one security's KDJV assessment.
#[derive(Debug, Clone, Default)]
pub struct KdjvProfile {
    pub code: String,
    pub name: String,
    /// Degree of distinction from the stats table
    pub dod: f64,
    /// Safe line: the highest historical sell score
    pub sfl: f64,
    pub bmean: f64,
    pub smean: f64,
    pub len: String,
    pub kdj_dy: String,
    pub kdj_wk: String,
    pub kdj_mo: String,
}

impl KdjvProfile {
    pub fn new(code: &str, name: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn apply_stats(&mut self, stat: &ScoringStat) {
        self.sfl = stat.sell_high;
        self.bmean = stat.buy_mean;
        self.smean = stat.sell_mean;
        self.dod = stat.degree_of_distinction;
    }

    pub fn apply_assessment(&mut self, a: &Assessment) {
        self.kdj_dy = a.day.summary();
        self.kdj_wk = a.week.summary();
        self.kdj_mo = a.month.summary();
    }
}

type FieldFormatter = fn(&KdjvProfile) -> String;

fn fmt_dod(p: &KdjvProfile) -> String {
    format!("{:.2}", p.dod)
}

fn fmt_sfl(p: &KdjvProfile) -> String {
    format!("{:.2}", p.sfl)
}

fn fmt_bmean(p: &KdjvProfile) -> String {
    format!("{:.2}", p.bmean)
}

fn fmt_smean(p: &KdjvProfile) -> String {
    format!("{:.2}", p.smean)
}

fn fmt_len(p: &KdjvProfile) -> String {
    p.len.clone()
}

fn fmt_kdj_dy(p: &KdjvProfile) -> String {
    p.kdj_dy.clone()
}

fn fmt_kdj_wk(p: &KdjvProfile) -> String {
    p.kdj_wk.clone()
}

fn fmt_kdj_mo(p: &KdjvProfile) -> String {
    p.kdj_mo.clone()
}

static FIELD_TABLE: [(&str, FieldFormatter); 8] = [
    ("DOD", fmt_dod),
    ("SFL", fmt_sfl),
    ("BMEAN", fmt_bmean),
    ("SMEAN", fmt_smean),
    ("LEN", fmt_len),
    ("KDJ_DY", fmt_kdj_dy),
    ("KDJ_WK", fmt_kdj_wk),
    ("KDJ_MO", fmt_kdj_mo),
];

impl FieldHolder for KdjvProfile {
    fn field_str(&self, name: &str) -> Result<String, ScoreError> {
        FIELD_TABLE
            .iter()
            .find(|(tag, _)| *tag == name)
            .map(|(_, f)| f(self))
            .ok_or_else(|| ScoreError::UnknownField {
                aspect: ASPECT_ID.to_string(),
                field: name.to_string(),
            })
    }
}

/// Day, week and month probes of one security at one date.
#[derive(Debug, Clone, Default)]
pub struct ProbeSet {
    pub day: Probe,
    pub week: Probe,
    pub month: Probe,
}

impl ProbeSet {
    pub fn get(&self, period: PeriodType) -> &Probe {
        match period {
            PeriodType::Day => &self.day,
            PeriodType::Week => &self.week,
            PeriodType::Month => &self.month,
        }
    }

    /// `"dy/wk/mo"` window lengths.
    pub fn lens(&self) -> String {
        format!("{}/{}/{}", self.day.len(), self.week.len(), self.month.len())
    }

    pub fn to_series(&self, row_id: String) -> ProbeSeries {
        ProbeSeries {
            row_id,
            kdj_dy: self.day.window.clone(),
            kdj_wk: self.week.window.clone(),
            kdj_mo: self.month.window.clone(),
        }
    }

    pub fn from_series(series: &ProbeSeries) -> Self {
        Self {
            day: Probe::anonymous(series.kdj_dy.clone()),
            week: Probe::anonymous(series.kdj_wk.clone()),
            month: Probe::anonymous(series.kdj_mo.clone()),
        }
    }
}

/// Fetch the trailing indicator history of every period and trim each to its last J/D cross.
pub async fn load_probes(
    history: &dyn IndicatorHistory,
    code: &str,
    as_of: Option<NaiveDate>,
) -> Result<ProbeSet> {
    let mut set = ProbeSet::default();
    for period in PeriodType::ALL {
        let points = history
            .indicator_history(code, period, INDICATOR_LOOKBACK, as_of)
            .await?;
        let probe = Probe::from_points(code, last_jd_cross(&points));
        match period {
            PeriodType::Day => set.day = probe,
            PeriodType::Week => set.week = probe,
            PeriodType::Month => set.month = probe,
        }
    }
    Ok(set)
}

/// Assessments of all three periods.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub day: PeriodAssessment,
    pub week: PeriodAssessment,
    pub month: PeriodAssessment,
}

impl Assessment {
    pub fn score(&self) -> f64 {
        score_assessments(&self.day, &self.week, &self.month)
    }

    pub fn to_detail(&self) -> HashMap<String, f64> {
        let mut detail = HashMap::with_capacity(24);
        self.day.to_detail(&mut detail);
        self.week.to_detail(&mut detail);
        self.month.to_detail(&mut detail);
        detail
    }

    pub fn from_detail(detail: &HashMap<String, f64>) -> Self {
        Self {
            day: PeriodAssessment::from_detail(PeriodType::Day, detail),
            week: PeriodAssessment::from_detail(PeriodType::Week, detail),
            month: PeriodAssessment::from_detail(PeriodType::Month, detail),
        }
    }
}

/// In-process KDJV computation against the feature library.
pub struct KdjvEngine {
    features: Arc<dyn FeatureLibrary>,
    use_raw: bool,
}

impl KdjvEngine {
    pub fn new(features: Arc<dyn FeatureLibrary>, use_raw: bool) -> Self {
        Self { features, use_raw }
    }

    /// Buy and sell DEVIA of one probe. `as_of` ages raw samples.
    pub async fn assess(
        &self,
        period: PeriodType,
        probe: &Probe,
        as_of: NaiveDate,
    ) -> Result<PeriodAssessment> {
        let n = probe.len();
        let lib = self.features.as_ref();
        let (buy, sell) = if self.use_raw {
            let buys = raw_references(lib, period, Side::Buy, n).await?;
            let sells = raw_references(lib, period, Side::Sell, n).await?;
            (devia_raw(probe, &buys, as_of), devia_raw(probe, &sells, as_of))
        } else {
            let buys = pruned_references(lib, period, Side::Buy, n).await?;
            let sells = pruned_references(lib, period, Side::Sell, n).await?;
            (devia_pruned(probe, &buys), devia_pruned(probe, &sells))
        };
        Ok(PeriodAssessment::new(period, buy, sell))
    }

    pub async fn assess_all(&self, probes: &ProbeSet, as_of: NaiveDate) -> Result<Assessment> {
        Ok(Assessment {
            day: self.assess(PeriodType::Day, &probes.day, as_of).await?,
            week: self.assess(PeriodType::Week, &probes.week, as_of).await?,
            month: self.assess(PeriodType::Month, &probes.month, as_of).await?,
        })
    }

    /// Serve a remote scoring request.
    pub async fn answer(&self, req: &ScoreRequest) -> Result<ScoreReply> {
        let today = Utc::now().date_naive();
        let mut rep = ScoreReply::default();
        for series in &req.series {
            let a = self.assess_all(&ProbeSet::from_series(series), today).await?;
            rep.row_ids.push(series.row_id.clone());
            rep.scores.push(a.score());
            rep.detail.push(a.to_detail());
        }
        Ok(rep)
    }
}

/// One security flowing through the worker pool.
#[derive(Debug)]
pub struct KdjvUnit {
    pub seq: usize,
    pub profile: KdjvProfile,
    pub score: f64,
    pub empty_periods: Vec<PeriodType>,
}

impl KdjvUnit {
    fn new(seq: usize, code: &str, name: &str) -> Self {
        Self {
            seq,
            profile: KdjvProfile::new(code, name),
            score: 0.0,
            empty_periods: Vec::new(),
        }
    }

    fn into_item(self) -> Item {
        let mut item = Item::new(&self.profile.code, &self.profile.name);
        item.score = self.score;
        for p in &self.empty_periods {
            item.cmtf(format_args!("no {} KDJ history", p));
        }
        item.profiles.insert(
            ASPECT_ID.to_string(),
            Profile {
                score: self.score,
                fields: Arc::new(self.profile),
            },
        );
        item
    }
}

struct KdjvBackend {
    history: Arc<dyn IndicatorHistory>,
    stats: Arc<dyn StatsStore>,
    engine: Arc<KdjvEngine>,
    cluster: Arc<dyn ScoringCluster>,
}

impl KdjvBackend {
    async fn prepare(&self, unit: &mut KdjvUnit) -> Result<ProbeSet> {
        let code = unit.profile.code.clone();
        let probes = load_probes(self.history.as_ref(), &code, None).await?;
        unit.profile.len = probes.lens();
        unit.empty_periods = PeriodType::ALL
            .into_iter()
            .filter(|p| probes.get(*p).is_empty())
            .collect();
        if let Some(stat) = self.stats.get_stats(&code).await? {
            unit.profile.apply_stats(&stat);
        }
        Ok(probes)
    }
}

#[async_trait]
impl BatchBackend for KdjvBackend {
    type Unit = KdjvUnit;

    fn label(&self, unit: &KdjvUnit) -> String {
        unit.profile.code.clone()
    }

    async fn local(&self, unit: &mut KdjvUnit) -> Result<()> {
        let start = Instant::now();
        let probes = self.prepare(unit).await?;
        let a = self.engine.assess_all(&probes, Utc::now().date_naive()).await?;
        unit.score = a.score();
        unit.profile.apply_assessment(&a);
        debug!(
            "{} {} kdjv: {:.2}, time: {:.2}",
            unit.profile.code,
            unit.profile.name,
            unit.score,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    async fn remote(&self, units: &mut [KdjvUnit]) -> Result<()> {
        let start = Instant::now();
        let mut series = Vec::with_capacity(units.len());
        let mut by_row: HashMap<String, usize> = HashMap::with_capacity(units.len());
        for (i, unit) in units.iter_mut().enumerate() {
            let probes = self.prepare(unit).await?;
            let row_id = format!("{}:{}", unit.profile.code, Uuid::new_v4());
            by_row.insert(row_id.clone(), i);
            series.push(probes.to_series(row_id));
        }

        let rep = fetch_scores(self.cluster.as_ref(), &ScoreRequest::new(series)).await?;
        let empty = HashMap::new();
        for (i, row_id) in rep.row_ids.iter().enumerate() {
            let Some(&idx) = by_row.get(row_id) else {
                continue;
            };
            let unit = &mut units[idx];
            unit.score = rep.scores[i];
            let detail = rep.detail.get(i).unwrap_or(&empty);
            unit.profile.apply_assessment(&Assessment::from_detail(detail));
        }

        let secs = start.elapsed().as_secs_f64();
        debug!(
            "{} kdj scores calculated using rpc service, time: {:.2}, {:.2}/stk",
            units.len(),
            secs,
            secs / units.len().max(1) as f64
        );
        Ok(())
    }
}

/// Ranks securities by how closely their current KDJ form matches historical buy setups.
pub struct KdjvScorer {
    history: Arc<dyn IndicatorHistory>,
    stats: Arc<dyn StatsStore>,
    features: Arc<dyn FeatureLibrary>,
    engine: Arc<KdjvEngine>,
    cluster: Arc<dyn ScoringCluster>,
    dispatcher: Arc<Dispatcher>,
}

impl KdjvScorer {
    pub fn new(
        history: Arc<dyn IndicatorHistory>,
        stats: Arc<dyn StatsStore>,
        features: Arc<dyn FeatureLibrary>,
        cluster: Arc<dyn ScoringCluster>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        // ranking always scores against the pruned library
        let engine = Arc::new(KdjvEngine::new(features.clone(), false));
        Self {
            history,
            stats,
            features,
            engine,
            cluster,
            dispatcher,
        }
    }

    /// Publish the pruned feature library to the scoring cluster.
    pub async fn sync_features(&self) -> Result<bool> {
        let start = Instant::now();
        let all = self.features.all_pruned().await?;
        debug!("publishing {} kdj feature vectors", all.len());
        let ok = self.cluster.sync_features(&all).await?;
        info!(
            "{} KDJ feature vectors {} in {:.2}s",
            all.len(),
            if ok { "published" } else { "failed to publish" },
            start.elapsed().as_secs_f64()
        );
        Ok(ok)
    }
}

#[async_trait]
impl Scorer for KdjvScorer {
    fn id(&self) -> &'static str {
        ASPECT_ID
    }

    fn fields(&self) -> &'static [&'static str] {
        &FIELDS
    }

    fn description(&self) -> &'static str {
        "Medium to long term: current KDJ form against historical buy and sell setups"
    }

    async fn get(&self, codes: &[String], limit: isize, ranked: bool) -> Result<ScoreResult> {
        let securities = self.history.securities(codes).await?;
        info!("Scoring {} securities on {}", securities.len(), ASPECT_ID);

        let units: Vec<KdjvUnit> = securities
            .iter()
            .enumerate()
            .map(|(i, s)| KdjvUnit::new(i, &s.code, &s.name))
            .collect();

        let backend = Arc::new(KdjvBackend {
            history: self.history.clone(),
            stats: self.stats.clone(),
            engine: self.engine.clone(),
            cluster: self.cluster.clone(),
        });
        let total = units.len();
        let report = run_pool(backend, self.dispatcher.clone(), units).await;
        if report.remote_failed > 0 {
            return Err(ScoreError::RemoteFailed {
                failed: report.remote_failed,
                total,
            }
            .into());
        }
        let mut done = report.done;
        done.sort_by_key(|u| u.seq);

        let mut r = ScoreResult::new(ASPECT_ID);
        for unit in done {
            r.add_item(unit.into_item());
        }
        r.set_fields(ASPECT_ID, &FIELDS);
        if ranked {
            r.sort();
        }
        r.shrink(limit);
        Ok(r)
    }
}
