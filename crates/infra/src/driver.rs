//! One reconciliation cycle over every active run.
//!
//! Runs are processed one at a time; a failing run is reported and skipped,
//! never rolled back. Baselines are re-derived from the audit trail on every
//! cycle, so a crash between posting and the next cycle loses nothing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use feedpost_core::{DomainError, FeederId, LotNo, MaterialCode, RunKey};
use feedpost_production::ProductionRun;
use feedpost_recipe::{resolve_feed_plan, FormulaKey, RecipeError};
use feedpost_reconcile::{
    reconcile_run, Baseline, BaselineSet, ConsumptionCycleResult, FeederOutcome, PostingKey,
    PostingOrigin, PostingRecord, ReconcileThresholds, RunFacts, SensorAnomaly,
};

use crate::boundary_service::{BoundaryError, BoundaryService};
use crate::config::{chrono_duration, EngineConfig};
use crate::ledger::Ledger;
use crate::metric::{MetricError, MetricStore};
use crate::notify::{Notice, Notifier};
use crate::posting::{PostingClient, PostingContext, PostingError, PostingFailure, PostingReport};
use crate::sampler::AccumulatorSampler;
use crate::store::{AuditStore, BoundaryStore, RecipeStore, RunStore, SheetStore, StoreError};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("run {0} already has a cycle in flight")]
    RunBusy(RunKey),

    #[error("no formula configured for {0}")]
    ConfigurationMissing(FormulaKey),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error(transparent)]
    Boundary(#[from] BoundaryError),

    #[error(transparent)]
    Posting(#[from] PostingError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<RecipeError> for CycleError {
    fn from(value: RecipeError) -> Self {
        match value {
            RecipeError::ConfigurationMissing(key) => CycleError::ConfigurationMissing(key),
            RecipeError::Invalid(e) => CycleError::Domain(e),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleErrorKind {
    RunBusy,
    ConfigurationMissing,
    ExternalLookupFailure,
    InvalidData,
}

impl CycleErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleErrorKind::RunBusy => "run_busy",
            CycleErrorKind::ConfigurationMissing => "configuration_missing",
            CycleErrorKind::ExternalLookupFailure => "external_lookup_failure",
            CycleErrorKind::InvalidData => "invalid_data",
        }
    }
}

impl CycleError {
    pub fn kind(&self) -> CycleErrorKind {
        match self {
            CycleError::RunBusy(_) => CycleErrorKind::RunBusy,
            CycleError::ConfigurationMissing(_) => CycleErrorKind::ConfigurationMissing,
            CycleError::Store(StoreError::Domain(_) | StoreError::Malformed(_))
            | CycleError::Domain(_)
            | CycleError::Boundary(BoundaryError::Domain(_))
            | CycleError::Posting(PostingError::Domain(_)) => CycleErrorKind::InvalidData,
            CycleError::Store(_)
            | CycleError::Metric(_)
            | CycleError::Boundary(_)
            | CycleError::Posting(_) => CycleErrorKind::ExternalLookupFailure,
        }
    }
}

/// In-process single-writer guard: at most one cycle per run at a time.
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    in_flight: Arc<Mutex<HashSet<RunKey>>>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, run: &RunKey) -> Result<RunPermit, CycleError> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| CycleError::RunBusy(run.clone()))?;
        if !set.insert(run.clone()) {
            return Err(CycleError::RunBusy(run.clone()));
        }
        Ok(RunPermit {
            guard: self.clone(),
            run: run.clone(),
        })
    }

    pub fn is_busy(&self, run: &RunKey) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(run))
            .unwrap_or(true)
    }
}

/// Released on drop.
#[derive(Debug)]
pub struct RunPermit {
    guard: RunGuard,
    run: RunKey,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        if let Ok(mut set) = self.guard.in_flight.lock() {
            set.remove(&self.run);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub run: RunKey,
    pub feeder: FeederId,
    pub material: MaterialCode,
    pub anomaly: SensorAnomaly,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErroredRun {
    pub run: RunKey,
    pub kind: CycleErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub runs_processed: usize,
    pub postings: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub anomalies: Vec<AnomalyReport>,
    pub held: Vec<PostingKey>,
    pub errored_runs: Vec<ErroredRun>,
    pub failures: Vec<PostingFailure>,
}

impl CycleReport {
    fn absorb(&mut self, outcome: RunOutcome) {
        self.runs_processed += 1;
        self.postings += outcome.posting.recorded();
        self.accepted += outcome.posting.accepted.len();
        self.rejected += outcome.posting.rejected.len();
        self.failures.extend(outcome.posting.failures);

        let result = outcome.result;
        for f in &result.feeders {
            match f.outcome {
                FeederOutcome::Anomaly(anomaly) => self.anomalies.push(AnomalyReport {
                    run: result.run.clone(),
                    feeder: f.feeder,
                    material: f.material.clone(),
                    anomaly,
                }),
                FeederOutcome::Held => self.held.push(PostingKey::pick(
                    result.lot.clone(),
                    f.feeder,
                    f.material.clone(),
                )),
                _ => {}
            }
        }
        if result.pay_held {
            self.held.push(PostingKey::pay(result.lot.clone()));
        }
    }
}

/// Everything one run produced in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub result: ConsumptionCycleResult,
    pub posting: PostingReport,
}

/// Store, sensor and ledger collaborators of the driver.
#[derive(Clone)]
pub struct CyclePorts {
    pub runs: Arc<dyn RunStore>,
    pub recipes: Arc<dyn RecipeStore>,
    pub audit: Arc<dyn AuditStore>,
    pub boundaries: Arc<dyn BoundaryStore>,
    pub sheets: Arc<dyn SheetStore>,
    pub metrics: Arc<dyn MetricStore>,
    pub ledger: Arc<dyn Ledger>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct Driver {
    pub(crate) runs: Arc<dyn RunStore>,
    recipes: Arc<dyn RecipeStore>,
    pub(crate) audit: Arc<dyn AuditStore>,
    notifier: Arc<dyn Notifier>,
    sampler: Arc<AccumulatorSampler>,
    boundaries: BoundaryService,
    pub(crate) posting: PostingClient,
    pub(crate) guard: RunGuard,
    thresholds: ReconcileThresholds,
    lookback: chrono::Duration,
    topic_prefix: String,
}

impl Driver {
    pub fn new(ports: CyclePorts, config: &EngineConfig) -> Self {
        let sampler = Arc::new(AccumulatorSampler::new(
            ports.metrics.clone(),
            config.sampler_settings(),
        ));
        let boundaries = BoundaryService::new(
            ports.runs.clone(),
            ports.boundaries.clone(),
            sampler.clone(),
            config.boundary_policy(),
            config.topic_prefix.clone(),
        );
        let posting = PostingClient::new(
            ports.ledger.clone(),
            ports.audit.clone(),
            ports.sheets.clone(),
            ports.notifier.clone(),
            config.posting_settings(),
        );
        Self {
            runs: ports.runs,
            recipes: ports.recipes,
            audit: ports.audit,
            notifier: ports.notifier,
            sampler,
            boundaries,
            posting,
            guard: RunGuard::new(),
            thresholds: config.thresholds(),
            lookback: chrono_duration(config.lookback),
            topic_prefix: config.topic_prefix.clone(),
        }
    }

    pub fn guard(&self) -> &RunGuard {
        &self.guard
    }

    /// Reconcile every open or recently closed run as of `now`.
    ///
    /// Only the run enumeration itself can fail the cycle; per-run failures
    /// land in [`CycleReport::errored_runs`].
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        let runs = self.runs.active_runs(now - self.lookback).await?;
        info!(runs = runs.len(), now = %now, "reconciliation cycle started");

        let mut report = CycleReport::default();
        for run in runs {
            let key = run.key.clone();
            match self.process_run(run, now).await {
                Ok(outcome) => report.absorb(outcome),
                Err(e) => {
                    warn!(run = %key, kind = e.kind().as_str(), error = %e, "run skipped");
                    if let CycleError::ConfigurationMissing(formula) = &e {
                        self.notifier.notify(Notice::ConfigurationMissing {
                            run: key.clone(),
                            detail: formula.to_string(),
                        });
                    }
                    report.errored_runs.push(ErroredRun {
                        run: key,
                        kind: e.kind(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            runs_processed = report.runs_processed,
            postings = report.postings,
            rejected = report.rejected,
            anomalies = report.anomalies.len(),
            held = report.held.len(),
            errored = report.errored_runs.len(),
            failures = report.failures.len(),
            "reconciliation cycle finished"
        );
        Ok(report)
    }

    /// Boundaries → feed plan → sample → baselines → reconcile → post.
    pub async fn process_run(
        &self,
        mut run: ProductionRun,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome, CycleError> {
        let _permit = self.guard.acquire(&run.key)?;

        let bounds = self.boundaries.resolve(&mut run, now).await?;

        let formula = FormulaKey {
            line: run.key.line.clone(),
            version: run.formula_version.clone(),
            product: run.product.clone(),
        };
        let rows = self.recipes.formula_rows(&formula).await?;
        let overrides = self.recipes.feed_overrides(&run.key).await?;
        let plan = resolve_feed_plan(formula, &rows, &overrides)?;
        if !plan.ambiguous_overrides.is_empty() {
            warn!(
                run = %run.key,
                feeders = ?plan.ambiguous_overrides,
                "several override materials for one feeder; first one used"
            );
        }

        let window_start = bounds.start;
        let window_end = bounds.end.map_or(now, |end| end.min(now));
        let facts = RunFacts {
            run: run.key.clone(),
            lot: run.lot.clone(),
            planned_weight: run.planned_weight,
            closed: run.is_closed(),
        };
        if window_end <= window_start {
            debug!(run = %run.key, start = %window_start, "run has not started yet");
            return Ok(RunOutcome {
                result: ConsumptionCycleResult {
                    run: facts.run,
                    lot: facts.lot,
                    picks: Vec::new(),
                    pay: None,
                    feeders: Vec::new(),
                    output_cumulative: 0.0,
                    pay_held: false,
                },
                posting: PostingReport::default(),
            });
        }

        let topic = format!("{}{}", self.topic_prefix, run.key.line);
        let window = self
            .sampler
            .sample(&topic, window_start, window_end, now)
            .await?;

        let mut baselines = BaselineSet::new();
        for a in plan.assignments() {
            let key = PostingKey::pick(run.lot.clone(), a.feeder, a.material.clone());
            let latest = self.audit.latest(&key).await?;
            baselines.insert(a.feeder, a.material.clone(), Baseline::from_latest(latest.as_ref()));
        }
        let pay_baseline = self.pay_baseline(&run.lot).await?;

        let result = reconcile_run(&facts, &plan, &window, &baselines, pay_baseline, &self.thresholds);
        for f in result.anomalies() {
            info!(
                run = %run.key,
                feeder = %f.feeder,
                material = %f.material,
                outcome = ?f.outcome,
                raw_delta = ?f.raw_delta,
                baseline = f.baseline,
                "sensor anomaly; contribution suppressed"
            );
        }

        let ctx = PostingContext {
            run: run.key.clone(),
            lot: run.lot.clone(),
            product: run.product.clone(),
            window_start,
            window_end,
            origin: PostingOrigin::Cycle,
            now,
        };
        let mut posting = self.posting.post_picks(&ctx, &result.picks).await?;
        if let Some(pay) = &result.pay {
            // Output follows consumption: wait until every pick of this cycle went through.
            if posting.failures.is_empty() && posting.rejected.is_empty() {
                posting.merge(self.posting.post_pay(&ctx, pay).await?);
            } else {
                debug!(run = %run.key, "pay deferred until picks settle");
            }
        }

        Ok(RunOutcome { result, posting })
    }

    pub(crate) async fn pay_baseline(&self, lot: &LotNo) -> Result<Baseline, StoreError> {
        let latest = self.audit.latest(&PostingKey::pay(lot.clone())).await?;
        Ok(Baseline::from_latest(latest.as_ref()))
    }

    /// Audit trail of one lot, oldest first.
    pub async fn postings_for_lot(&self, lot: &LotNo) -> Result<Vec<PostingRecord>, StoreError> {
        self.audit.records_for_lot(lot).await
    }
}
