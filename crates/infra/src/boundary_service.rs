//! Resolves run boundaries against the stores and the "on" signal.
//!
//! The decision itself lives in `feedpost_production::boundary`; this layer
//! loads neighbours, executes probes and persists terminal outcomes exactly
//! once per (run, edge).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use feedpost_core::DomainError;
use feedpost_production::{
    decide_end, decide_start, finish_probe, BoundaryDecision, BoundaryEdge, BoundaryPolicy,
    BoundaryResolution, ContinuityState, ProductionRun,
};

use crate::metric::MetricError;
use crate::sampler::AccumulatorSampler;
use crate::store::{BoundaryStore, RunStore, StoreError};

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Instants to use for one run this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveBoundaries {
    pub start: DateTime<Utc>,
    /// `None` while the run is open (the cycle window then ends at `now`).
    pub end: Option<DateTime<Utc>>,
    pub start_state: ContinuityState,
    pub end_state: ContinuityState,
}

pub struct BoundaryService {
    runs: Arc<dyn RunStore>,
    boundaries: Arc<dyn BoundaryStore>,
    sampler: Arc<AccumulatorSampler>,
    policy: BoundaryPolicy,
    topic_prefix: String,
}

impl BoundaryService {
    pub fn new(
        runs: Arc<dyn RunStore>,
        boundaries: Arc<dyn BoundaryStore>,
        sampler: Arc<AccumulatorSampler>,
        policy: BoundaryPolicy,
        topic_prefix: impl Into<String>,
    ) -> Self {
        Self {
            runs,
            boundaries,
            sampler,
            policy,
            topic_prefix: topic_prefix.into(),
        }
    }

    /// Resolve both edges of `run`, applying persisted resolutions to it.
    pub async fn resolve(
        &self,
        run: &mut ProductionRun,
        now: DateTime<Utc>,
    ) -> Result<EffectiveBoundaries, BoundaryError> {
        let (start, start_state) = self.resolve_edge(run, BoundaryEdge::Start, now).await?;
        let (end, end_state) = self.resolve_edge(run, BoundaryEdge::End, now).await?;

        let start = start.unwrap_or(run.operator_start);
        Ok(EffectiveBoundaries {
            start,
            // A resolved end can land before a sensor-resolved start only on bad data.
            end: end.map(|e| e.max(start)),
            start_state,
            end_state,
        })
    }

    async fn resolve_edge(
        &self,
        run: &mut ProductionRun,
        edge: BoundaryEdge,
        now: DateTime<Utc>,
    ) -> Result<(Option<DateTime<Utc>>, ContinuityState), BoundaryError> {
        if let Some(stored) = self.boundaries.get(&run.key, edge).await? {
            run.apply_resolution(&stored)?;
            return Ok((Some(stored.resolved_instant), stored.continuity.into()));
        }

        let decision = match edge {
            BoundaryEdge::Start => {
                let predecessor = self.runs.predecessor(&run.key).await?;
                decide_start(run, predecessor.as_ref(), self.policy)
            }
            BoundaryEdge::End => {
                let successor = self.runs.successor(&run.key).await?;
                decide_end(run, successor.as_ref(), now, self.policy)
            }
        };
        let state = decision.state();

        let resolution = match decision {
            BoundaryDecision::Pending { provisional } => {
                debug!(run = %run.key, edge = edge.as_str(), "boundary pending");
                return Ok((provisional, state));
            }
            BoundaryDecision::Deferred { provisional } => {
                debug!(run = %run.key, edge = edge.as_str(), "boundary deferred");
                return Ok((Some(provisional), state));
            }
            BoundaryDecision::Resolved(resolution) => resolution,
            BoundaryDecision::Probe {
                operator_instant,
                window,
            } => {
                let topic = format!("{}{}", self.topic_prefix, run.key.line);
                let found = self.sampler.probe_on_signal(&topic, &window, now).await?;
                finish_probe(run, edge, operator_instant, found)
            }
        };

        let stored = self.persist(&resolution).await?;
        run.apply_resolution(&stored)?;
        Ok((Some(stored.resolved_instant), stored.continuity.into()))
    }

    async fn persist(&self, resolution: &BoundaryResolution) -> Result<BoundaryResolution, BoundaryError> {
        let stored = self.boundaries.insert_once(resolution).await?;
        info!(
            run = %stored.run,
            edge = stored.edge.as_str(),
            continuity = ?stored.continuity,
            source = ?stored.source,
            operator_instant = %stored.operator_instant,
            resolved_instant = %stored.resolved_instant,
            "run boundary resolved"
        );
        Ok(stored)
    }
}
