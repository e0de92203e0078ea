//! Run-boundary state machine.
//!
//! Operators enter start/end times by hand, often late or rounded. When two
//! runs on a line follow each other closely the entered instant is trusted;
//! when there is a real gap the true instant is recovered from the sensor
//! "on" signal.
//!
//! ```text
//! Pending ──(end entered)──► ContinuityUnknown ──┬─► Continuous     (gap <  threshold)
//!                                                └─► Discontinuous  (gap >= threshold)
//! ```
//!
//! Only `Continuous` and `Discontinuous` are terminal and get persisted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use feedpost_core::RunKey;

use crate::run::ProductionRun;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryEdge {
    Start,
    End,
}

impl BoundaryEdge {
    pub fn as_str(self) -> &'static str {
        match self {
            BoundaryEdge::Start => "start",
            BoundaryEdge::End => "end",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuityState {
    /// End timestamp not yet set, or neighbouring run not yet known.
    Pending,
    /// End entered but no successor yet; decision deferred.
    ContinuityUnknown,
    Continuous,
    Discontinuous,
}

/// Terminal continuity outcome (persisted).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Continuity {
    Continuous,
    Discontinuous,
}

impl From<Continuity> for ContinuityState {
    fn from(value: Continuity) -> Self {
        match value {
            Continuity::Continuous => ContinuityState::Continuous,
            Continuity::Discontinuous => ContinuityState::Discontinuous,
        }
    }
}

/// Where a resolved instant came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Operator,
    Sensor,
}

/// Which matching sample a probe should return.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbePick {
    Earliest,
    Latest,
}

/// Sensor query requested for a discontinuous boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub pick: ProbePick,
}

impl ProbeWindow {
    /// `instant ± threshold/2`.
    pub fn around(instant: DateTime<Utc>, threshold: Duration, pick: ProbePick) -> Self {
        let half = threshold / 2;
        Self {
            from: instant - half,
            to: instant + half,
            pick,
        }
    }
}

/// Persisted outcome for one (run, edge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryResolution {
    pub run: RunKey,
    pub edge: BoundaryEdge,
    pub continuity: Continuity,
    pub operator_instant: DateTime<Utc>,
    pub resolved_instant: DateTime<Utc>,
    pub source: ResolutionSource,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BoundaryPolicy {
    pub continuity_threshold: Duration,
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        Self {
            continuity_threshold: Duration::minutes(30),
        }
    }
}

/// What the caller should do for one boundary this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryDecision {
    /// Not decidable yet. `provisional` is the instant to use this cycle, if
    /// any (`None` for the end of a still-open run).
    Pending { provisional: Option<DateTime<Utc>> },
    /// End entered, no successor yet, inside the deferral window. Use the
    /// operator instant; do not persist.
    Deferred { provisional: DateTime<Utc> },
    /// Final: operator instant verbatim, no sensor query.
    Resolved(BoundaryResolution),
    /// Final once probed: run `window` against the "on" signal, then call
    /// [`finish_probe`].
    Probe {
        operator_instant: DateTime<Utc>,
        window: ProbeWindow,
    },
}

impl BoundaryDecision {
    pub fn state(&self) -> ContinuityState {
        match self {
            BoundaryDecision::Pending { .. } => ContinuityState::Pending,
            BoundaryDecision::Deferred { .. } => ContinuityState::ContinuityUnknown,
            BoundaryDecision::Resolved(r) => r.continuity.into(),
            BoundaryDecision::Probe { .. } => ContinuityState::Discontinuous,
        }
    }
}

/// Decide the start boundary of `run` given its predecessor on the same line.
pub fn decide_start(
    run: &ProductionRun,
    predecessor: Option<&ProductionRun>,
    policy: BoundaryPolicy,
) -> BoundaryDecision {
    let operator_instant = run.operator_start;

    let gap = match predecessor {
        // First run on the line: nothing flows into it.
        None => None,
        Some(prev) => match prev.operator_end {
            None => {
                return BoundaryDecision::Pending {
                    provisional: Some(operator_instant),
                };
            }
            Some(prev_end) => Some(operator_instant - prev_end),
        },
    };

    match gap {
        Some(gap) if gap < policy.continuity_threshold => {
            BoundaryDecision::Resolved(continuous(run, BoundaryEdge::Start, operator_instant))
        }
        _ => BoundaryDecision::Probe {
            operator_instant,
            window: ProbeWindow::around(
                operator_instant,
                policy.continuity_threshold,
                ProbePick::Earliest,
            ),
        },
    }
}

/// Decide the end boundary of `run` given its successor on the same line.
pub fn decide_end(
    run: &ProductionRun,
    successor: Option<&ProductionRun>,
    now: DateTime<Utc>,
    policy: BoundaryPolicy,
) -> BoundaryDecision {
    let Some(operator_instant) = run.operator_end else {
        return BoundaryDecision::Pending { provisional: None };
    };

    let discontinuous = match successor {
        Some(next) => next.operator_start - operator_instant >= policy.continuity_threshold,
        None => {
            if now - operator_instant < policy.continuity_threshold {
                return BoundaryDecision::Deferred {
                    provisional: operator_instant,
                };
            }
            true
        }
    };

    if discontinuous {
        BoundaryDecision::Probe {
            operator_instant,
            window: ProbeWindow::around(
                operator_instant,
                policy.continuity_threshold,
                ProbePick::Latest,
            ),
        }
    } else {
        BoundaryDecision::Resolved(continuous(run, BoundaryEdge::End, operator_instant))
    }
}

/// Complete a probed boundary. Falls back to the operator instant when the
/// probe found no "on" crossing.
pub fn finish_probe(
    run: &ProductionRun,
    edge: BoundaryEdge,
    operator_instant: DateTime<Utc>,
    found: Option<DateTime<Utc>>,
) -> BoundaryResolution {
    let (resolved_instant, source) = match found {
        Some(at) => (at, ResolutionSource::Sensor),
        None => (operator_instant, ResolutionSource::Operator),
    };
    BoundaryResolution {
        run: run.key.clone(),
        edge,
        continuity: Continuity::Discontinuous,
        operator_instant,
        resolved_instant,
        source,
    }
}

fn continuous(run: &ProductionRun, edge: BoundaryEdge, instant: DateTime<Utc>) -> BoundaryResolution {
    BoundaryResolution {
        run: run.key.clone(),
        edge,
        continuity: Continuity::Continuous,
        operator_instant: instant,
        resolved_instant: instant,
        source: ResolutionSource::Operator,
    }
}
