use serde::{Deserialize, Serialize};

use feedpost_core::{approx_eq, FeederId, LotNo, MaterialCode, RoundingTier, RunKey, QTY_TOLERANCE};
use feedpost_recipe::{FeedPlan, FeederAssignment};

use crate::posting::{Baseline, BaselineSet, PayEntry, PickEntry};
use crate::sample::{hours_between, AccumulatorWindow};

/// Anomaly detection knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconcileThresholds {
    /// Slack allowed before a cumulative below the baseline counts as non-monotonic.
    pub epsilon: f64,
    /// Feeder throughput (units/hour) used when the formula records none.
    pub default_max_hourly_rate: f64,
    /// Extra hours of throughput tolerated on top of the elapsed time, to
    /// absorb consumption that accrued while the engine was not running.
    pub outage_allowance_hours: f64,
}

impl Default for ReconcileThresholds {
    fn default() -> Self {
        Self {
            epsilon: 0.05,
            default_max_hourly_rate: 1800.0,
            outage_allowance_hours: 3.0,
        }
    }
}

/// The parts of a production run the reconciler needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFacts {
    pub run: RunKey,
    pub lot: LotNo,
    pub planned_weight: f64,
    /// Operator end time is set.
    pub closed: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorAnomaly {
    /// Feeder not reported by the metric source, or no readings in the window.
    Stale,
    /// Last reading below the first one: the accumulator restarted.
    CounterReset,
    /// Window total below what was already posted.
    NonMonotonic,
    /// Growth exceeds what the feeder can physically deliver.
    Spike,
}

impl SensorAnomaly {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorAnomaly::Stale => "stale",
            SensorAnomaly::CounterReset => "counter_reset",
            SensorAnomaly::NonMonotonic => "non_monotonic",
            SensorAnomaly::Spike => "spike",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "anomaly")]
pub enum FeederOutcome {
    /// A pick entry was emitted.
    Posted,
    /// A pick entry was emitted, clamped to the planned share.
    Capped,
    /// Nothing new to post (zero or negative rounded contribution).
    Unchanged,
    /// Semi-finished feeder already received its planned share.
    AtCap,
    /// Latest posting was rejected by the ledger; waiting for an adjustment.
    Held,
    Anomaly(SensorAnomaly),
}

/// Per-assignment evaluation, kept for logging and reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeederReport {
    pub feeder: FeederId,
    pub material: MaterialCode,
    pub outcome: FeederOutcome,
    pub raw_delta: Option<f64>,
    pub baseline: f64,
    /// Cumulative after this cycle (equals the baseline when nothing is posted).
    pub cumulative: f64,
}

/// Entries to post for one run in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionCycleResult {
    pub run: RunKey,
    pub lot: LotNo,
    pub picks: Vec<PickEntry>,
    pub pay: Option<PayEntry>,
    pub feeders: Vec<FeederReport>,
    /// Output cumulative implied by the picks (posted or not).
    pub output_cumulative: f64,
    /// The pay key is held; no pay entry is produced until it is adjusted.
    pub pay_held: bool,
}

impl ConsumptionCycleResult {
    pub fn anomalies(&self) -> impl Iterator<Item = &FeederReport> {
        self.feeders
            .iter()
            .filter(|f| matches!(f.outcome, FeederOutcome::Anomaly(_)))
    }

    pub fn held(&self) -> impl Iterator<Item = &FeederReport> {
        self.feeders
            .iter()
            .filter(|f| f.outcome == FeederOutcome::Held)
    }

    pub fn is_empty(&self) -> bool {
        self.picks.is_empty() && self.pay.is_none()
    }
}

/// Compute this cycle's pick and pay entries for one run.
///
/// `window` must span the whole run so far: accumulator deltas are totals
/// since run start, compared against the cumulative totals already posted
/// (`baselines`, `pay_baseline`). The result only depends on its inputs, so
/// re-running a cycle after its entries were posted yields nothing new.
pub fn reconcile_run(
    facts: &RunFacts,
    plan: &FeedPlan,
    window: &AccumulatorWindow,
    baselines: &BaselineSet,
    pay_baseline: Baseline,
    thresholds: &ReconcileThresholds,
) -> ConsumptionCycleResult {
    let mut picks = Vec::new();
    let mut feeders = Vec::with_capacity(plan.assignments().len());
    let mut output = 0.0;

    for assignment in plan.assignments() {
        let baseline = baselines.get(assignment.feeder, &assignment.material);
        let eval = evaluate(facts, plan, assignment, window, baseline, thresholds);

        let cumulative = match eval.outcome {
            FeederOutcome::Posted | FeederOutcome::Capped => {
                picks.push(PickEntry {
                    feeder: assignment.feeder,
                    material: assignment.material.clone(),
                    new_cumulative: eval.cumulative,
                    baseline: baseline.cumulative,
                });
                eval.cumulative
            }
            _ => baseline.cumulative,
        };
        output += cumulative;

        feeders.push(FeederReport {
            feeder: assignment.feeder,
            material: assignment.material.clone(),
            outcome: eval.outcome,
            raw_delta: eval.raw_delta,
            baseline: baseline.cumulative,
            cumulative,
        });
    }

    let output_cumulative = RoundingTier::TenThousandths.round(output);
    let pay = if pay_baseline.held || approx_eq(output_cumulative, pay_baseline.cumulative) {
        None
    } else {
        Some(PayEntry {
            run: facts.run.clone(),
            lot: facts.lot.clone(),
            new_cumulative: output_cumulative,
            baseline: pay_baseline.cumulative,
        })
    };

    ConsumptionCycleResult {
        run: facts.run.clone(),
        lot: facts.lot.clone(),
        picks,
        pay,
        feeders,
        output_cumulative,
        pay_held: pay_baseline.held,
    }
}

struct Evaluation {
    outcome: FeederOutcome,
    raw_delta: Option<f64>,
    cumulative: f64,
}

impl Evaluation {
    fn skip(outcome: FeederOutcome, raw_delta: Option<f64>) -> Self {
        Self {
            outcome,
            raw_delta,
            cumulative: 0.0,
        }
    }
}

fn evaluate(
    facts: &RunFacts,
    plan: &FeedPlan,
    assignment: &FeederAssignment,
    window: &AccumulatorWindow,
    baseline: Baseline,
    thresholds: &ReconcileThresholds,
) -> Evaluation {
    if baseline.held {
        return Evaluation::skip(FeederOutcome::Held, None);
    }

    let Some(sample) = window.sample(assignment.feeder) else {
        return Evaluation::skip(FeederOutcome::Anomaly(SensorAnomaly::Stale), None);
    };
    if sample.max < sample.min {
        return Evaluation::skip(
            FeederOutcome::Anomaly(SensorAnomaly::CounterReset),
            Some(sample.raw_delta()),
        );
    }
    let raw_delta = sample.raw_delta();

    if baseline.cumulative > raw_delta + thresholds.epsilon {
        return Evaluation::skip(
            FeederOutcome::Anomaly(SensorAnomaly::NonMonotonic),
            Some(raw_delta),
        );
    }

    let rate = assignment
        .max_load_per_hour
        .unwrap_or(thresholds.default_max_hourly_rate);
    let since = baseline.as_of.unwrap_or(window.window_start);
    let allowed = rate * (hours_between(since, window.window_end) + thresholds.outage_allowance_hours);
    if raw_delta - baseline.cumulative > allowed {
        return Evaluation::skip(FeederOutcome::Anomaly(SensorAnomaly::Spike), Some(raw_delta));
    }

    let tier = RoundingTier::for_ratio(assignment.ratio_pct);

    // Semi-finished materials share one upstream stream by ratio and may not
    // exceed their planned part of it. The cap is floored so the group total
    // never rounds past the plan.
    let (cumulative, capped) = match assignment.semi_finished {
        Some(group) => {
            let cap = tier.floor(facts.planned_weight * assignment.ratio_pct / 100.0);
            if baseline.cumulative >= cap - QTY_TOLERANCE {
                return Evaluation::skip(FeederOutcome::AtCap, Some(raw_delta));
            }
            if facts.closed || raw_delta >= cap {
                (cap, true)
            } else {
                // baseline × share + (raw − baseline) × share
                let share = assignment.ratio_pct / plan.group_ratio(group);
                (tier.round(raw_delta * share), false)
            }
        }
        None => (tier.round(raw_delta), false),
    };

    let contribution = cumulative - baseline.cumulative;
    let outcome = if contribution <= QTY_TOLERANCE {
        FeederOutcome::Unchanged
    } else if capped {
        FeederOutcome::Capped
    } else {
        FeederOutcome::Posted
    };

    Evaluation {
        outcome,
        raw_delta: Some(raw_delta),
        cumulative,
    }
}
