//! Delta reconciliation (pure domain logic).
//!
//! Turns per-feeder accumulator windows plus the last posted cumulative
//! totals into this cycle's pick (consumption) and pay (output) entries.
//! No IO: samples and baselines are read by the caller, entries are posted by
//! the caller.

pub mod engine;
pub mod posting;
pub mod sample;

pub use engine::{
    reconcile_run, ConsumptionCycleResult, FeederOutcome, FeederReport, ReconcileThresholds,
    RunFacts, SensorAnomaly,
};
pub use posting::{
    Baseline, BaselineSet, PayEntry, PickEntry, PostingDraft, PostingKey, PostingOrigin,
    PostingRecord, PostingStatus, SheetType,
};
pub use sample::{AccumulatorWindow, AccumulatorWindowSample};
