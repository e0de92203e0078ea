//! Production-run module.
//!
//! Holds the run record handed down by upstream scheduling and the pure
//! run-boundary state machine that decides when a run really started and
//! ended. Sensor probes are requested, never executed, here.

pub mod boundary;
pub mod run;

pub use boundary::{
    decide_end, decide_start, finish_probe, BoundaryDecision, BoundaryEdge, BoundaryPolicy,
    BoundaryResolution, Continuity, ContinuityState, ProbePick, ProbeWindow, ResolutionSource,
};
pub use run::ProductionRun;
