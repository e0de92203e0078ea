//! Infrastructure layer: stores, metric source, ledger, and the cycle driver.
//!
//! Every external collaborator is a port with an in-memory implementation
//! (tests/dev) and a real adapter (Postgres via sqlx, JSON over HTTP via
//! reqwest).

pub mod adjustment;
pub mod boundary_service;
pub mod config;
pub mod driver;
pub mod ledger;
pub mod metric;
pub mod notify;
pub mod posting;
pub mod runner;
pub mod sampler;
pub mod store;

mod integration_tests;

pub use adjustment::{AdjustmentError, AdjustmentRequest, AdjustmentTarget};
pub use config::EngineConfig;
pub use driver::{CycleError, CycleErrorKind, CyclePorts, CycleReport, Driver, RunGuard};
pub use runner::{CycleRunner, CycleRunnerHandle};
