//! HTTP API: on-demand cycles, operator adjustments, and run diagnostics.

pub mod app;
