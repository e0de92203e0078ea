//! Recipe / feed-plan module.
//!
//! Resolves which material each feeder carries for a run, at what formula
//! ratio, and whether it belongs to a semi-finished ratio group. Pure domain
//! logic: rows are handed in by the caller, nothing here touches a store.

pub mod plan;

pub use plan::{
    resolve_feed_plan, FeedOverride, FeedPlan, FeederAssignment, FormulaKey, FormulaRow,
    RatioGroup, RecipeError,
};
