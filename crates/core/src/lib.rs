//! `feedpost-core` - shared building blocks for the consumption engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model and quantity rounding rules.

pub mod error;
pub mod id;
pub mod quantity;

pub use error::{DomainError, DomainResult};
pub use id::{
    FeederId, FormulaVersion, LineId, LocationCode, LotNo, MaterialCode, PostingId, ProductCode,
    RunKey, SheetNo,
};
pub use quantity::{RoundingTier, approx_eq, QTY_TOLERANCE};
