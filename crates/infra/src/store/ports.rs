use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use feedpost_core::{DomainError, LocationCode, LotNo, RunKey, SheetNo};
use feedpost_production::{BoundaryEdge, BoundaryResolution, ProductionRun};
use feedpost_recipe::{FeedOverride, FormulaKey, FormulaRow};
use feedpost_reconcile::{PostingKey, PostingRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or failed mid-query.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A row could not be mapped to a domain value.
    #[error("malformed row: {0}")]
    Malformed(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Storage-location date-sequence key used by pay postings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageSlot {
    pub location: LocationCode,
    pub date: NaiveDate,
    pub sequence: u32,
}

impl core::fmt::Display for StorageSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}-{}-{:03}",
            self.location,
            self.date.format("%Y%m%d"),
            self.sequence
        )
    }
}

/// Formula rows and run-specific feeding overrides.
#[async_trait::async_trait]
pub trait RecipeStore: Send + Sync {
    /// All formula rows for a (line, version, product); empty when none exist.
    async fn formula_rows(&self, key: &FormulaKey) -> Result<Vec<FormulaRow>, StoreError>;

    async fn feed_overrides(&self, run: &RunKey) -> Result<Vec<FeedOverride>, StoreError>;
}

/// Production runs as scheduled upstream.
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Runs that are still open, or closed at or after `closed_since`,
    /// ordered by line and sequence.
    async fn active_runs(&self, closed_since: DateTime<Utc>)
    -> Result<Vec<ProductionRun>, StoreError>;

    async fn get(&self, key: &RunKey) -> Result<Option<ProductionRun>, StoreError>;

    /// Closest earlier run on the same line.
    async fn predecessor(&self, key: &RunKey) -> Result<Option<ProductionRun>, StoreError>;

    /// Closest later run on the same line.
    async fn successor(&self, key: &RunKey) -> Result<Option<ProductionRun>, StoreError>;

    /// Most recent run stamped with `lot`.
    async fn find_by_lot(&self, lot: &LotNo) -> Result<Option<ProductionRun>, StoreError>;
}

/// Append-only posting audit trail.
#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: &PostingRecord) -> Result<(), StoreError>;

    /// Most recent record for a key (by `recorded_at`, then append order).
    async fn latest(&self, key: &PostingKey) -> Result<Option<PostingRecord>, StoreError>;

    /// Every record of a lot, oldest first.
    async fn records_for_lot(&self, lot: &LotNo) -> Result<Vec<PostingRecord>, StoreError>;
}

/// Ledger sheet numbers and storage slots handed out so far.
#[async_trait::async_trait]
pub trait SheetStore: Send + Sync {
    /// Pick sheet of `lot` that has not been posted yet.
    async fn open_pick_sheet(&self, lot: &LotNo) -> Result<Option<SheetNo>, StoreError>;

    async fn register_pick_sheet(&self, lot: &LotNo, sheet: &SheetNo) -> Result<(), StoreError>;

    async fn mark_pick_sheet_posted(&self, sheet: &SheetNo) -> Result<(), StoreError>;

    async fn pay_sheet(&self, run: &RunKey) -> Result<Option<SheetNo>, StoreError>;

    async fn register_pay_sheet(&self, run: &RunKey, sheet: &SheetNo) -> Result<(), StoreError>;

    async fn storage_slot(
        &self,
        lot: &LotNo,
        location: &LocationCode,
    ) -> Result<Option<StorageSlot>, StoreError>;

    /// Allocate the next sequence for (`location`, `date`) and bind it to
    /// `lot`. Returns the existing slot when the lot already has one.
    async fn allocate_storage_slot(
        &self,
        lot: &LotNo,
        location: &LocationCode,
        date: NaiveDate,
    ) -> Result<StorageSlot, StoreError>;
}

/// Persisted run boundaries, written once per (run, edge).
#[async_trait::async_trait]
pub trait BoundaryStore: Send + Sync {
    async fn get(
        &self,
        run: &RunKey,
        edge: BoundaryEdge,
    ) -> Result<Option<BoundaryResolution>, StoreError>;

    /// Store `resolution` unless the edge is already resolved. Returns the
    /// resolution that ends up stored (the first one wins).
    async fn insert_once(
        &self,
        resolution: &BoundaryResolution,
    ) -> Result<BoundaryResolution, StoreError>;
}
