//! In-memory store implementations for tests/dev. Not optimized for performance.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};

use feedpost_core::{LocationCode, LotNo, RunKey, SheetNo};
use feedpost_production::{BoundaryEdge, BoundaryResolution, ProductionRun};
use feedpost_recipe::{FeedOverride, FormulaKey, FormulaRow};
use feedpost_reconcile::{PostingKey, PostingRecord};

use super::ports::{
    AuditStore, BoundaryStore, RecipeStore, RunStore, SheetStore, StorageSlot, StoreError,
};

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Unavailable("in-memory store lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryRecipeStore {
    formulas: RwLock<HashMap<FormulaKey, Vec<FormulaRow>>>,
    overrides: RwLock<HashMap<RunKey, Vec<FeedOverride>>>,
}

impl InMemoryRecipeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_formula(&self, key: FormulaKey, rows: Vec<FormulaRow>) {
        if let Ok(mut map) = self.formulas.write() {
            map.insert(key, rows);
        }
    }

    pub fn set_overrides(&self, run: RunKey, overrides: Vec<FeedOverride>) {
        if let Ok(mut map) = self.overrides.write() {
            map.insert(run, overrides);
        }
    }
}

#[async_trait::async_trait]
impl RecipeStore for InMemoryRecipeStore {
    async fn formula_rows(&self, key: &FormulaKey) -> Result<Vec<FormulaRow>, StoreError> {
        let map = self.formulas.read().map_err(poisoned)?;
        Ok(map.get(key).cloned().unwrap_or_default())
    }

    async fn feed_overrides(&self, run: &RunKey) -> Result<Vec<FeedOverride>, StoreError> {
        let map = self.overrides.read().map_err(poisoned)?;
        Ok(map.get(run).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<BTreeMap<RunKey, ProductionRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a run (upstream scheduling stand-in).
    pub fn upsert(&self, run: ProductionRun) {
        if let Ok(mut map) = self.runs.write() {
            map.insert(run.key.clone(), run);
        }
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryRunStore {
    async fn active_runs(
        &self,
        closed_since: DateTime<Utc>,
    ) -> Result<Vec<ProductionRun>, StoreError> {
        let map = self.runs.read().map_err(poisoned)?;
        Ok(map
            .values()
            .filter(|r| r.operator_end.map_or(true, |end| end >= closed_since))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &RunKey) -> Result<Option<ProductionRun>, StoreError> {
        let map = self.runs.read().map_err(poisoned)?;
        Ok(map.get(key).cloned())
    }

    async fn predecessor(&self, key: &RunKey) -> Result<Option<ProductionRun>, StoreError> {
        let map = self.runs.read().map_err(poisoned)?;
        Ok(map
            .range(..key.clone())
            .rev()
            .find(|(k, _)| k.line == key.line)
            .map(|(_, r)| r.clone()))
    }

    async fn successor(&self, key: &RunKey) -> Result<Option<ProductionRun>, StoreError> {
        let map = self.runs.read().map_err(poisoned)?;
        Ok(map
            .iter()
            .find(|(k, _)| k.line == key.line && k.sequence > key.sequence)
            .map(|(_, r)| r.clone()))
    }

    async fn find_by_lot(&self, lot: &LotNo) -> Result<Option<ProductionRun>, StoreError> {
        let map = self.runs.read().map_err(poisoned)?;
        Ok(map
            .values()
            .filter(|r| &r.lot == lot)
            .max_by_key(|r| r.operator_start)
            .cloned())
    }
}

/// Append-only audit trail kept in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<PostingRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<PostingRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: &PostingRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::Conflict(format!(
                "posting record {} already appended",
                record.id
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn latest(&self, key: &PostingKey) -> Result<Option<PostingRecord>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        // Later appends win ties on recorded_at.
        Ok(records
            .iter()
            .enumerate()
            .filter(|(_, r)| &r.key == key)
            .max_by_key(|(idx, r)| (r.recorded_at, *idx))
            .map(|(_, r)| r.clone()))
    }

    async fn records_for_lot(&self, lot: &LotNo) -> Result<Vec<PostingRecord>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.iter().filter(|r| &r.key.lot == lot).cloned().collect())
    }
}

#[derive(Debug, Clone)]
struct PickSheet {
    lot: LotNo,
    sheet: SheetNo,
    posted: bool,
}

#[derive(Debug, Default)]
struct SheetState {
    picks: Vec<PickSheet>,
    pays: HashMap<RunKey, SheetNo>,
    slots: HashMap<(LotNo, LocationCode), StorageSlot>,
}

#[derive(Debug, Default)]
pub struct InMemorySheetStore {
    inner: RwLock<SheetState>,
}

impl InMemorySheetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SheetStore for InMemorySheetStore {
    async fn open_pick_sheet(&self, lot: &LotNo) -> Result<Option<SheetNo>, StoreError> {
        let state = self.inner.read().map_err(poisoned)?;
        Ok(state
            .picks
            .iter()
            .rev()
            .find(|p| &p.lot == lot && !p.posted)
            .map(|p| p.sheet.clone()))
    }

    async fn register_pick_sheet(&self, lot: &LotNo, sheet: &SheetNo) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        if state.picks.iter().any(|p| &p.sheet == sheet) {
            return Err(StoreError::Conflict(format!("pick sheet {sheet} already registered")));
        }
        state.picks.push(PickSheet {
            lot: lot.clone(),
            sheet: sheet.clone(),
            posted: false,
        });
        Ok(())
    }

    async fn mark_pick_sheet_posted(&self, sheet: &SheetNo) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        for p in state.picks.iter_mut().filter(|p| &p.sheet == sheet) {
            p.posted = true;
        }
        Ok(())
    }

    async fn pay_sheet(&self, run: &RunKey) -> Result<Option<SheetNo>, StoreError> {
        let state = self.inner.read().map_err(poisoned)?;
        Ok(state.pays.get(run).cloned())
    }

    async fn register_pay_sheet(&self, run: &RunKey, sheet: &SheetNo) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        match state.pays.get(run) {
            Some(existing) if existing != sheet => Err(StoreError::Conflict(format!(
                "run {run} already has pay sheet {existing}"
            ))),
            _ => {
                state.pays.insert(run.clone(), sheet.clone());
                Ok(())
            }
        }
    }

    async fn storage_slot(
        &self,
        lot: &LotNo,
        location: &LocationCode,
    ) -> Result<Option<StorageSlot>, StoreError> {
        let state = self.inner.read().map_err(poisoned)?;
        Ok(state.slots.get(&(lot.clone(), location.clone())).cloned())
    }

    async fn allocate_storage_slot(
        &self,
        lot: &LotNo,
        location: &LocationCode,
        date: NaiveDate,
    ) -> Result<StorageSlot, StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        let key = (lot.clone(), location.clone());
        if let Some(existing) = state.slots.get(&key) {
            return Ok(existing.clone());
        }
        let sequence = state
            .slots
            .values()
            .filter(|s| &s.location == location && s.date == date)
            .map(|s| s.sequence)
            .max()
            .unwrap_or(0)
            + 1;
        let slot = StorageSlot {
            location: location.clone(),
            date,
            sequence,
        };
        state.slots.insert(key, slot.clone());
        Ok(slot)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBoundaryStore {
    inner: RwLock<HashMap<(RunKey, BoundaryEdge), BoundaryResolution>>,
}

impl InMemoryBoundaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BoundaryStore for InMemoryBoundaryStore {
    async fn get(
        &self,
        run: &RunKey,
        edge: BoundaryEdge,
    ) -> Result<Option<BoundaryResolution>, StoreError> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map.get(&(run.clone(), edge)).cloned())
    }

    async fn insert_once(
        &self,
        resolution: &BoundaryResolution,
    ) -> Result<BoundaryResolution, StoreError> {
        let mut map = self.inner.write().map_err(poisoned)?;
        Ok(map
            .entry((resolution.run.clone(), resolution.edge))
            .or_insert_with(|| resolution.clone())
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use feedpost_core::{FeederId, FormulaVersion, LineId, MaterialCode, ProductCode};
    use feedpost_production::{Continuity, ResolutionSource};
    use feedpost_reconcile::{PostingDraft, PostingOrigin, PostingStatus};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap()
    }

    /// Runs start ahead of `t0`, one hour apart per sequence, so any end at or after `t0` is valid.
    fn run(line: &str, seq: u32, lot: &str, end: Option<DateTime<Utc>>) -> ProductionRun {
        ProductionRun::new(
            RunKey::new(LineId::new(line).unwrap(), seq),
            ProductCode::new("PX").unwrap(),
            LotNo::new(lot).unwrap(),
            FormulaVersion::new("V1").unwrap(),
            1000.0,
            250.0,
            t0() - Duration::hours(12) + Duration::hours(seq as i64),
            end,
        )
        .unwrap()
    }

    fn record(after: f64, recorded_at: DateTime<Utc>) -> PostingRecord {
        let draft = PostingDraft {
            key: PostingKey::pick(
                LotNo::new("LOT-1").unwrap(),
                FeederId::new(1).unwrap(),
                MaterialCode::new("RES-1").unwrap(),
            ),
            run: None,
            sheet_no: SheetNo::new("P-1").unwrap(),
            product: ProductCode::new("PX").unwrap(),
            cumulative_after: after,
            cumulative_before: 0.0,
            location: LocationCode::new("RM01").unwrap(),
            result_token: "OK".to_string(),
            status: PostingStatus::Accepted,
            origin: PostingOrigin::Cycle,
            window_start: t0(),
            window_end: t0(),
        };
        PostingRecord::from_draft(draft, recorded_at).unwrap()
    }

    #[tokio::test]
    async fn neighbours_stay_on_the_same_line() {
        let store = InMemoryRunStore::new();
        store.upsert(run("L1", 1, "A", Some(t0())));
        store.upsert(run("L1", 3, "B", None));
        store.upsert(run("L2", 2, "C", None));
        store.upsert(run("L1", 5, "D", None));

        let key = RunKey::new(LineId::new("L1").unwrap(), 3);
        assert_eq!(store.predecessor(&key).await.unwrap().unwrap().key.sequence, 1);
        assert_eq!(store.successor(&key).await.unwrap().unwrap().key.sequence, 5);

        let first = RunKey::new(LineId::new("L2").unwrap(), 2);
        assert!(store.predecessor(&first).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn active_runs_skip_long_closed_runs() {
        let store = InMemoryRunStore::new();
        store.upsert(run("L1", 1, "A", Some(t0())));
        store.upsert(run("L1", 2, "B", Some(t0() + Duration::hours(5))));
        store.upsert(run("L1", 3, "C", None));

        let active = store.active_runs(t0() + Duration::hours(1)).await.unwrap();
        let seqs: Vec<u32> = active.iter().map(|r| r.key.sequence).collect();
        assert_eq!(seqs, vec![2, 3]);

        // Ending exactly at the cut-off still counts as active.
        let active = store.active_runs(t0()).await.unwrap();
        assert_eq!(active.len(), 3);
    }

    #[tokio::test]
    async fn latest_record_wins_by_time_then_order() {
        let store = InMemoryAuditStore::new();
        let first = record(10.0, t0());
        let second = record(20.0, t0() + Duration::minutes(5));
        let same_time = record(30.0, t0() + Duration::minutes(5));
        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();
        store.append(&same_time).await.unwrap();

        let latest = store.latest(&first.key).await.unwrap().unwrap();
        assert_eq!(latest.cumulative_after, 30.0);
        assert!(matches!(store.append(&first).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn pick_sheet_is_reused_until_posted() {
        let store = InMemorySheetStore::new();
        let lot = LotNo::new("LOT-1").unwrap();
        let sheet = SheetNo::new("P-0001").unwrap();

        assert!(store.open_pick_sheet(&lot).await.unwrap().is_none());
        store.register_pick_sheet(&lot, &sheet).await.unwrap();
        assert_eq!(store.open_pick_sheet(&lot).await.unwrap(), Some(sheet.clone()));

        store.mark_pick_sheet_posted(&sheet).await.unwrap();
        assert!(store.open_pick_sheet(&lot).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn storage_slots_are_sequenced_per_location_and_day() {
        let store = InMemorySheetStore::new();
        let loc = LocationCode::new("FG01").unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let a = LotNo::new("A").unwrap();
        let b = LotNo::new("B").unwrap();

        let first = store.allocate_storage_slot(&a, &loc, day).await.unwrap();
        let again = store.allocate_storage_slot(&a, &loc, day).await.unwrap();
        let second = store.allocate_storage_slot(&b, &loc, day).await.unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(again, first);
        assert_eq!(second.sequence, 2);
        assert_eq!(store.storage_slot(&b, &loc).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn boundary_first_writer_wins() {
        let store = InMemoryBoundaryStore::new();
        let key = RunKey::new(LineId::new("L1").unwrap(), 1);
        let resolution = |minute: i64| BoundaryResolution {
            run: key.clone(),
            edge: BoundaryEdge::Start,
            continuity: Continuity::Discontinuous,
            operator_instant: t0(),
            resolved_instant: t0() + Duration::minutes(minute),
            source: ResolutionSource::Sensor,
        };

        let stored = store.insert_once(&resolution(3)).await.unwrap();
        let second = store.insert_once(&resolution(9)).await.unwrap();
        assert_eq!(stored, second);
        assert_eq!(
            store.get(&key, BoundaryEdge::Start).await.unwrap().unwrap().resolved_instant,
            t0() + Duration::minutes(3)
        );
        assert!(store.get(&key, BoundaryEdge::End).await.unwrap().is_none());
    }
}
