//! Ledger postings and the audit records that track them.
//!
//! The audit trail is the only source of "previously posted" state: the most
//! recent record for a key is the baseline of the next cycle.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use feedpost_core::{
    approx_eq, DomainError, FeederId, LocationCode, LotNo, MaterialCode, PostingId, ProductCode,
    RunKey, SheetNo,
};

/// Ledger document type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetType {
    /// Material consumption (issue to production).
    Pick,
    /// Finished output (receipt from production).
    Pay,
}

impl SheetType {
    pub fn as_str(self) -> &'static str {
        match self {
            SheetType::Pick => "pick",
            SheetType::Pay => "pay",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pick" => Ok(SheetType::Pick),
            "pay" => Ok(SheetType::Pay),
            other => Err(DomainError::validation(format!("unknown sheet type '{other}'"))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingStatus {
    Accepted,
    /// The ledger answered with a non-success token. Kept for manual triage.
    Rejected,
}

impl PostingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostingStatus::Accepted => "accepted",
            PostingStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingOrigin {
    Cycle,
    Adjustment,
}

impl PostingOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            PostingOrigin::Cycle => "cycle",
            PostingOrigin::Adjustment => "adjustment",
        }
    }
}

/// Baseline key: (lot, sheet type[, feeder, material]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostingKey {
    pub lot: LotNo,
    pub sheet_type: SheetType,
    pub feeder: Option<FeederId>,
    pub material: Option<MaterialCode>,
}

impl PostingKey {
    pub fn pick(lot: LotNo, feeder: FeederId, material: MaterialCode) -> Self {
        Self {
            lot,
            sheet_type: SheetType::Pick,
            feeder: Some(feeder),
            material: Some(material),
        }
    }

    pub fn pay(lot: LotNo) -> Self {
        Self {
            lot,
            sheet_type: SheetType::Pay,
            feeder: None,
            material: None,
        }
    }
}

impl core::fmt::Display for PostingKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.lot, self.sheet_type.as_str())?;
        if let Some(feeder) = self.feeder {
            write!(f, "/{feeder}")?;
        }
        if let Some(material) = &self.material {
            write!(f, "/{material}")?;
        }
        Ok(())
    }
}

/// Everything needed to append a record, minus the derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingDraft {
    pub key: PostingKey,
    pub run: Option<RunKey>,
    pub sheet_no: SheetNo,
    pub product: ProductCode,
    pub cumulative_after: f64,
    pub cumulative_before: f64,
    pub location: LocationCode,
    pub result_token: String,
    pub status: PostingStatus,
    pub origin: PostingOrigin,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingRecord {
    pub id: PostingId,
    pub key: PostingKey,
    pub run: Option<RunKey>,
    pub sheet_no: SheetNo,
    pub product: ProductCode,
    pub cumulative_after: f64,
    pub cumulative_before: f64,
    pub delta: f64,
    pub location: LocationCode,
    pub result_token: String,
    pub status: PostingStatus,
    pub origin: PostingOrigin,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl PostingRecord {
    /// Build a record, deriving `delta = after - before`.
    pub fn from_draft(draft: PostingDraft, recorded_at: DateTime<Utc>) -> Result<Self, DomainError> {
        if !(draft.cumulative_after.is_finite() && draft.cumulative_before.is_finite()) {
            return Err(DomainError::validation("cumulative quantities must be finite"));
        }
        if draft.window_end < draft.window_start {
            return Err(DomainError::validation("posting window ends before it starts"));
        }
        match draft.key.sheet_type {
            SheetType::Pick if draft.key.feeder.is_none() || draft.key.material.is_none() => {
                return Err(DomainError::validation(
                    "pick postings require a feeder and a material",
                ));
            }
            SheetType::Pay if draft.key.feeder.is_some() || draft.key.material.is_some() => {
                return Err(DomainError::validation(
                    "pay postings are keyed by lot only",
                ));
            }
            _ => {}
        }

        Ok(Self {
            id: PostingId::new(),
            delta: draft.cumulative_after - draft.cumulative_before,
            key: draft.key,
            run: draft.run,
            sheet_no: draft.sheet_no,
            product: draft.product,
            cumulative_after: draft.cumulative_after,
            cumulative_before: draft.cumulative_before,
            location: draft.location,
            result_token: draft.result_token,
            status: draft.status,
            origin: draft.origin,
            window_start: draft.window_start,
            window_end: draft.window_end,
            recorded_at,
        })
    }

    /// `after - before == delta` (within tolerance).
    pub fn is_consistent(&self) -> bool {
        approx_eq(self.cumulative_after - self.cumulative_before, self.delta)
    }
}

/// Previously posted state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub cumulative: f64,
    /// End of the window covered by the baseline posting, if any.
    pub as_of: Option<DateTime<Utc>>,
    /// The latest attempt was rejected by the ledger; wait for an adjustment.
    pub held: bool,
}

impl Baseline {
    pub const ZERO: Baseline = Baseline {
        cumulative: 0.0,
        as_of: None,
        held: false,
    };

    /// Derive the baseline from the most recent record for a key.
    ///
    /// A rejected record carries the accepted total in `cumulative_before`.
    pub fn from_latest(latest: Option<&PostingRecord>) -> Self {
        match latest {
            None => Baseline::ZERO,
            Some(r) => match r.status {
                PostingStatus::Accepted => Baseline {
                    cumulative: r.cumulative_after,
                    as_of: Some(r.window_end),
                    held: false,
                },
                PostingStatus::Rejected => Baseline {
                    cumulative: r.cumulative_before,
                    as_of: Some(r.window_end),
                    held: true,
                },
            },
        }
    }
}

/// Pick baselines for a run, keyed by (feeder, material).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaselineSet {
    inner: HashMap<(FeederId, MaterialCode), Baseline>,
}

impl BaselineSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feeder: FeederId, material: MaterialCode, baseline: Baseline) {
        self.inner.insert((feeder, material), baseline);
    }

    /// Baseline for a key; zero when nothing was ever posted.
    pub fn get(&self, feeder: FeederId, material: &MaterialCode) -> Baseline {
        self.inner
            .get(&(feeder, material.clone()))
            .copied()
            .unwrap_or(Baseline::ZERO)
    }
}

/// Consumption line to post this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickEntry {
    pub feeder: FeederId,
    pub material: MaterialCode,
    pub new_cumulative: f64,
    pub baseline: f64,
}

impl PickEntry {
    pub fn delta(&self) -> f64 {
        self.new_cumulative - self.baseline
    }
}

/// Output line to post this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayEntry {
    pub run: RunKey,
    pub lot: LotNo,
    pub new_cumulative: f64,
    pub baseline: f64,
}

impl PayEntry {
    pub fn delta(&self) -> f64 {
        self.new_cumulative - self.baseline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draft(sheet_type: SheetType, after: f64, before: f64) -> PostingDraft {
        let lot = LotNo::new("LOT-1").unwrap();
        let key = match sheet_type {
            SheetType::Pick => PostingKey::pick(
                lot,
                FeederId::new(1).unwrap(),
                MaterialCode::new("RES-1").unwrap(),
            ),
            SheetType::Pay => PostingKey::pay(lot),
        };
        PostingDraft {
            key,
            run: None,
            sheet_no: SheetNo::new("S-1").unwrap(),
            product: ProductCode::new("PX").unwrap(),
            cumulative_after: after,
            cumulative_before: before,
            location: LocationCode::new("WH1").unwrap(),
            result_token: "OK".to_string(),
            status: PostingStatus::Accepted,
            origin: PostingOrigin::Cycle,
            window_start: Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap(),
            window_end: Utc.with_ymd_and_hms(2026, 3, 1, 7, 0, 0).unwrap(),
        }
    }

    #[test]
    fn record_derives_delta() {
        let r = PostingRecord::from_draft(draft(SheetType::Pick, 150.0, 40.0), Utc::now()).unwrap();
        assert_eq!(r.delta, 110.0);
        assert!(r.is_consistent());
    }

    #[test]
    fn pay_record_rejects_feeder_key() {
        let mut d = draft(SheetType::Pay, 10.0, 0.0);
        d.key.feeder = Some(FeederId::new(2).unwrap());
        assert!(PostingRecord::from_draft(d, Utc::now()).is_err());
    }

    #[test]
    fn rejected_record_holds_previous_total() {
        let mut d = draft(SheetType::Pick, 150.0, 40.0);
        d.status = PostingStatus::Rejected;
        let r = PostingRecord::from_draft(d, Utc::now()).unwrap();

        let b = Baseline::from_latest(Some(&r));
        assert_eq!(b.cumulative, 40.0);
        assert!(b.held);
        assert_eq!(Baseline::from_latest(None), Baseline::ZERO);
    }
}
