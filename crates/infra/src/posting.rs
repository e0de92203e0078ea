//! Posting ledger client: submits pick/pay entries and keeps the audit trail.
//!
//! Every answer from the ledger (accepted or not) ends up as an audit record;
//! transport failures leave no record so the next cycle simply tries again.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use feedpost_core::{DomainError, LocationCode, LotNo, ProductCode, RunKey, SheetNo};
use feedpost_reconcile::{
    PayEntry, PickEntry, PostingDraft, PostingKey, PostingOrigin, PostingRecord, PostingStatus,
    SheetType,
};

use crate::ledger::{Ledger, LedgerError, LedgerReceipt, PayRequest, PickRequest};
use crate::notify::{Notice, Notifier};
use crate::store::{AuditStore, SheetStore, StoreError};

#[derive(Debug, Error)]
pub enum PostingError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingSettings {
    pub pick_location: LocationCode,
    pub pay_location: LocationCode,
    pub creator: String,
}

/// Run-level facts shared by every entry of one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct PostingContext {
    pub run: RunKey,
    pub lot: LotNo,
    pub product: ProductCode,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub origin: PostingOrigin,
    pub now: DateTime<Utc>,
}

impl PostingContext {
    fn inv_date(&self) -> NaiveDate {
        self.now.date_naive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostingFailure {
    pub key: PostingKey,
    pub error: String,
}

/// What happened to the entries of one submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostingReport {
    pub accepted: Vec<PostingRecord>,
    pub rejected: Vec<PostingRecord>,
    pub failures: Vec<PostingFailure>,
}

impl PostingReport {
    pub fn merge(&mut self, other: PostingReport) {
        self.accepted.extend(other.accepted);
        self.rejected.extend(other.rejected);
        self.failures.extend(other.failures);
    }

    /// Records appended to the audit trail.
    pub fn recorded(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }

    fn push(&mut self, record: PostingRecord) {
        match record.status {
            PostingStatus::Accepted => self.accepted.push(record),
            PostingStatus::Rejected => self.rejected.push(record),
        }
    }
}

pub struct PostingClient {
    ledger: Arc<dyn Ledger>,
    audit: Arc<dyn AuditStore>,
    sheets: Arc<dyn SheetStore>,
    notifier: Arc<dyn Notifier>,
    settings: PostingSettings,
}

impl PostingClient {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        audit: Arc<dyn AuditStore>,
        sheets: Arc<dyn SheetStore>,
        notifier: Arc<dyn Notifier>,
        settings: PostingSettings,
    ) -> Self {
        Self {
            ledger,
            audit,
            sheets,
            notifier,
            settings,
        }
    }

    /// Submit pick entries on the lot's open pick sheet.
    ///
    /// Fails as a whole only when no sheet number can be obtained; per-entry
    /// ledger failures are collected in the report.
    pub async fn post_picks(
        &self,
        ctx: &PostingContext,
        picks: &[PickEntry],
    ) -> Result<PostingReport, PostingError> {
        let mut report = PostingReport::default();
        if picks.is_empty() {
            return Ok(report);
        }

        let sheet = self.pick_sheet(ctx).await?;
        for entry in picks {
            let key = PostingKey::pick(ctx.lot.clone(), entry.feeder, entry.material.clone());
            let request = PickRequest {
                sheet_type: SheetType::Pick,
                sheet_no: sheet.clone(),
                inv_date: ctx.inv_date(),
                product_code: ctx.product.clone(),
                material_code: entry.material.clone(),
                cumulative_qty: entry.new_cumulative,
                sign: -1,
                lot_no: ctx.lot.clone(),
                source_location: self.settings.pick_location.clone(),
                creator: self.settings.creator.clone(),
            };

            let receipt = match self.ledger.post_pick(&request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(run = %ctx.run, key = %key, error = ?e, "pick submission failed");
                    report.failures.push(PostingFailure {
                        key,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let draft = self.draft(
                ctx,
                key,
                &sheet,
                entry.new_cumulative,
                entry.baseline,
                &self.settings.pick_location,
                &receipt,
            );
            report.push(self.record(draft, ctx.now).await?);
        }

        if !report.accepted.is_empty() {
            self.sheets.mark_pick_sheet_posted(&sheet).await?;
        }
        Ok(report)
    }

    /// Submit the run's output cumulative on its pay sheet.
    pub async fn post_pay(
        &self,
        ctx: &PostingContext,
        pay: &PayEntry,
    ) -> Result<PostingReport, PostingError> {
        let mut report = PostingReport::default();
        let key = PostingKey::pay(pay.lot.clone());

        let sheet = self.pay_sheet(ctx).await?;
        let slot = match self
            .sheets
            .storage_slot(&pay.lot, &self.settings.pay_location)
            .await?
        {
            Some(slot) => slot,
            None => {
                self.sheets
                    .allocate_storage_slot(&pay.lot, &self.settings.pay_location, ctx.inv_date())
                    .await?
            }
        };

        let request = PayRequest {
            sheet_type: SheetType::Pay,
            sheet_no: sheet.clone(),
            inv_date: ctx.inv_date(),
            product_code: ctx.product.clone(),
            cumulative_qty: pay.new_cumulative,
            old_qty: pay.baseline,
            sign: if pay.delta() < 0.0 { -1 } else { 1 },
            lot_no: pay.lot.clone(),
            dest_location: self.settings.pay_location.clone(),
            storage_slot: slot.to_string(),
            creator: self.settings.creator.clone(),
        };

        match self.ledger.post_pay(&request).await {
            Ok(receipt) => {
                let draft = self.draft(
                    ctx,
                    key,
                    &sheet,
                    pay.new_cumulative,
                    pay.baseline,
                    &self.settings.pay_location,
                    &receipt,
                );
                report.push(self.record(draft, ctx.now).await?);
            }
            Err(e) => {
                warn!(run = %ctx.run, key = %key, error = ?e, "pay submission failed");
                report.failures.push(PostingFailure {
                    key,
                    error: e.to_string(),
                });
            }
        }
        Ok(report)
    }

    async fn pick_sheet(&self, ctx: &PostingContext) -> Result<SheetNo, PostingError> {
        if let Some(sheet) = self.sheets.open_pick_sheet(&ctx.lot).await? {
            return Ok(sheet);
        }
        let sheet = self
            .ledger
            .next_sheet_no(SheetType::Pick, ctx.inv_date())
            .await?;
        self.sheets.register_pick_sheet(&ctx.lot, &sheet).await?;
        info!(run = %ctx.run, lot = %ctx.lot, sheet = %sheet, "pick sheet minted");
        Ok(sheet)
    }

    async fn pay_sheet(&self, ctx: &PostingContext) -> Result<SheetNo, PostingError> {
        if let Some(sheet) = self.sheets.pay_sheet(&ctx.run).await? {
            return Ok(sheet);
        }
        let sheet = self
            .ledger
            .next_sheet_no(SheetType::Pay, ctx.inv_date())
            .await?;
        self.sheets.register_pay_sheet(&ctx.run, &sheet).await?;
        info!(run = %ctx.run, lot = %ctx.lot, sheet = %sheet, "pay sheet minted");
        Ok(sheet)
    }

    #[allow(clippy::too_many_arguments)]
    fn draft(
        &self,
        ctx: &PostingContext,
        key: PostingKey,
        sheet: &SheetNo,
        after: f64,
        before: f64,
        location: &LocationCode,
        receipt: &LedgerReceipt,
    ) -> PostingDraft {
        PostingDraft {
            key,
            run: Some(ctx.run.clone()),
            sheet_no: sheet.clone(),
            product: ctx.product.clone(),
            cumulative_after: after,
            cumulative_before: before,
            location: location.clone(),
            result_token: receipt.result.clone(),
            status: if receipt.is_success() {
                PostingStatus::Accepted
            } else {
                PostingStatus::Rejected
            },
            origin: ctx.origin,
            window_start: ctx.window_start,
            window_end: ctx.window_end,
        }
    }

    async fn record(
        &self,
        draft: PostingDraft,
        now: DateTime<Utc>,
    ) -> Result<PostingRecord, PostingError> {
        let record = PostingRecord::from_draft(draft, now)?;
        self.audit.append(&record).await?;

        match record.status {
            PostingStatus::Accepted => {
                info!(
                    key = %record.key,
                    sheet = %record.sheet_no,
                    before = record.cumulative_before,
                    after = record.cumulative_after,
                    delta = record.delta,
                    origin = record.origin.as_str(),
                    "posting accepted"
                );
            }
            PostingStatus::Rejected => {
                warn!(key = %record.key, token = %record.result_token, "posting rejected by ledger");
                self.notifier.notify(Notice::PostingRejected {
                    key: record.key.clone(),
                    token: record.result_token.clone(),
                    cumulative_after: record.cumulative_after,
                });
            }
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::notify::InMemoryNotifier;
    use crate::store::{InMemoryAuditStore, InMemorySheetStore};
    use chrono::TimeZone;
    use feedpost_core::{FeederId, LineId, MaterialCode};

    struct Fixture {
        ledger: Arc<InMemoryLedger>,
        audit: Arc<InMemoryAuditStore>,
        sheets: Arc<InMemorySheetStore>,
        notifier: Arc<InMemoryNotifier>,
        client: PostingClient,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryLedger::new());
        let audit = Arc::new(InMemoryAuditStore::new());
        let sheets = Arc::new(InMemorySheetStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let client = PostingClient::new(
            ledger.clone(),
            audit.clone(),
            sheets.clone(),
            notifier.clone(),
            PostingSettings {
                pick_location: LocationCode::new("RM01").unwrap(),
                pay_location: LocationCode::new("FG01").unwrap(),
                creator: "feedpost".to_string(),
            },
        );
        Fixture {
            ledger,
            audit,
            sheets,
            notifier,
            client,
        }
    }

    fn ctx(minute: i64) -> PostingContext {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
        PostingContext {
            run: RunKey::new(LineId::new("L1").unwrap(), 1),
            lot: LotNo::new("LOT-1").unwrap(),
            product: ProductCode::new("P-100").unwrap(),
            window_start: t0,
            window_end: t0 + chrono::Duration::minutes(minute),
            origin: PostingOrigin::Cycle,
            now: t0 + chrono::Duration::minutes(minute),
        }
    }

    fn pick(feeder: u16, material: &str, after: f64, before: f64) -> PickEntry {
        PickEntry {
            feeder: FeederId::new(feeder).unwrap(),
            material: MaterialCode::new(material).unwrap(),
            new_cumulative: after,
            baseline: before,
        }
    }

    #[tokio::test]
    async fn picks_submit_cumulative_and_record_delta() {
        let f = fixture();
        let report = f
            .client
            .post_picks(&ctx(10), &[pick(1, "M-1", 250.0, 100.0)])
            .await
            .unwrap();

        assert_eq!(report.accepted.len(), 1);
        let sent = &f.ledger.picks()[0];
        assert_eq!(sent.cumulative_qty, 250.0);
        assert_eq!(sent.sign, -1);

        let record = &f.audit.all()[0];
        assert_eq!(record.delta, 150.0);
        assert!(record.is_consistent());
        assert_eq!(record.status, PostingStatus::Accepted);
    }

    #[tokio::test]
    async fn posted_pick_sheet_is_not_reused() {
        let f = fixture();
        f.client.post_picks(&ctx(10), &[pick(1, "M-1", 10.0, 0.0)]).await.unwrap();
        f.client.post_picks(&ctx(20), &[pick(1, "M-1", 20.0, 10.0)]).await.unwrap();

        let sheets: Vec<_> = f.ledger.picks().iter().map(|p| p.sheet_no.clone()).collect();
        assert_ne!(sheets[0], sheets[1]);
    }

    #[tokio::test]
    async fn unposted_pick_sheet_is_reused_after_transport_failure() {
        let f = fixture();
        f.ledger.set_offline(true);
        // Sheet numbering fails too: nothing minted, whole submission errors.
        assert!(f.client.post_picks(&ctx(10), &[pick(1, "M-1", 10.0, 0.0)]).await.is_err());

        f.ledger.set_offline(false);
        let sheet = f.ledger.next_sheet_no(SheetType::Pick, ctx(10).inv_date()).await.unwrap();
        f.sheets.register_pick_sheet(&ctx(10).lot, &sheet).await.unwrap();

        f.client.post_picks(&ctx(20), &[pick(1, "M-1", 10.0, 0.0)]).await.unwrap();
        assert_eq!(f.ledger.picks()[0].sheet_no, sheet);
        assert!(f.sheets.open_pick_sheet(&ctx(20).lot).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejection_is_recorded_and_notified() {
        let f = fixture();
        f.ledger.reject_material(MaterialCode::new("M-2").unwrap());

        let report = f
            .client
            .post_picks(&ctx(10), &[pick(1, "M-1", 5.0, 0.0), pick(2, "M-2", 7.0, 0.0)])
            .await
            .unwrap();

        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].result_token, "REJECTED");
        assert_eq!(f.audit.all().len(), 2);
        assert!(matches!(f.notifier.all()[0], Notice::PostingRejected { .. }));
    }

    #[tokio::test]
    async fn pay_reuses_sheet_and_storage_slot_per_run() {
        let f = fixture();
        let c = ctx(10);
        let first = PayEntry {
            run: c.run.clone(),
            lot: c.lot.clone(),
            new_cumulative: 150.0,
            baseline: 0.0,
        };
        let second = PayEntry {
            new_cumulative: 120.0,
            baseline: 150.0,
            ..first.clone()
        };

        f.client.post_pay(&c, &first).await.unwrap();
        f.client.post_pay(&ctx(20), &second).await.unwrap();

        let pays = f.ledger.pays();
        assert_eq!(pays[0].sheet_no, pays[1].sheet_no);
        assert_eq!(pays[0].storage_slot, "FG01-20260301-001");
        assert_eq!(pays[1].storage_slot, pays[0].storage_slot);
        assert_eq!((pays[0].sign, pays[1].sign), (1, -1));
        assert_eq!(pays[1].old_qty, 150.0);
    }

    #[tokio::test]
    async fn pay_transport_failure_leaves_no_record() {
        let f = fixture();
        let c = ctx(10);
        f.client
            .post_pay(&c, &PayEntry { run: c.run.clone(), lot: c.lot.clone(), new_cumulative: 1.0, baseline: 0.0 })
            .await
            .unwrap();

        f.ledger.set_offline(true);
        // Sheet and slot already exist; only the submission itself fails.
        let report = f
            .client
            .post_pay(&c, &PayEntry { run: c.run.clone(), lot: c.lot.clone(), new_cumulative: 2.0, baseline: 1.0 })
            .await
            .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(f.audit.all().len(), 1);
    }
}
