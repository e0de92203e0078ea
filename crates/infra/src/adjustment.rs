//! Operator adjustments: post a corrected cumulative for one key.
//!
//! Adjustments are the only way out of a held key: the corrected total goes
//! through the same ledger client and lands in the audit trail with origin
//! `Adjustment`, becoming the baseline of the next cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use feedpost_core::{approx_eq, DomainError, FeederId, LotNo, MaterialCode, ProductCode};
use feedpost_reconcile::{Baseline, PayEntry, PickEntry, PostingKey, PostingOrigin, PostingRecord};

use crate::driver::{CycleError, Driver};
use crate::posting::{PostingContext, PostingError};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sheet", rename_all = "snake_case")]
pub enum AdjustmentTarget {
    Pick {
        feeder: FeederId,
        material: MaterialCode,
    },
    Pay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub lot: LotNo,
    pub product: ProductCode,
    #[serde(flatten)]
    pub target: AdjustmentTarget,
    /// Cumulative the operator believes is currently posted.
    pub before: f64,
    /// Corrected cumulative.
    pub after: f64,
}

impl AdjustmentRequest {
    pub fn key(&self) -> PostingKey {
        match &self.target {
            AdjustmentTarget::Pick { feeder, material } => {
                PostingKey::pick(self.lot.clone(), *feeder, material.clone())
            }
            AdjustmentTarget::Pay => PostingKey::pay(self.lot.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdjustmentError {
    #[error("no run found for lot {0}")]
    UnknownLot(LotNo),

    #[error("lot {lot} was produced as {actual}, not {requested}")]
    ProductMismatch {
        lot: LotNo,
        requested: ProductCode,
        actual: ProductCode,
    },

    /// The audit trail moved on since the operator looked at it.
    #[error("stale adjustment for {key}: posted cumulative is {posted}, request assumed {given}")]
    BaselineMismatch {
        key: PostingKey,
        posted: f64,
        given: f64,
    },

    #[error("ledger unreachable: {0}")]
    Unreachable(String),

    #[error(transparent)]
    Busy(#[from] CycleError),

    #[error(transparent)]
    Posting(#[from] PostingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl Driver {
    /// Post an operator correction for one pick or pay key.
    ///
    /// Holds the run's guard so it never interleaves with a cycle of the same
    /// run. Returns the appended record (accepted or rejected).
    pub async fn apply_adjustment(
        &self,
        request: &AdjustmentRequest,
        now: DateTime<Utc>,
    ) -> Result<PostingRecord, AdjustmentError> {
        if !(request.before.is_finite() && request.after.is_finite()) {
            return Err(DomainError::validation("adjustment quantities must be finite").into());
        }
        if request.after < 0.0 {
            return Err(DomainError::validation("adjusted cumulative cannot be negative").into());
        }

        let run = self
            .runs
            .find_by_lot(&request.lot)
            .await?
            .ok_or_else(|| AdjustmentError::UnknownLot(request.lot.clone()))?;
        if run.product != request.product {
            return Err(AdjustmentError::ProductMismatch {
                lot: request.lot.clone(),
                requested: request.product.clone(),
                actual: run.product.clone(),
            });
        }

        let _permit = self.guard.acquire(&run.key)?;

        let key = request.key();
        let latest = self.audit.latest(&key).await?;
        let posted = Baseline::from_latest(latest.as_ref()).cumulative;
        if !approx_eq(posted, request.before) {
            return Err(AdjustmentError::BaselineMismatch {
                key,
                posted,
                given: request.before,
            });
        }

        let ctx = PostingContext {
            run: run.key.clone(),
            lot: run.lot.clone(),
            product: run.product.clone(),
            window_start: run.resolved_start().unwrap_or(run.operator_start).min(now),
            window_end: now,
            origin: PostingOrigin::Adjustment,
            now,
        };
        let report = match &request.target {
            AdjustmentTarget::Pick { feeder, material } => {
                let entry = PickEntry {
                    feeder: *feeder,
                    material: material.clone(),
                    new_cumulative: request.after,
                    baseline: request.before,
                };
                self.posting.post_picks(&ctx, &[entry]).await?
            }
            AdjustmentTarget::Pay => {
                let entry = PayEntry {
                    run: run.key.clone(),
                    lot: run.lot.clone(),
                    new_cumulative: request.after,
                    baseline: request.before,
                };
                self.posting.post_pay(&ctx, &entry).await?
            }
        };

        if let Some(failure) = report.failures.into_iter().next() {
            return Err(AdjustmentError::Unreachable(failure.error));
        }
        let record = report
            .accepted
            .into_iter()
            .chain(report.rejected)
            .next()
            .ok_or_else(|| DomainError::invariant(format!("adjustment of {key} produced no record")))?;

        info!(
            run = %run.key,
            key = %record.key,
            before = record.cumulative_before,
            after = record.cumulative_after,
            status = record.status.as_str(),
            "adjustment posted"
        );
        Ok(record)
    }
}
