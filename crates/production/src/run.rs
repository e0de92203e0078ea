use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use feedpost_core::{DomainError, FormulaVersion, LotNo, ProductCode, RunKey};

use crate::boundary::{BoundaryEdge, BoundaryResolution, Continuity};

/// A scheduled production order on one line.
///
/// Operator timestamps come from the shop floor and are coarse. The resolved
/// timestamps are filled in once by the boundary estimator and never change
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionRun {
    pub key: RunKey,
    pub product: ProductCode,
    pub lot: LotNo,
    pub formula_version: FormulaVersion,
    /// Planned total output weight for the run.
    pub planned_weight: f64,
    /// Planned throughput (units per hour).
    pub planned_rate_per_hour: f64,
    pub operator_start: DateTime<Utc>,
    pub operator_end: Option<DateTime<Utc>>,
    resolved_start: Option<DateTime<Utc>>,
    resolved_end: Option<DateTime<Utc>>,
    start_continuity: Option<Continuity>,
    end_continuity: Option<Continuity>,
}

impl ProductionRun {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: RunKey,
        product: ProductCode,
        lot: LotNo,
        formula_version: FormulaVersion,
        planned_weight: f64,
        planned_rate_per_hour: f64,
        operator_start: DateTime<Utc>,
        operator_end: Option<DateTime<Utc>>,
    ) -> Result<Self, DomainError> {
        if !(planned_weight.is_finite() && planned_weight > 0.0) {
            return Err(DomainError::validation("planned weight must be positive"));
        }
        if !(planned_rate_per_hour.is_finite() && planned_rate_per_hour >= 0.0) {
            return Err(DomainError::validation("planned rate must be non-negative"));
        }
        if let Some(end) = operator_end {
            if end < operator_start {
                return Err(DomainError::validation("operator end precedes operator start"));
            }
        }
        Ok(Self {
            key,
            product,
            lot,
            formula_version,
            planned_weight,
            planned_rate_per_hour,
            operator_start,
            operator_end,
            resolved_start: None,
            resolved_end: None,
            start_continuity: None,
            end_continuity: None,
        })
    }

    /// True once the operator has entered an end time.
    pub fn is_closed(&self) -> bool {
        self.operator_end.is_some()
    }

    pub fn resolved_start(&self) -> Option<DateTime<Utc>> {
        self.resolved_start
    }

    pub fn resolved_end(&self) -> Option<DateTime<Utc>> {
        self.resolved_end
    }

    pub fn start_continuity(&self) -> Option<Continuity> {
        self.start_continuity
    }

    pub fn end_continuity(&self) -> Option<Continuity> {
        self.end_continuity
    }

    /// Record a persisted boundary resolution on the run.
    ///
    /// Applying the same resolution twice is a no-op; applying a different
    /// one to an already-resolved edge is an invariant violation.
    pub fn apply_resolution(&mut self, resolution: &BoundaryResolution) -> Result<(), DomainError> {
        if resolution.run != self.key {
            return Err(DomainError::invariant(format!(
                "resolution for {} applied to {}",
                resolution.run, self.key
            )));
        }

        let (instant, continuity) = match resolution.edge {
            BoundaryEdge::Start => (&mut self.resolved_start, &mut self.start_continuity),
            BoundaryEdge::End => (&mut self.resolved_end, &mut self.end_continuity),
        };

        match *instant {
            Some(existing) if existing != resolution.resolved_instant => {
                Err(DomainError::invariant(format!(
                    "{:?} boundary of {} already resolved to {existing}",
                    resolution.edge, self.key
                )))
            }
            _ => {
                *instant = Some(resolution.resolved_instant);
                *continuity = Some(resolution.continuity);
                Ok(())
            }
        }
    }
}
