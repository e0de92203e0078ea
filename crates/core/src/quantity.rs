//! Quantity rounding rules.
//!
//! Ledger quantities are rounded by how large a share of the formula the
//! material represents: bulk materials post whole units, minor additives keep
//! up to four decimals so small doses are not rounded away.

use serde::{Deserialize, Serialize};

/// Absolute tolerance used when comparing rounded quantities.
pub const QTY_TOLERANCE: f64 = 1e-9;

/// Decimal precision applied to a cumulative quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingTier {
    /// ratio >= 5%: integer quantities.
    Whole,
    /// 0.1% <= ratio < 5%: one decimal.
    Tenths,
    /// ratio < 0.1%: four decimals.
    TenThousandths,
}

impl RoundingTier {
    pub fn for_ratio(ratio_pct: f64) -> Self {
        if ratio_pct >= 5.0 {
            RoundingTier::Whole
        } else if ratio_pct >= 0.1 {
            RoundingTier::Tenths
        } else {
            RoundingTier::TenThousandths
        }
    }

    pub fn decimals(self) -> u32 {
        match self {
            RoundingTier::Whole => 0,
            RoundingTier::Tenths => 1,
            RoundingTier::TenThousandths => 4,
        }
    }

    /// Round half away from zero at this tier's precision.
    pub fn round(self, value: f64) -> f64 {
        let scale = 10f64.powi(self.decimals() as i32);
        (value * scale).round() / scale
    }

    /// Truncate toward zero at this tier's precision.
    ///
    /// Used for caps, where rounding up would overshoot the planned quantity.
    pub fn floor(self, value: f64) -> f64 {
        let scale = 10f64.powi(self.decimals() as i32);
        ((value * scale) + 1e-6).trunc() / scale
    }
}

/// Compare two quantities within [`QTY_TOLERANCE`].
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= QTY_TOLERANCE
}
