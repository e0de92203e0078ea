use serde::{Deserialize, Serialize};
use thiserror::Error;

use feedpost_core::{DomainError, FeederId, FormulaVersion, LineId, MaterialCode, ProductCode};

/// Semi-finished ratio group a material belongs to.
///
/// Materials in the same group are produced upstream and shared by ratio
/// among the feeders of one run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RatioGroup {
    A,
    B,
}

impl RatioGroup {
    /// Parse the formula's semi-finished flag column (`""`, `"A"`, `"B"`).
    pub fn parse_flag(flag: &str) -> Result<Option<Self>, DomainError> {
        match flag.trim().to_ascii_uppercase().as_str() {
            "" | "N" | "NONE" => Ok(None),
            "A" => Ok(Some(RatioGroup::A)),
            "B" => Ok(Some(RatioGroup::B)),
            other => Err(DomainError::validation(format!(
                "unknown semi-finished flag '{other}'"
            ))),
        }
    }

    pub fn as_flag(self) -> &'static str {
        match self {
            RatioGroup::A => "A",
            RatioGroup::B => "B",
        }
    }
}

/// Lookup key of a formula: (line, version, product).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormulaKey {
    pub line: LineId,
    pub version: FormulaVersion,
    pub product: ProductCode,
}

impl core::fmt::Display for FormulaKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}/{}", self.line, self.version, self.product)
    }
}

/// One row of the formula table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaRow {
    pub feeder: FeederId,
    pub material: MaterialCode,
    /// Share of the finished product, in percent.
    pub ratio_pct: f64,
    pub semi_finished: Option<RatioGroup>,
    pub tolerance_pct: f64,
    /// Maximum feeder throughput from the formula (units per hour), if recorded.
    pub max_load_per_hour: Option<f64>,
}

/// Entry of the run-specific feeding-control table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedOverride {
    pub feeder: FeederId,
    /// Position of the entry within the feeder's override list.
    pub sequence: u32,
    pub material: MaterialCode,
}

/// Resolved feeder → material mapping for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeederAssignment {
    pub feeder: FeederId,
    pub material: MaterialCode,
    pub semi_finished: Option<RatioGroup>,
    pub ratio_pct: f64,
    pub tolerance_pct: f64,
    pub max_load_per_hour: Option<f64>,
    /// True when the material came from the feeding-control table.
    pub overridden: bool,
}

/// Ordered feed plan for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPlan {
    pub key: FormulaKey,
    assignments: Vec<FeederAssignment>,
    /// Feeders whose override listed more than one material (first one used).
    pub ambiguous_overrides: Vec<FeederId>,
}

impl FeedPlan {
    pub fn assignments(&self) -> &[FeederAssignment] {
        &self.assignments
    }

    /// Highest feeder index referenced by the plan.
    pub fn feeder_count(&self) -> u16 {
        self.assignments
            .iter()
            .map(|a| a.feeder.index())
            .max()
            .unwrap_or(0)
    }

    /// Sum of formula ratios of all assignments in `group`.
    pub fn group_ratio(&self, group: RatioGroup) -> f64 {
        self.assignments
            .iter()
            .filter(|a| a.semi_finished == Some(group))
            .map(|a| a.ratio_pct)
            .sum()
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecipeError {
    /// No formula row exists for the (line, version, product) triple.
    #[error("no formula configured for {0}")]
    ConfigurationMissing(FormulaKey),

    #[error(transparent)]
    Invalid(#[from] DomainError),
}

/// Resolve the feed plan for a run.
///
/// - Rows are ordered by feeder index (stable for rows sharing a feeder).
/// - A feeder listed exactly once in the formula takes its material from the
///   override table when the table has an entry for it; ratio, group flag,
///   tolerance and max load stay those of the formula row.
/// - A feeder listed several times in the formula ignores overrides.
pub fn resolve_feed_plan(
    key: FormulaKey,
    rows: &[FormulaRow],
    overrides: &[FeedOverride],
) -> Result<FeedPlan, RecipeError> {
    if rows.is_empty() {
        return Err(RecipeError::ConfigurationMissing(key));
    }

    for row in rows {
        validate_row(row)?;
    }

    let mut ordered: Vec<&FormulaRow> = rows.iter().collect();
    ordered.sort_by_key(|r| r.feeder);

    let mut assignments = Vec::with_capacity(ordered.len());
    let mut ambiguous_overrides = Vec::new();

    for row in ordered {
        let formula_entries = rows.iter().filter(|r| r.feeder == row.feeder).count();

        let mut candidates: Vec<&FeedOverride> =
            overrides.iter().filter(|o| o.feeder == row.feeder).collect();
        candidates.sort_by_key(|o| o.sequence);

        let (material, overridden) = match (formula_entries, candidates.first()) {
            (1, Some(first)) => {
                if candidates.len() > 1 {
                    ambiguous_overrides.push(row.feeder);
                }
                (first.material.clone(), true)
            }
            _ => (row.material.clone(), false),
        };

        assignments.push(FeederAssignment {
            feeder: row.feeder,
            material,
            semi_finished: row.semi_finished,
            ratio_pct: row.ratio_pct,
            tolerance_pct: row.tolerance_pct,
            max_load_per_hour: row.max_load_per_hour,
            overridden,
        });
    }

    Ok(FeedPlan {
        key,
        assignments,
        ambiguous_overrides,
    })
}

fn validate_row(row: &FormulaRow) -> Result<(), DomainError> {
    if !(row.ratio_pct.is_finite() && (0.0..=100.0).contains(&row.ratio_pct)) {
        return Err(DomainError::validation(format!(
            "feeder {} ratio {} outside 0..=100",
            row.feeder, row.ratio_pct
        )));
    }
    if !(row.tolerance_pct.is_finite() && row.tolerance_pct >= 0.0) {
        return Err(DomainError::validation(format!(
            "feeder {} tolerance must be non-negative",
            row.feeder
        )));
    }
    if let Some(max) = row.max_load_per_hour {
        if !(max.is_finite() && max > 0.0) {
            return Err(DomainError::validation(format!(
                "feeder {} max load must be positive",
                row.feeder
            )));
        }
    }
    Ok(())
}
