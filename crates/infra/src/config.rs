//! Engine configuration, loaded from `FEEDPOST_*` environment variables.
//!
//! Durations are given in minutes unless the variable name says otherwise.
//! Unset or unparsable values fall back to the defaults below (with a warning
//! for the unparsable case).

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use feedpost_core::LocationCode;
use feedpost_production::BoundaryPolicy;
use feedpost_reconcile::ReconcileThresholds;

use crate::posting::PostingSettings;
use crate::sampler::SamplerSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Time between scheduled cycles.
    pub cadence: Duration,
    /// How far back a closed run stays eligible for reconciliation.
    pub lookback: Duration,
    /// Operator gap below which two runs count as continuous.
    pub continuity_threshold: Duration,
    /// Proxy-signal level that counts as "line running".
    pub on_signal_threshold: f64,
    /// Symmetric widening of accumulator windows to absorb outages.
    pub gap_allowance: Duration,
    /// Windows ending further back than this are read from the archive.
    pub archive_after: Duration,
    pub epsilon: f64,
    pub default_max_hourly_rate: f64,
    pub outage_allowance_hours: f64,
    /// Pick source location.
    pub pick_location: LocationCode,
    /// Pay destination location.
    pub pay_location: LocationCode,
    /// Creator recorded on ledger documents.
    pub creator: String,
    /// Metric topic prefix; the line id is appended.
    pub topic_prefix: String,
    pub metric_base_url: Option<String>,
    pub ledger_base_url: Option<String>,
    pub database_url: Option<String>,
    pub use_persistent_stores: bool,
    pub bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let thresholds = ReconcileThresholds::default();
        Self {
            cadence: Duration::from_secs(10 * 60),
            lookback: Duration::from_secs(24 * 60 * 60),
            continuity_threshold: Duration::from_secs(30 * 60),
            on_signal_threshold: 20.0,
            gap_allowance: Duration::from_secs(5 * 60),
            archive_after: Duration::from_secs(7 * 24 * 60 * 60),
            epsilon: thresholds.epsilon,
            default_max_hourly_rate: thresholds.default_max_hourly_rate,
            outage_allowance_hours: thresholds.outage_allowance_hours,
            pick_location: LocationCode::from_static("RM01"),
            pay_location: LocationCode::from_static("FG01"),
            creator: "feedpost".to_string(),
            topic_prefix: "line/".to_string(),
            metric_base_url: None,
            ledger_base_url: None,
            database_url: None,
            use_persistent_stores: false,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let cfg = Self {
            cadence: minutes(&lookup, "FEEDPOST_CADENCE_MINUTES", d.cadence),
            lookback: minutes(&lookup, "FEEDPOST_LOOKBACK_MINUTES", d.lookback),
            continuity_threshold: minutes(
                &lookup,
                "FEEDPOST_CONTINUITY_THRESHOLD_MINUTES",
                d.continuity_threshold,
            ),
            on_signal_threshold: parsed(&lookup, "FEEDPOST_ON_SIGNAL_THRESHOLD", d.on_signal_threshold),
            gap_allowance: minutes(&lookup, "FEEDPOST_GAP_ALLOWANCE_MINUTES", d.gap_allowance),
            archive_after: minutes(&lookup, "FEEDPOST_ARCHIVE_AFTER_MINUTES", d.archive_after),
            epsilon: parsed(&lookup, "FEEDPOST_EPSILON", d.epsilon),
            default_max_hourly_rate: parsed(
                &lookup,
                "FEEDPOST_MAX_HOURLY_RATE",
                d.default_max_hourly_rate,
            ),
            outage_allowance_hours: parsed(
                &lookup,
                "FEEDPOST_OUTAGE_ALLOWANCE_HOURS",
                d.outage_allowance_hours,
            ),
            pick_location: location(&lookup, "FEEDPOST_PICK_LOCATION", d.pick_location),
            pay_location: location(&lookup, "FEEDPOST_PAY_LOCATION", d.pay_location),
            creator: lookup("FEEDPOST_CREATOR").unwrap_or(d.creator),
            topic_prefix: lookup("FEEDPOST_TOPIC_PREFIX").unwrap_or(d.topic_prefix),
            metric_base_url: lookup("FEEDPOST_METRIC_URL"),
            ledger_base_url: lookup("FEEDPOST_LEDGER_URL"),
            database_url: lookup("DATABASE_URL"),
            use_persistent_stores: lookup("USE_PERSISTENT_STORES")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            bind_addr: lookup("FEEDPOST_BIND_ADDR").unwrap_or(d.bind_addr),
        };

        info!(
            cadence_secs = cfg.cadence.as_secs(),
            lookback_secs = cfg.lookback.as_secs(),
            continuity_threshold_secs = cfg.continuity_threshold.as_secs(),
            persistent = cfg.use_persistent_stores,
            "engine configuration loaded"
        );
        cfg
    }

    pub fn thresholds(&self) -> ReconcileThresholds {
        ReconcileThresholds {
            epsilon: self.epsilon,
            default_max_hourly_rate: self.default_max_hourly_rate,
            outage_allowance_hours: self.outage_allowance_hours,
        }
    }

    pub fn boundary_policy(&self) -> BoundaryPolicy {
        BoundaryPolicy {
            continuity_threshold: chrono_duration(self.continuity_threshold),
        }
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            gap_allowance: self.gap_allowance,
            archive_after: self.archive_after,
            on_threshold: self.on_signal_threshold,
        }
    }

    pub fn posting_settings(&self) -> PostingSettings {
        PostingSettings {
            pick_location: self.pick_location.clone(),
            pay_location: self.pay_location.clone(),
            creator: self.creator.clone(),
        }
    }

    pub fn topic_for(&self, line: &feedpost_core::LineId) -> String {
        format!("{}{}", self.topic_prefix, line)
    }
}

/// Convert a std duration for chrono arithmetic (saturating).
pub fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, "unparsable configuration value; using default");
                default
            }
        },
    }
}

fn minutes<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let default_minutes = default.as_secs_f64() / 60.0;
    let value = parsed(lookup, key, default_minutes);
    match Duration::try_from_secs_f64(value * 60.0) {
        Ok(d) => d,
        Err(_) => {
            warn!(key, value, "duration out of range; using default");
            default
        }
    }
}

fn location<F>(lookup: &F, key: &str, default: LocationCode) -> LocationCode
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(LocationCode::new) {
        None => default,
        Some(Ok(code)) => code,
        Some(Err(e)) => {
            warn!(key, error = %e, "invalid location code; using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> EngineConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = load(&[]);
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.boundary_policy().continuity_threshold, chrono::Duration::minutes(30));
        assert_eq!(cfg.thresholds(), ReconcileThresholds::default());
    }

    #[test]
    fn env_values_override_defaults() {
        let cfg = load(&[
            ("FEEDPOST_CADENCE_MINUTES", "2"),
            ("FEEDPOST_CONTINUITY_THRESHOLD_MINUTES", "45"),
            ("FEEDPOST_EPSILON", "0.1"),
            ("FEEDPOST_PICK_LOCATION", "RM09"),
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/feedpost"),
        ]);
        assert_eq!(cfg.cadence, Duration::from_secs(120));
        assert_eq!(cfg.continuity_threshold, Duration::from_secs(45 * 60));
        assert_eq!(cfg.epsilon, 0.1);
        assert_eq!(cfg.pick_location.as_str(), "RM09");
        assert!(cfg.use_persistent_stores);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/feedpost"));
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let cfg = load(&[
            ("FEEDPOST_LOOKBACK_MINUTES", "soon"),
            ("FEEDPOST_GAP_ALLOWANCE_MINUTES", "-3"),
            ("FEEDPOST_PAY_LOCATION", "   "),
        ]);
        let d = EngineConfig::default();
        assert_eq!(cfg.lookback, d.lookback);
        assert_eq!(cfg.gap_allowance, d.gap_allowance);
        assert_eq!(cfg.pay_location, d.pay_location);
    }

    #[test]
    fn topic_appends_line() {
        let cfg = EngineConfig::default();
        let line = feedpost_core::LineId::new("L2").unwrap();
        assert_eq!(cfg.topic_for(&line), "line/L2");
    }
}
