use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use feedpost_core::FeederId;

/// First/last accumulator reading of one feeder within a window.
///
/// `min` is the earliest sample's value and `max` the latest's; the signal is
/// expected to be monotonic, so these bound the consumption in the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorWindowSample {
    pub feeder: FeederId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub min: f64,
    pub max: f64,
    pub samples: u32,
}

impl AccumulatorWindowSample {
    pub fn raw_delta(&self) -> f64 {
        self.max - self.min
    }
}

/// Accumulator readings for every feeder of a line over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorWindow {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Number of feeders the metric source reported (`K`).
    pub feeder_found: u16,
    samples: Vec<AccumulatorWindowSample>,
}

impl AccumulatorWindow {
    /// Build from per-feeder samples; samples are re-ordered by feeder.
    pub fn new(
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        feeder_found: u16,
        mut samples: Vec<AccumulatorWindowSample>,
    ) -> Self {
        samples.sort_by_key(|s| s.feeder);
        Self {
            window_start,
            window_end,
            feeder_found,
            samples,
        }
    }

    pub fn samples(&self) -> &[AccumulatorWindowSample] {
        &self.samples
    }

    /// Sample for `feeder`, or `None` when the source did not report it or
    /// saw no readings in the window.
    pub fn sample(&self, feeder: FeederId) -> Option<&AccumulatorWindowSample> {
        if feeder.index() > self.feeder_found {
            return None;
        }
        self.samples
            .binary_search_by_key(&feeder, |s| s.feeder)
            .ok()
            .map(|i| &self.samples[i])
            .filter(|s| s.samples > 0)
    }

    pub fn hours(&self) -> f64 {
        hours_between(self.window_start, self.window_end)
    }
}

pub(crate) fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds().max(0) as f64) / 3_600_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(feeder: u16, samples: u32) -> AccumulatorWindowSample {
        AccumulatorWindowSample {
            feeder: FeederId::new(feeder).unwrap(),
            window_start: Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap(),
            window_end: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            min: 10.0,
            max: 25.0,
            samples,
        }
    }

    #[test]
    fn lookup_respects_feeder_found_and_empty_samples() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let window = AccumulatorWindow::new(start, end, 2, vec![sample(3, 9), sample(2, 0), sample(1, 4)]);

        assert_eq!(window.sample(FeederId::new(1).unwrap()).unwrap().raw_delta(), 15.0);
        assert!(window.sample(FeederId::new(2).unwrap()).is_none());
        assert!(window.sample(FeederId::new(3).unwrap()).is_none());
        assert_eq!(window.hours(), 2.0);
    }
}
