//! Accumulator sampling and "on"-signal probing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use feedpost_core::FeederId;
use feedpost_production::{ProbePick, ProbeWindow};
use feedpost_reconcile::{AccumulatorWindow, AccumulatorWindowSample};

use crate::config::chrono_duration;
use crate::metric::{MetricError, MetricStore, SourceHint};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    /// Symmetric widening applied to every accumulator window.
    pub gap_allowance: Duration,
    /// Windows ending further back than this are read from the archive.
    pub archive_after: Duration,
    /// Signal level at or above which the line counts as running.
    pub on_threshold: f64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            gap_allowance: Duration::from_secs(5 * 60),
            archive_after: Duration::from_secs(7 * 24 * 60 * 60),
            on_threshold: 20.0,
        }
    }
}

pub struct AccumulatorSampler {
    store: Arc<dyn MetricStore>,
    settings: SamplerSettings,
}

impl AccumulatorSampler {
    pub fn new(store: Arc<dyn MetricStore>, settings: SamplerSettings) -> Self {
        Self { store, settings }
    }

    /// Pick the index range to scan for a window ending at `to`.
    pub fn source_for(&self, to: DateTime<Utc>, now: DateTime<Utc>) -> SourceHint {
        if now - to > chrono_duration(self.settings.archive_after) {
            SourceHint::Archive
        } else {
            SourceHint::Live
        }
    }

    /// First/last accumulator reading per feeder in `[from, to]`, widened by
    /// the gap allowance on both sides.
    ///
    /// `feeder_found` is the widest feeder vector seen in the window.
    pub async fn sample(
        &self,
        topic: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<AccumulatorWindow, MetricError> {
        let allowance = chrono_duration(self.settings.gap_allowance);
        let hint = self.source_for(to, now);
        let mut points = self
            .store
            .accumulator_points(topic, from - allowance, to + allowance, hint)
            .await?;
        points.sort_by_key(|p| p.at);

        let feeder_found = points.iter().map(|p| p.values.len()).max().unwrap_or(0);
        let feeder_found = u16::try_from(feeder_found)
            .map_err(|_| MetricError::Decode(format!("{feeder_found} feeders reported")))?;

        let mut samples = Vec::with_capacity(feeder_found as usize);
        for slot in 0..feeder_found {
            let feeder =
                FeederId::new(slot + 1).map_err(|e| MetricError::Decode(e.to_string()))?;
            let mut readings = points
                .iter()
                .filter_map(|p| p.values.get(slot as usize).copied().flatten())
                .filter(|v| v.is_finite());

            let first = readings.next();
            let (last, count) = readings.fold((first, first.map_or(0, |_| 1)), |(_, n), v| {
                (Some(v), n + 1)
            });

            samples.push(AccumulatorWindowSample {
                feeder,
                window_start: from,
                window_end: to,
                min: first.unwrap_or(0.0),
                max: last.unwrap_or(0.0),
                samples: count,
            });
        }

        debug!(topic, feeder_found, hint = hint.as_str(), "accumulator window sampled");
        Ok(AccumulatorWindow::new(from, to, feeder_found, samples))
    }

    /// Earliest or latest instant in `window` where the "on" signal is at or
    /// above the threshold.
    pub async fn probe_on_signal(
        &self,
        topic: &str,
        window: &ProbeWindow,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, MetricError> {
        let hint = self.source_for(window.to, now);
        let points = self
            .store
            .signal_points(topic, window.from, window.to, hint)
            .await?;

        let mut on = points
            .iter()
            .filter(|p| p.value >= self.settings.on_threshold)
            .map(|p| p.at);
        Ok(match window.pick {
            ProbePick::Earliest => on.min(),
            ProbePick::Latest => on.max(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{AccumulatorPoint, InMemoryMetricStore, QueryKind, SignalPoint};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::minutes(m)
    }

    fn sampler(store: Arc<InMemoryMetricStore>) -> AccumulatorSampler {
        AccumulatorSampler::new(store, SamplerSettings::default())
    }

    #[tokio::test]
    async fn first_and_last_reading_within_widened_window() {
        let store = Arc::new(InMemoryMetricStore::new());
        let points = [
            (-10, vec![Some(1.0), Some(5.0)]),
            (-3, vec![Some(100.0), None]),
            (30, vec![Some(180.0), Some(7.0)]),
            (62, vec![Some(250.0), Some(9.0)]),
            (70, vec![Some(999.0), Some(99.0)]),
        ];
        for (m, values) in points {
            store.push_accumulator("line/L1", AccumulatorPoint { at: minutes(m), values });
        }

        let w = sampler(store.clone())
            .sample("line/L1", t0(), minutes(60), minutes(61))
            .await
            .unwrap();

        assert_eq!(w.feeder_found, 2);
        let f1 = w.sample(FeederId::new(1).unwrap()).unwrap();
        assert_eq!((f1.min, f1.max, f1.samples), (100.0, 250.0, 3));
        let f2 = w.sample(FeederId::new(2).unwrap()).unwrap();
        assert_eq!((f2.min, f2.max, f2.samples), (7.0, 9.0, 2));

        let q = &store.queries()[0];
        assert_eq!(q.kind, QueryKind::Accumulator);
        assert_eq!((q.from, q.to), (minutes(-5), minutes(65)));
        assert_eq!(q.hint, SourceHint::Live);
    }

    /// Returns its points exactly as given, like a remote store with no ordering.
    struct UnorderedStore(Vec<AccumulatorPoint>);

    #[async_trait::async_trait]
    impl MetricStore for UnorderedStore {
        async fn accumulator_points(
            &self,
            _topic: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
            _hint: SourceHint,
        ) -> Result<Vec<AccumulatorPoint>, MetricError> {
            Ok(self.0.clone())
        }

        async fn signal_points(
            &self,
            _topic: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
            _hint: SourceHint,
        ) -> Result<Vec<SignalPoint>, MetricError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn readings_are_ordered_by_time_before_first_and_last() {
        let store = Arc::new(UnorderedStore(vec![
            AccumulatorPoint { at: minutes(50), values: vec![Some(250.0)] },
            AccumulatorPoint { at: minutes(10), values: vec![Some(100.0)] },
            AccumulatorPoint { at: minutes(30), values: vec![Some(180.0)] },
        ]));

        let w = AccumulatorSampler::new(store, SamplerSettings::default())
            .sample("line/L1", t0(), minutes(60), minutes(61))
            .await
            .unwrap();

        let f1 = w.sample(FeederId::new(1).unwrap()).unwrap();
        assert_eq!((f1.min, f1.max, f1.samples), (100.0, 250.0, 3));
    }

    #[tokio::test]
    async fn silent_feeder_has_zero_samples() {
        let store = Arc::new(InMemoryMetricStore::new());
        store.push_accumulator("line/L1", AccumulatorPoint { at: minutes(1), values: vec![Some(1.0), None] });

        let w = sampler(store).sample("line/L1", t0(), minutes(60), minutes(60)).await.unwrap();
        assert_eq!(w.feeder_found, 2);
        assert!(w.sample(FeederId::new(2).unwrap()).is_none());
    }

    #[tokio::test]
    async fn old_windows_read_the_archive() {
        let store = Arc::new(InMemoryMetricStore::new());
        let s = sampler(store.clone());
        s.sample("line/L1", t0(), minutes(60), minutes(60) + chrono::Duration::days(8))
            .await
            .unwrap();
        assert_eq!(store.queries()[0].hint, SourceHint::Archive);
    }

    #[tokio::test]
    async fn probe_picks_earliest_or_latest_crossing() {
        let store = Arc::new(InMemoryMetricStore::new());
        for (m, v) in [(-10, 25.0), (-5, 3.0), (2, 21.0), (8, 40.0), (12, 5.0)] {
            store.push_signal("line/L1", SignalPoint { at: minutes(m), value: v });
        }
        let s = sampler(store);
        let now = minutes(120);

        let start = ProbeWindow::around(t0(), chrono::Duration::minutes(30), ProbePick::Earliest);
        assert_eq!(s.probe_on_signal("line/L1", &start, now).await.unwrap(), Some(minutes(-10)));

        let end = ProbeWindow::around(t0(), chrono::Duration::minutes(30), ProbePick::Latest);
        assert_eq!(s.probe_on_signal("line/L1", &end, now).await.unwrap(), Some(minutes(8)));

        let quiet = ProbeWindow::around(minutes(60), chrono::Duration::minutes(30), ProbePick::Earliest);
        assert_eq!(s.probe_on_signal("line/L1", &quiet, now).await.unwrap(), None);
    }
}
