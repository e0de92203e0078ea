//! Time-series metric store boundary.
//!
//! The store holds raw accumulator readings per line topic (one value per
//! feeder) and a proxy "line running" signal. Aggregation into per-feeder
//! windows happens in [`crate::sampler`].

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which index range of the metric store a query should scan.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceHint {
    /// Recent data, hot index.
    Live,
    /// Older data, archive index.
    Archive,
}

impl SourceHint {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceHint::Live => "live",
            SourceHint::Archive => "archive",
        }
    }
}

/// One accumulator reading of a whole line. `values[i]` belongs to feeder `i + 1`;
/// `None` means the feeder reported nothing at this instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorPoint {
    pub at: DateTime<Utc>,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPoint {
    pub at: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("metric transport error: {0}")]
    Transport(String),

    #[error("metric api error status={status}: {message}")]
    Api { status: u16, message: String },

    #[error("metric decode error: {0}")]
    Decode(String),
}

#[async_trait::async_trait]
pub trait MetricStore: Send + Sync {
    /// Accumulator readings with `from <= at <= to`, in any order.
    async fn accumulator_points(
        &self,
        topic: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        hint: SourceHint,
    ) -> Result<Vec<AccumulatorPoint>, MetricError>;

    /// Proxy-signal readings with `from <= at <= to`, in any order.
    async fn signal_points(
        &self,
        topic: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        hint: SourceHint,
    ) -> Result<Vec<SignalPoint>, MetricError>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QueryKind {
    Accumulator,
    Signal,
}

/// Query seen by [`InMemoryMetricStore`] (tests assert on these).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuery {
    pub kind: QueryKind,
    pub topic: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub hint: SourceHint,
}

/// In-memory metric store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    accumulators: RwLock<HashMap<String, Vec<AccumulatorPoint>>>,
    signals: RwLock<HashMap<String, Vec<SignalPoint>>>,
    queries: Mutex<Vec<MetricQuery>>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_accumulator(&self, topic: &str, point: AccumulatorPoint) {
        if let Ok(mut map) = self.accumulators.write() {
            let points = map.entry(topic.to_string()).or_default();
            points.push(point);
            points.sort_by_key(|p| p.at);
        }
    }

    pub fn push_signal(&self, topic: &str, point: SignalPoint) {
        if let Ok(mut map) = self.signals.write() {
            let points = map.entry(topic.to_string()).or_default();
            points.push(point);
            points.sort_by_key(|p| p.at);
        }
    }

    pub fn queries(&self) -> Vec<MetricQuery> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    fn log(&self, kind: QueryKind, topic: &str, from: DateTime<Utc>, to: DateTime<Utc>, hint: SourceHint) {
        if let Ok(mut q) = self.queries.lock() {
            q.push(MetricQuery {
                kind,
                topic: topic.to_string(),
                from,
                to,
                hint,
            });
        }
    }
}

#[async_trait::async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn accumulator_points(
        &self,
        topic: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        hint: SourceHint,
    ) -> Result<Vec<AccumulatorPoint>, MetricError> {
        self.log(QueryKind::Accumulator, topic, from, to, hint);
        let map = self
            .accumulators
            .read()
            .map_err(|_| MetricError::Transport("lock poisoned".to_string()))?;
        Ok(map
            .get(topic)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.at >= from && p.at <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn signal_points(
        &self,
        topic: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        hint: SourceHint,
    ) -> Result<Vec<SignalPoint>, MetricError> {
        self.log(QueryKind::Signal, topic, from, to, hint);
        let map = self
            .signals
            .read()
            .map_err(|_| MetricError::Transport("lock poisoned".to_string()))?;
        Ok(map
            .get(topic)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.at >= from && p.at <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct AccumulatorResponse {
    points: Vec<AccumulatorPoint>,
}

#[derive(Debug, Deserialize)]
struct SignalResponse {
    points: Vec<SignalPoint>,
}

/// JSON-over-HTTP metric store.
///
/// `GET {base}/topics/{topic}/accumulators?from=..&to=..&source=live|archive`
/// returns `{"points": [{"at": .., "values": [..]}]}`; `/signal` returns
/// `{"points": [{"at": .., "value": ..}]}`.
#[derive(Debug, Clone)]
pub struct HttpMetricStore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMetricStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, topic: &str, series: &str) -> String {
        format!(
            "{}/topics/{}/{}",
            self.base_url.trim_end_matches('/'),
            topic.trim_matches('/'),
            series
        )
    }

    async fn fetch<T>(
        &self,
        url: String,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        hint: SourceHint,
    ) -> Result<T, MetricError>
    where
        T: serde::de::DeserializeOwned,
    {
        let from_s = from.to_rfc3339();
        let to_s = to.to_rfc3339();
        let resp = self
            .http
            .get(url)
            .query(&[
                ("from", from_s.as_str()),
                ("to", to_s.as_str()),
                ("source", hint.as_str()),
            ])
            .send()
            .await
            .map_err(|e| MetricError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(MetricError::Api {
                status: status.as_u16(),
                message,
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| MetricError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl MetricStore for HttpMetricStore {
    async fn accumulator_points(
        &self,
        topic: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        hint: SourceHint,
    ) -> Result<Vec<AccumulatorPoint>, MetricError> {
        let body: AccumulatorResponse = self
            .fetch(self.url(topic, "accumulators"), from, to, hint)
            .await?;
        Ok(body.points)
    }

    async fn signal_points(
        &self,
        topic: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        hint: SourceHint,
    ) -> Result<Vec<SignalPoint>, MetricError> {
        let body: SignalResponse = self.fetch(self.url(topic, "signal"), from, to, hint).await?;
        Ok(body.points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap()
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn in_memory_filters_by_window_and_logs_queries() {
        let store = InMemoryMetricStore::new();
        for minute in [0, 10, 20] {
            store.push_signal(
                "line/L1",
                SignalPoint {
                    at: t0() + chrono::Duration::minutes(minute),
                    value: minute as f64,
                },
            );
        }

        let points = store
            .signal_points("line/L1", t0() + chrono::Duration::minutes(5), t0() + chrono::Duration::minutes(20), SourceHint::Live)
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(store.queries().len(), 1);
        assert_eq!(store.queries()[0].kind, QueryKind::Signal);
    }

    #[tokio::test]
    async fn http_store_passes_window_and_source() {
        let app = Router::new().route(
            "/topics/:line/accumulators",
            get(
                |Path(line): Path<String>, Query(q): Query<HashMap<String, String>>| async move {
                    let source = q.get("source").cloned().unwrap_or_default();
                    Json(json!({
                        "points": [
                            { "at": "2026-03-01T06:00:00Z", "values": [10.0, null] },
                            { "at": "2026-03-01T07:00:00Z", "values": [25.0, if source == "archive" { 1.0 } else { 2.0 }] }
                        ],
                        "line": line
                    }))
                },
            ),
        );
        let base = spawn(app).await;
        let store = HttpMetricStore::new(base);

        let points = store
            .accumulator_points("L1", t0(), t0() + chrono::Duration::hours(1), SourceHint::Archive)
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].values, vec![Some(10.0), None]);
        assert_eq!(points[1].values[1], Some(1.0));
    }

    #[tokio::test]
    async fn http_store_maps_error_status() {
        let app = Router::new().route(
            "/topics/:line/signal",
            get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, Json(Value::Null)) }),
        );
        let base = spawn(app).await;
        let store = HttpMetricStore::new(base);

        let err = store
            .signal_points("L1", t0(), t0(), SourceHint::Live)
            .await
            .unwrap_err();
        assert!(matches!(err, MetricError::Api { status: 503, .. }));
    }
}
