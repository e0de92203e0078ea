use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(run_cycle))
        .route("/last", get(last_cycle))
}

/// Run one reconciliation cycle now and return its report.
pub async fn run_cycle(
    Extension(services): Extension<Arc<AppServices>>,
    body: Option<Json<dto::CycleRequest>>,
) -> axum::response::Response {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let now = request.now.unwrap_or_else(Utc::now);

    match services.driver.run_cycle(now).await {
        Ok(report) => {
            services.record_report(now, &report);
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, kind = e.kind().as_str(), "on-demand cycle failed");
            errors::cycle_error_to_response(e)
        }
    }
}

pub async fn last_cycle(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.last_report() {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "no cycle has run yet"),
    }
}
