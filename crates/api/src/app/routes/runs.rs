use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use feedpost_core::LotNo;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/errored", get(errored_runs))
}

pub fn lot_router() -> Router {
    Router::new().route("/:lot/postings", get(lot_postings))
}

/// Runs skipped by the most recent cycle, with reasons.
pub async fn errored_runs(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let last = services.last_report();
    Json(dto::ErroredRunsResponse {
        as_of: services.last_cycle_at(),
        runs: last.map(|r| r.errored_runs).unwrap_or_default(),
    })
}

/// Audit trail of one lot, oldest first.
pub async fn lot_postings(
    Extension(services): Extension<Arc<AppServices>>,
    Path(lot): Path<String>,
) -> axum::response::Response {
    let lot = match LotNo::new(lot) {
        Ok(lot) => lot,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_lot", e.to_string()),
    };

    match services.driver.postings_for_lot(&lot).await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
