use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;

use feedpost_infra::AdjustmentRequest;

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/", post(apply_adjustment))
}

/// Post an operator correction for one pick or pay key.
///
/// Returns the appended audit record; a ledger rejection is still `201` with
/// `status: "rejected"` since the record exists.
pub async fn apply_adjustment(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<AdjustmentRequest>,
) -> axum::response::Response {
    match services.driver.apply_adjustment(&body, Utc::now()).await {
        Ok(record) => {
            tracing::info!(key = %record.key, status = ?record.status, "adjustment recorded");
            (StatusCode::CREATED, Json(record)).into_response()
        }
        Err(e) => {
            tracing::warn!(key = %body.key(), error = %e, "adjustment refused");
            errors::adjustment_error_to_response(e)
        }
    }
}
