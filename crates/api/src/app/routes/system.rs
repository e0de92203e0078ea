use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Effective engine configuration, minus connection strings.
pub async fn config(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let mut config = services.config.clone();
    config.database_url = config.database_url.map(|_| "<redacted>".to_string());
    Json(config)
}
