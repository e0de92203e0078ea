use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use feedpost_infra::ledger::LedgerError;
use feedpost_infra::posting::PostingError;
use feedpost_infra::store::StoreError;
use feedpost_infra::{AdjustmentError, CycleError, CycleErrorKind};

pub fn cycle_error_to_response(err: CycleError) -> axum::response::Response {
    let message = err.to_string();
    match err.kind() {
        CycleErrorKind::RunBusy => json_error(StatusCode::CONFLICT, "run_busy", message),
        CycleErrorKind::ConfigurationMissing => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "configuration_missing", message)
        }
        CycleErrorKind::InvalidData => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_data", message)
        }
        CycleErrorKind::ExternalLookupFailure => {
            json_error(StatusCode::BAD_GATEWAY, "external_lookup_failure", message)
        }
    }
}

pub fn adjustment_error_to_response(err: AdjustmentError) -> axum::response::Response {
    match err {
        AdjustmentError::UnknownLot(_) => {
            json_error(StatusCode::NOT_FOUND, "unknown_lot", err.to_string())
        }
        AdjustmentError::ProductMismatch { .. } => {
            json_error(StatusCode::BAD_REQUEST, "product_mismatch", err.to_string())
        }
        AdjustmentError::Domain(e) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        }
        AdjustmentError::BaselineMismatch { .. } => {
            json_error(StatusCode::CONFLICT, "baseline_mismatch", err.to_string())
        }
        AdjustmentError::Unreachable(msg) => {
            json_error(StatusCode::BAD_GATEWAY, "ledger_unreachable", msg)
        }
        AdjustmentError::Busy(e) => cycle_error_to_response(e),
        AdjustmentError::Posting(PostingError::Ledger(e)) => ledger_error_to_response(e),
        AdjustmentError::Posting(PostingError::Store(e)) | AdjustmentError::Store(e) => {
            store_error_to_response(e)
        }
        AdjustmentError::Posting(PostingError::Domain(e)) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_data", e.to_string())
        }
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
}

fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    json_error(StatusCode::BAD_GATEWAY, "ledger_error", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
