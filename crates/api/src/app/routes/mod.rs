use axum::{routing::get, Router};

pub mod adjustments;
pub mod cycles;
pub mod runs;
pub mod system;

/// Router for every engine endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/config", get(system::config))
        .nest("/cycles", cycles::router())
        .nest("/runs", runs::router())
        .nest("/lots", runs::lot_router())
        .nest("/adjustments", adjustments::router())
}
