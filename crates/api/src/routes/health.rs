//! Liveness endpoint.

use axum::Json;
use persistence::TransactionalStore;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub storage: &'static str,
}

/// GET /health — reports liveness and the storage backend in use.
pub async fn check<S: TransactionalStore>() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        storage: S::BACKEND,
    })
}
