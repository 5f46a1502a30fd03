//! HTTP API server with observability for the order service.
//!
//! Provides REST endpoints for adding products to a customer's open order
//! and managing orders, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use application::{InMemoryPriceOracle, OrderService};
use axum::Router;
use axum::routing::{delete, get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use persistence::{DatabaseUnitOfWork, Locker, LockingUnitOfWork, TransactionalStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, L>(state: Arc<AppState<S, L>>, metrics_handle: PrometheusHandle) -> Router
where
    S: TransactionalStore + Clone + 'static,
    L: Locker + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route(
            "/customers/{customer_id}/order/items",
            post(routes::orders::add_product::<S, L>),
        )
        .route(
            "/orders/{id}",
            get(routes::orders::get::<S, L>).delete(routes::orders::delete::<S, L>),
        )
        .route("/orders/{id}/status", put(routes::orders::set_status::<S, L>))
        .route(
            "/orders/{id}/items/{item_id}",
            delete(routes::orders::remove_item::<S, L>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over a storage backend and a locker.
pub fn create_state<S, L>(
    store: S,
    locker: L,
    prices: InMemoryPriceOracle,
    lock_timeout: Option<Duration>,
) -> Arc<AppState<S, L>>
where
    S: TransactionalStore + Clone + 'static,
    L: Locker + 'static,
{
    let mut luow = LockingUnitOfWork::new(store.clone(), locker);
    if let Some(timeout) = lock_timeout {
        luow = luow.with_lock_timeout(timeout);
    }

    Arc::new(AppState {
        orders: OrderService::new(DatabaseUnitOfWork::new(store), luow, prices),
    })
}
