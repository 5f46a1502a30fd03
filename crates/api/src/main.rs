//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use api::routes::orders::AppState;
use application::InMemoryPriceOracle;
use metrics_exporter_prometheus::PrometheusHandle;
use persistence::{
    InMemoryDatabase, InMemoryLocker, Locker, PgAdvisoryLocker, PgDatabase, TransactionalStore,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve<S, L>(
    config: &Config,
    state: Arc<AppState<S, L>>,
    metrics_handle: PrometheusHandle,
) where
    S: TransactionalStore + Clone + 'static,
    L: Locker + 'static,
{
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(config.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Load the price catalog
    let prices = InMemoryPriceOracle::with_prices(
        config.prices().expect("PRICE_CATALOG is not a valid catalog"),
    );

    // 4. Pick the storage backend and serve
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(url)
                .await
                .expect("failed to connect to database");
            let db = PgDatabase::new(pool);
            db.run_migrations().await.expect("migrations failed");

            // Lock sessions stay open across a transaction, so they get a pool of their own.
            let lock_pool = PgPoolOptions::new()
                .max_connections(config.lock_max_connections)
                .connect(url)
                .await
                .expect("failed to connect lock pool");
            let locker =
                PgAdvisoryLocker::new(lock_pool).with_poll_interval(config.lock_poll_interval);
            tracing::info!("using PostgreSQL storage");
            let state = api::create_state(db, locker, prices, config.lock_timeout);
            serve(&config, state, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            let state = api::create_state(
                InMemoryDatabase::new(),
                InMemoryLocker::new(),
                prices,
                config.lock_timeout,
            );
            serve(&config, state, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
