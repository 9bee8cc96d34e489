//! Billing process: owns pricing, invoices and analytics for the gateway's
//! customers, and runs the scheduled invoice-close/overdue/bulk jobs.

mod invoice_engine;
mod period;
mod pricing;
mod routes;
mod schedulers;
mod state;

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use shared::{metrics, Result};
use state::AppState;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[derive(Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
    version: &'static str,
    dependencies: Vec<DependencyStatus>,
}

#[derive(Serialize)]
struct DependencyStatus {
    name: &'static str,
    healthy: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("starting billing service");

    let state = AppState::new().await?;
    schedulers::start(state.clone()).await?;

    let app = create_router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8001);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("billing service listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state.clone())
        .merge(routes::router(state.clone()).with_state(state))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = state.database.health_check().await.is_ok();
    let redis_healthy = state.redis.health_check().await.is_ok();

    Json(HealthResponse {
        service: "billing",
        status: if db_healthy && redis_healthy { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        dependencies: vec![
            DependencyStatus { name: "database", healthy: db_healthy },
            DependencyStatus { name: "redis", healthy: redis_healthy },
        ],
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}
