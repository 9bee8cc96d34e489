//! API gateway: resolves API keys, enforces daily quotas, proxies
//! requests to the developer's upstream service, and buffers usage for
//! the billing process to consume.

mod key_resolver;
mod proxy;
mod rate_limiter;
mod routes;
mod state;
mod usage_buffer;

use axum::{
    extract::State,
    middleware,
    response::Json,
    routing::{any, get},
    Router,
};
use serde::Serialize;
use shared::{metrics, Result};
use state::AppState;
use std::{net::SocketAddr, time::Duration};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
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

    info!("starting gateway");

    let state = AppState::new().await?;
    usage_buffer::spawn(state.clone());

    let app = create_router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn create_router(state: AppState) -> Router {
    let proxied = Router::new()
        .route("/api/*path", any(proxy::handler))
        .route("/api", any(proxy::handler))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limiter::middleware))
        .layer(middleware::from_fn_with_state(state.clone(), key_resolver::middleware))
        .with_state(state.clone());

    let billing_routes = routes::router(state.clone()).with_state(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state)
        .merge(proxied)
        .merge(billing_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(Duration::from_secs(30))),
        )
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = state.database.health_check().await.is_ok();
    let redis_healthy = state.redis.health_check().await.is_ok();

    Json(HealthResponse {
        service: "gateway",
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
