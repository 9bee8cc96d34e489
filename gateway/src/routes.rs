//! Customer-facing billing/analytics endpoints. These are thin forwarders:
//! the gateway authenticates the `x-api-key` the same way the proxy path
//! does, substitutes the authenticated customer id for anything
//! client-supplied, and lets the billing process own the real logic.

use axum::{
    extract::{Path, Query, Request, State},
    middleware,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde_json::Value;
use shared::{AppError, AuthContext};
use std::collections::HashMap;

use crate::{key_resolver, state::AppState};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/billing/current-period", get(current_period))
        .route("/billing/current-usage", get(current_usage))
        .route("/billing/history", get(history))
        .route("/billing/tiers", get(tiers))
        .route("/billing/preview-upgrade", post(preview_upgrade))
        .route("/billing/invoices", get(list_invoices))
        .route("/billing/invoices/summary", get(invoice_summary))
        .route("/billing/invoices/:id", get(get_invoice))
        .route("/billing/invoices/:id/status", put(update_invoice_status))
        .route("/billing/invoices/:id/mark-paid", put(mark_invoice_paid))
        .route("/analytics/usage-count", get(analytics_usage_count))
        .route("/analytics/trends", get(analytics_trends))
        .route("/analytics/top-endpoints", get(analytics_top_endpoints))
        .route("/analytics/error-rate", get(analytics_error_rate))
        .route("/analytics/growth", get(analytics_growth))
        .layer(middleware::from_fn_with_state(state, key_resolver::middleware))
}

fn auth_ctx(req: &Request) -> std::result::Result<AuthContext, AppError> {
    req.extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or_else(|| AppError::internal("billing route ran before key resolution"))
}

async fn current_period(
    State(state): State<AppState>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    let ctx = auth_ctx(&req)?;
    let body: Value = state
        .billing_client
        .get(&format!("/internal/customers/{}/current-period", ctx.customer.id))
        .await?;
    Ok(Json(body))
}

async fn current_usage(
    State(state): State<AppState>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    let ctx = auth_ctx(&req)?;
    let body: Value = state
        .billing_client
        .get(&format!("/internal/customers/{}/usage", ctx.customer.id))
        .await?;
    Ok(Json(body))
}

async fn history(
    State(state): State<AppState>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    let ctx = auth_ctx(&req)?;
    let body: Value = state
        .billing_client
        .get(&format!("/internal/customers/{}/history", ctx.customer.id))
        .await?;
    Ok(Json(body))
}

async fn tiers(
    State(state): State<AppState>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    let ctx = auth_ctx(&req)?;
    let body: Value = state
        .billing_client
        .get(&format!("/internal/customers/{}/tiers", ctx.customer.id))
        .await?;
    Ok(Json(body))
}

async fn preview_upgrade(
    State(state): State<AppState>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    let ctx = auth_ctx(&req)?;
    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| AppError::bad_request(format!("failed to read request body: {e}")))?;
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("invalid JSON body: {e}")))?;

    let response: Value = state
        .billing_client
        .post(
            &format!("/internal/customers/{}/preview-upgrade", ctx.customer.id),
            &payload,
        )
        .await?;
    Ok(Json(response))
}

async fn list_invoices(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    let ctx = auth_ctx(&req)?;
    let query = serde_urlencoded_query(&params);
    let body: Value = state
        .billing_client
        .get(&format!(
            "/internal/customers/{}/invoices{query}",
            ctx.customer.id
        ))
        .await?;
    Ok(Json(body))
}

async fn invoice_summary(
    State(state): State<AppState>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    let ctx = auth_ctx(&req)?;
    let body: Value = state
        .billing_client
        .get(&format!(
            "/internal/customers/{}/invoices/summary",
            ctx.customer.id
        ))
        .await?;
    Ok(Json(body))
}

async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<i64>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    let ctx = auth_ctx(&req)?;
    let body: Value = state
        .billing_client
        .get(&format!(
            "/internal/customers/{}/invoices/{invoice_id}",
            ctx.customer.id
        ))
        .await?;
    Ok(Json(body))
}

async fn update_invoice_status(
    State(state): State<AppState>,
    Path(invoice_id): Path<i64>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    let ctx = auth_ctx(&req)?;
    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| AppError::bad_request(format!("failed to read request body: {e}")))?;
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("invalid JSON body: {e}")))?;

    let response: Value = state
        .billing_client
        .put(
            &format!(
                "/internal/customers/{}/invoices/{invoice_id}/status",
                ctx.customer.id
            ),
            &payload,
        )
        .await?;
    Ok(Json(response))
}

async fn mark_invoice_paid(
    State(state): State<AppState>,
    Path(invoice_id): Path<i64>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    let ctx = auth_ctx(&req)?;
    let response: Value = state
        .billing_client
        .put(
            &format!(
                "/internal/customers/{}/invoices/{invoice_id}/mark-paid",
                ctx.customer.id
            ),
            &serde_json::json!({}),
        )
        .await?;
    Ok(Json(response))
}

async fn analytics_usage_count(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    forward_analytics(&state, &req, "usage-count", &params).await
}

async fn analytics_trends(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    forward_analytics(&state, &req, "trends", &params).await
}

async fn analytics_top_endpoints(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    forward_analytics(&state, &req, "top-endpoints", &params).await
}

async fn analytics_error_rate(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    forward_analytics(&state, &req, "error-rate", &params).await
}

async fn analytics_growth(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    req: Request,
) -> std::result::Result<Json<Value>, AppError> {
    forward_analytics(&state, &req, "growth", &params).await
}

async fn forward_analytics(
    state: &AppState,
    req: &Request,
    metric: &str,
    params: &HashMap<String, String>,
) -> std::result::Result<Json<Value>, AppError> {
    let ctx = auth_ctx(req)?;
    let query = serde_urlencoded_query(params);
    let body: Value = state
        .billing_client
        .get(&format!(
            "/internal/customers/{}/analytics/{metric}{query}",
            ctx.customer.id
        ))
        .await?;
    Ok(Json(body))
}

fn serde_urlencoded_query(params: &HashMap<String, String>) -> String {
    if params.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    format!("?{}", pairs.join("&"))
}
