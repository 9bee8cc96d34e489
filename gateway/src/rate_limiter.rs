//! Daily quota enforcement, anchored to deployment-timezone midnight.

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use shared::{metrics, utils::next_local_midnight, AppError, AuthContext};
use tracing::warn;

use crate::state::AppState;

pub async fn middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let ctx = req
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or_else(|| AppError::internal("rate limiter ran before key resolution"))?;

    let (seconds_to_reset, reset_at) = next_local_midnight(state.config.timezone());

    let outcome = state
        .redis
        .check_and_increment_rate(
            ctx.customer.id,
            ctx.customer.daily_quota,
            seconds_to_reset,
            reset_at,
        )
        .await?;

    if !outcome.allowed {
        warn!(customer_id = ctx.customer.id, "daily quota exhausted");
        metrics::RATE_LIMIT_DECISIONS_TOTAL
            .with_label_values(&["denied"])
            .inc();
        return Err(AppError::QuotaExceeded {
            remaining: outcome.remaining,
            reset_at: outcome.reset_at,
        });
    }

    metrics::RATE_LIMIT_DECISIONS_TOTAL
        .with_label_values(&["allowed"])
        .inc();

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if let Ok(v) = HeaderValue::from_str(&ctx.customer.daily_quota.to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&outcome.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&outcome.reset_at.timestamp().to_string()) {
        headers.insert("x-ratelimit-reset", v);
    }

    Ok(response)
}
