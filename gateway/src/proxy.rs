//! Forwards authenticated requests to the developer's upstream API,
//! capturing usage for billing on the way back.

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::Response,
};
use shared::{metrics, models::NewUsageRecord, AppError, AuthContext};
use std::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::state::AppState;

pub async fn handler(
    State(state): State<AppState>,
    req: Request,
) -> std::result::Result<Response, AppError> {
    let ctx = req
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or_else(|| AppError::internal("proxy ran before key resolution"))?;

    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let request_headers = req.headers().clone();

    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| AppError::bad_request(format!("failed to read request body: {e}")))?;

    let upstream_base = ctx
        .developer
        .upstream_base_url
        .clone()
        .unwrap_or_else(|| state.config.services.default_upstream_url.clone());
    let upstream_path = strip_api_prefix(&path_and_query);
    let upstream_url = format!("{}{}", upstream_base.trim_end_matches('/'), upstream_path);

    let started = Instant::now();
    let outcome = forward(&state, &method, &upstream_url, &request_headers, body).await;
    let elapsed = started.elapsed();

    metrics::PROXY_REQUEST_DURATION_SECONDS
        .with_label_values(&[method.as_str()])
        .observe(elapsed.as_secs_f64());

    let (status, response) = match outcome {
        Ok(response) => (response.status(), response),
        Err(e) => {
            metrics::PROXY_REQUESTS_TOTAL
                .with_label_values(&[method.as_str(), "error"])
                .inc();
            return Err(e);
        }
    };

    metrics::PROXY_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), status.as_str()])
        .inc();

    let usage = NewUsageRecord {
        idempotency_key: Uuid::new_v4(),
        customer_id: ctx.customer.id,
        api_key_id: Some(ctx.key.id),
        endpoint: upstream_path.split('?').next().unwrap_or("/").to_string(),
        method: method.to_string(),
        status_code: status.as_u16() as i32,
        response_time_ms: elapsed.as_millis() as i32,
        timestamp: chrono::Utc::now(),
    };

    if let Err(e) = state.redis.push_usage_record(&usage).await {
        warn!("failed to buffer usage record: {e}");
    }

    Ok(response)
}

async fn forward(
    state: &AppState,
    method: &Method,
    url: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> std::result::Result<Response, AppError> {
    let mut outgoing = reqwest::Request::new(
        method.clone(),
        url.parse().map_err(|_| AppError::bad_request("invalid upstream path"))?,
    );

    for (name, value) in headers {
        if shared::utils::is_hop_by_hop_header(name.as_str()) {
            continue;
        }
        outgoing.headers_mut().insert(name.clone(), value.clone());
    }
    *outgoing.body_mut() = Some(body.into());

    let response = state
        .http_client
        .execute(outgoing)
        .await
        .map_err(map_upstream_error)?;

    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let response_headers = response.headers().clone();
    let body = response.bytes().await.map_err(map_upstream_error)?;

    let mut builder = Response::builder().status(status);
    for (name, value) in response_headers.iter() {
        if shared::utils::is_hop_by_hop_header(name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            builder = builder.header(name, value);
        }
    }

    builder
        .body(axum::body::Body::from(body))
        .map_err(|e| AppError::internal(format!("failed to build proxied response: {e}")))
}

/// Drops the `/api` mount prefix before forwarding upstream, mapping an
/// empty remainder to `/`.
fn strip_api_prefix(path_and_query: &str) -> String {
    let stripped = path_and_query.strip_prefix("/api").unwrap_or(path_and_query);
    if stripped.is_empty() {
        "/".to_string()
    } else {
        stripped.to_string()
    }
}

fn map_upstream_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::UpstreamUnavailable
    } else if e.is_connect() {
        AppError::UpstreamUnavailable
    } else {
        AppError::from(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_api_prefix() {
        assert_eq!(strip_api_prefix("/api/v1/widgets"), "/v1/widgets");
        assert_eq!(strip_api_prefix("/api"), "/");
        assert_eq!(strip_api_prefix("/api?x=1"), "?x=1");
    }
}
