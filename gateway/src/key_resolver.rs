//! Resolves the `x-api-key` header to an [`AuthContext`], caching the
//! result in the fast store so the hot path rarely touches Postgres.

use crate::state::AppState;
use axum::{extract::Request, extract::State, http::HeaderMap, middleware::Next, response::Response};
use shared::{metrics, AppError, AuthContext, Result};
use tracing::{debug, warn};

pub const API_KEY_HEADER: &str = "x-api-key";

fn extract_secret(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::missing_credential(format!("{API_KEY_HEADER} header required")))
}

/// Resolves a secret to its auth context. Cache reads/writes are best
/// effort: a Redis failure here falls through to the durable store rather
/// than failing the request.
pub async fn resolve(state: &AppState, secret: &str) -> Result<AuthContext> {
    match state.redis.get_key_context(secret).await {
        Ok(Some(ctx)) => {
            metrics::KEY_CONTEXT_CACHE_TOTAL.with_label_values(&["hit"]).inc();
            return Ok(ctx);
        }
        Ok(None) => {
            metrics::KEY_CONTEXT_CACHE_TOTAL.with_label_values(&["miss"]).inc();
        }
        Err(e) => {
            warn!("key-context cache read failed, falling through to database: {e}");
        }
    }

    let ctx = state
        .database
        .find_key_context(secret)
        .await?
        .ok_or(AppError::InvalidCredential)?;

    if !is_live(&ctx) {
        return Err(AppError::InvalidCredential);
    }

    if let Err(e) = state.redis.set_key_context(secret, &ctx).await {
        warn!("key-context cache write failed: {e}");
    }

    Ok(ctx)
}

fn is_live(ctx: &AuthContext) -> bool {
    ctx.key.active
        && ctx
            .key
            .expires_at
            .map(|expires_at| expires_at > chrono::Utc::now())
            .unwrap_or(true)
}

/// Axum middleware: resolves the API key, inserts the [`AuthContext`] into
/// request extensions for downstream handlers, and fires an async
/// last-used timestamp update.
pub async fn middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let secret = extract_secret(req.headers())?.to_string();
    let ctx = resolve(&state, &secret).await?;

    debug!(customer_id = ctx.customer.id, "resolved api key");

    let key_id = ctx.key.id;
    let db = state.database.clone();
    tokio::spawn(async move {
        if let Err(e) = db.touch_api_key(key_id).await {
            tracing::warn!("failed to update api key last_used_at: {e}");
        }
    });

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{CustomerCtx, DeveloperCtx, KeyCtx, TierCtx};

    fn ctx_with_key(active: bool, expires_at: Option<chrono::DateTime<chrono::Utc>>) -> AuthContext {
        AuthContext {
            key: KeyCtx { id: 1, active, expires_at },
            customer: CustomerCtx {
                id: 1,
                email: "a@example.com".to_string(),
                tier: TierCtx { id: 1, name: "free".to_string() },
                daily_quota: 1000,
            },
            developer: DeveloperCtx { id: 1, name: "acme".to_string(), upstream_base_url: None },
        }
    }

    #[test]
    fn inactive_key_is_not_live() {
        assert!(!is_live(&ctx_with_key(false, None)));
    }

    #[test]
    fn key_with_no_expiry_is_live() {
        assert!(is_live(&ctx_with_key(true, None)));
    }

    #[test]
    fn expired_key_is_not_live() {
        let past = chrono::Utc::now() - chrono::Duration::days(1);
        assert!(!is_live(&ctx_with_key(true, Some(past))));
    }

    #[test]
    fn key_expiring_in_the_future_is_live() {
        let future = chrono::Utc::now() + chrono::Duration::days(1);
        assert!(is_live(&ctx_with_key(true, Some(future))));
    }
}
