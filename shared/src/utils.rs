//! Small stateless helpers shared by both processes

use chrono::TimeZone;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Seconds remaining until the next midnight in `tz`, and the instant of
/// that midnight expressed in UTC. Both the gateway's rate limiter and
/// billing's rate-limit inspection endpoint must derive the same instant
/// from this function, since it also determines the fast-store counter
/// key (`rate:{customer_id}:{reset_at.date_naive()}`).
pub fn next_local_midnight(tz: chrono_tz::Tz) -> (i64, chrono::DateTime<chrono::Utc>) {
    let now_local = chrono::Utc::now().with_timezone(&tz);
    let next_midnight_local = (now_local + chrono::Duration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let next_midnight = tz
        .from_local_datetime(&next_midnight_local)
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&next_midnight_local));

    let seconds = (next_midnight.with_timezone(&chrono::Utc) - chrono::Utc::now()).num_seconds();
    (seconds.max(1), next_midnight.with_timezone(&chrono::Utc))
}

/// Generates a unique id for request tracing, attached as `x-request-id`.
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Formats a decimal amount as a two-decimal currency string.
pub fn format_currency(amount: Decimal) -> String {
    format!("${:.2}", amount)
}

/// Headers the proxy forwarder strips before relaying a request upstream:
/// hop-by-hop headers (RFC 7230 §6.1) plus the ones the gateway itself
/// injects or consumes (`host`, `x-api-key`, `x-forwarded-for`,
/// `x-real-ip`, `content-length`, `content-type` — transport headers the
/// HTTP client recomputes).
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "x-api-key"
            | "x-forwarded-for"
            | "x-real-ip"
            | "content-length"
            | "content-type"
    )
}

/// Constant-time byte comparison for secret headers (`x-admin-key`), so a
/// timing side-channel can't leak how many leading bytes matched.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Retries an async operation up to `max_retries` additional times with a
/// fixed delay between attempts.
pub async fn retry_async<F, Fut, T, E>(
    mut operation: F,
    max_retries: usize,
    delay: std::time::Duration,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
{
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                last_error = Some(error);
                if attempt < max_retries {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(last_error.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_currency_with_two_decimals() {
        assert_eq!(format_currency(Decimal::new(150, 2)), "$1.50");
        assert_eq!(format_currency(Decimal::new(0, 0)), "$0.00");
    }

    #[test]
    fn recognizes_hop_by_hop_headers_case_insensitively() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("transfer-encoding"));
        assert!(is_hop_by_hop_header("X-Api-Key"));
        assert!(is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("authorization"));
    }

    #[test]
    fn next_local_midnight_is_within_one_day() {
        let (seconds, reset_at) = next_local_midnight(chrono_tz::UTC);
        assert!(seconds > 0 && seconds <= 86_400);
        assert!(reset_at > chrono::Utc::now());
    }

    #[test]
    fn next_local_midnight_lands_on_local_midnight() {
        use chrono::Timelike;
        let tz = chrono_tz::America::Panama;
        let (_, reset_at) = next_local_midnight(tz);
        let local = reset_at.with_timezone(&tz);
        assert_eq!((local.time().hour(), local.time().minute(), local.time().second()), (0, 0, 0));
    }

    #[test]
    fn constant_time_eq_matches_equal_strings_only() {
        assert!(constant_time_eq("secret123", "secret123"));
        assert!(!constant_time_eq("secret123", "secret124"));
        assert!(!constant_time_eq("short", "shorter"));
    }

    #[tokio::test]
    async fn retry_async_returns_first_success() {
        let mut calls = 0;
        let result = retry_async(
            || {
                calls += 1;
                async move {
                    if calls < 3 {
                        Err("not yet")
                    } else {
                        Ok(calls)
                    }
                }
            },
            5,
            std::time::Duration::from_millis(1),
        )
        .await;

        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn retry_async_gives_up_after_max_retries() {
        let result: std::result::Result<(), &str> = retry_async(
            || async { Err("always fails") },
            2,
            std::time::Duration::from_millis(1),
        )
        .await;

        assert_eq!(result, Err("always fails"));
    }
}
