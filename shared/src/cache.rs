//! Fast-store access (Redis): key-context cache, rate counters and the
//! write-behind usage buffer

use crate::config::RedisConfig;
use crate::models::{AuthContext, NewUsageRecord, RateLimitOutcome};
use crate::Result;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client, Script};
use tracing::info;

const KEY_CONTEXT_TTL_SECONDS: u64 = 300;

/// Atomically compares a per-customer-per-day counter against the quota
/// and increments it in one round trip, so concurrent admissions never
/// overshoot by more than the one in flight. The caller short-circuits
/// the unlimited (`quota == 0`) case before this script is ever invoked.
///
/// KEYS[1] = counter key
/// ARGV[1] = quota
/// ARGV[2] = seconds until the deployment-timezone midnight reset
///
/// Returns `{allowed (0/1), c}`, where `c` is the count *before* this
/// request — quota − c is the remaining count per spec, except the very
/// first request against a fresh key, where `c` is the post-increment
/// count (1), since there is no "before" value to report.
const CHECK_AND_INCREMENT_SCRIPT: &str = r#"
local quota = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])

local count = tonumber(redis.call('GET', KEYS[1]) or '0')
if count >= quota then
    return {0, count}
end

local new_count = redis.call('INCR', KEYS[1])
if new_count == 1 then
    redis.call('EXPIRE', KEYS[1], ttl)
    return {1, new_count}
end

return {1, count}
"#;

#[derive(Debug, Clone)]
pub struct RedisService {
    connection: MultiplexedConnection,
}

impl RedisService {
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        info!("Initializing Redis connection");

        let client = Client::open(config.url.as_str())?;
        let connection = client.get_multiplexed_tokio_connection().await?;

        let mut conn = connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("Redis connection initialized successfully");

        Ok(Self { connection })
    }

    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    // -- key-context cache (§4.1) -------------------------------------

    fn key_context_cache_key(secret: &str) -> String {
        format!("key-context:{secret}")
    }

    pub async fn get_key_context(&self, secret: &str) -> Result<Option<AuthContext>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(Self::key_context_cache_key(secret)).await?;
        Ok(raw
            .map(|s| serde_json::from_str(&s))
            .transpose()?)
    }

    pub async fn set_key_context(&self, secret: &str, ctx: &AuthContext) -> Result<()> {
        let serialized = serde_json::to_string(ctx)?;
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(
            Self::key_context_cache_key(secret),
            serialized,
            KEY_CONTEXT_TTL_SECONDS,
        )
        .await?;
        Ok(())
    }

    pub async fn invalidate_key_context(&self, secret: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(Self::key_context_cache_key(secret)).await?;
        Ok(())
    }

    // -- rate limiting (§4.2) ------------------------------------------

    /// The counter key is scoped by the *next* local-midnight instant's
    /// date, not "today" — callers must derive `reset_at` the same way
    /// (`shared::utils::next_local_midnight`) to land on the same key.
    fn rate_counter_key(customer_id: i64, reset_at: chrono::DateTime<chrono::Utc>) -> String {
        format!("rate:{customer_id}:{}", reset_at.date_naive())
    }

    /// Performs the atomic check-and-increment for `customer_id` against
    /// `quota`. `seconds_to_reset` should be the number of seconds until
    /// the next deployment-timezone midnight.
    pub async fn check_and_increment_rate(
        &self,
        customer_id: i64,
        quota: i64,
        seconds_to_reset: i64,
        reset_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<RateLimitOutcome> {
        if quota == 0 {
            return Ok(RateLimitOutcome {
                allowed: true,
                remaining: u64::MAX,
                reset_at,
            });
        }

        let key = Self::rate_counter_key(customer_id, reset_at);
        let mut conn = self.connection.clone();

        let (allowed, c): (i64, i64) = Script::new(CHECK_AND_INCREMENT_SCRIPT)
            .key(&key)
            .arg(quota)
            .arg(seconds_to_reset.max(1))
            .invoke_async(&mut conn)
            .await?;

        Ok(RateLimitOutcome {
            allowed: allowed == 1,
            remaining: (quota - c).max(0) as u64,
            reset_at,
        })
    }

    // -- usage buffer (§4.3) --------------------------------------------

    const CUSTOMER_BUFFER_CAP: isize = 1_000;
    const GLOBAL_BUFFER_CAP: isize = 5_000;
    const GLOBAL_BUFFER_KEY: &'static str = "usage-buffer:global";

    fn customer_buffer_key(customer_id: i64) -> String {
        format!("usage-buffer:customer:{customer_id}")
    }

    /// Pushes a usage record onto both the per-customer and global capped
    /// lists, trimming each to its cap with `LTRIM`.
    pub async fn push_usage_record(&self, record: &NewUsageRecord) -> Result<()> {
        let serialized = serde_json::to_string(record)?;
        let customer_key = Self::customer_buffer_key(record.customer_id);
        let mut conn = self.connection.clone();

        redis::pipe()
            .lpush(&customer_key, &serialized)
            .ltrim(&customer_key, 0, Self::CUSTOMER_BUFFER_CAP - 1)
            .lpush(Self::GLOBAL_BUFFER_KEY, &serialized)
            .ltrim(Self::GLOBAL_BUFFER_KEY, 0, Self::GLOBAL_BUFFER_CAP - 1)
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(())
    }

    /// Drains up to `max` entries from the global buffer without removing
    /// them; the caller persists them and then calls
    /// [`RedisService::trim_drained`] to atomically cut the drained prefix.
    pub async fn drain_usage_batch(&self, max: isize) -> Result<Vec<NewUsageRecord>> {
        let mut conn = self.connection.clone();
        let raw: Vec<String> = conn.lrange(Self::GLOBAL_BUFFER_KEY, 0, max - 1).await?;

        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(Into::into))
            .collect()
    }

    /// Removes the first `count` entries from the global buffer — the
    /// batch that was just persisted.
    pub async fn trim_drained(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        conn.ltrim::<_, ()>(Self::GLOBAL_BUFFER_KEY, count as isize, -1)
            .await?;
        Ok(())
    }

    pub async fn global_buffer_len(&self) -> Result<i64> {
        let mut conn = self.connection.clone();
        Ok(conn.llen(Self::GLOBAL_BUFFER_KEY).await?)
    }

    /// Read-only peek at a customer's current daily counter, for the admin
    /// rate-limit inspection endpoint. Does not mutate or reset the key.
    /// `reset_at` must be derived the same way as the gateway's write path
    /// (`shared::utils::next_local_midnight`) or the keys diverge.
    pub async fn peek_rate_counter(
        &self,
        customer_id: i64,
        reset_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<i64>> {
        let key = Self::rate_counter_key(customer_id, reset_at);
        let mut conn = self.connection.clone();
        Ok(conn.get(key).await?)
    }
}
