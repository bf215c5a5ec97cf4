//! Shared cache (redis): readiness ping and the per-tenant token bucket.
//!
//! The token bucket and its last-refill timestamp live under
//! `rate_limit:{tenant_id}` and `rate_limit:{tenant_id}:last_refill`. Both
//! keys carry a TTL refreshed on every request, so idle tenants' keys
//! expire instead of accumulating. Refill and consume happen inside one
//! Lua script, making the check atomic under concurrent requests.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Script;
use thiserror::Error;

/// Cache failures. All variants are transient from the caller's view.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache is unreachable or the command failed.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Outcome of a token-bucket check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,

    /// Tokens remaining after this request.
    pub remaining: f64,
}

// Refill proportionally to elapsed time, consume one token, reset the TTL
// on both keys. Returns {allowed, remaining} in one round trip.
const TOKEN_BUCKET_SCRIPT: &str = r"
local tokens_key = KEYS[1]
local refill_key = KEYS[2]
local capacity = tonumber(ARGV[1])
local refill_per_sec = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local tokens = tonumber(redis.call('GET', tokens_key))
if tokens == nil then tokens = capacity end
local last = tonumber(redis.call('GET', refill_key))
if last == nil then last = now end

local elapsed = now - last
if elapsed < 0 then elapsed = 0 end
tokens = math.min(capacity, tokens + elapsed * refill_per_sec)

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end

redis.call('SET', tokens_key, tostring(tokens), 'EX', ttl)
redis.call('SET', refill_key, tostring(now), 'EX', ttl)
return {allowed, tostring(tokens)}
";

/// Handle to the shared cache.
#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
    bucket_script: Script,
}

impl Cache {
    /// Connects and wraps a multiplexed connection manager.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the initial connection fails.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(CacheError::from)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            bucket_script: Script::new(TOKEN_BUCKET_SCRIPT),
        })
    }

    /// Readiness probe.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if PING fails.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Unavailable(format!("unexpected PING reply: {pong}")))
        }
    }

    /// A clone of the underlying connection for other cache users (the
    /// task broker shares the instance).
    #[must_use]
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Atomically takes one token from the tenant's bucket.
    ///
    /// `capacity` is the bucket size (tokens per minute); the refill rate
    /// is `capacity / 60` per second. Both cache keys get `ttl` applied.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the script cannot run.
    pub async fn take_token(
        &self,
        tenant_id: i64,
        capacity: i64,
        ttl: Duration,
        now_unix: f64,
    ) -> Result<RateDecision, CacheError> {
        let tokens_key = format!("rate_limit:{tenant_id}");
        let refill_key = format!("rate_limit:{tenant_id}:last_refill");
        let refill_per_sec = capacity as f64 / 60.0;

        let mut conn = self.conn.clone();
        let (allowed, remaining): (i64, String) = self
            .bucket_script
            .key(&tokens_key)
            .key(&refill_key)
            .arg(capacity)
            .arg(refill_per_sec)
            .arg(now_unix)
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await?;

        Ok(RateDecision {
            allowed: allowed == 1,
            remaining: remaining.parse().unwrap_or(0.0),
        })
    }
}
