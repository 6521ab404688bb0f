//! Redis-backed session store.
//!
//! Layout: `refresh:<hash>` holds the owning user id with the session TTL;
//! `user:<id>:tokens` is a set of the user's live hashes. Every operation
//! touching both keys runs as one Lua script, so the cap check and insert,
//! and the rotation swap, are atomic on the server. Each call is bounded by
//! the configured timeout and fails as a retryable error instead of hanging.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult, Script};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::sanitize::sanitize_error;
use crate::session::store::{REFRESH_PREFIX, SessionStore, refresh_token_key, user_tokens_key};

/// Removes index members whose primary entry has expired.
/// KEYS[1] = index, ARGV[1] = entry prefix.
const PRUNE: &str = r#"
for _, member in ipairs(redis.call('SMEMBERS', KEYS[1])) do
  if redis.call('EXISTS', ARGV[1] .. member) == 0 then
    redis.call('SREM', KEYS[1], member)
  end
end
"#;

/// Runs after [`PRUNE`]. KEYS[1] = index, KEYS[2] = entry.
/// ARGV[1] = entry prefix, ARGV[2] = user id, ARGV[3] = ttl secs,
/// ARGV[4] = hash, ARGV[5] = max sessions.
/// Returns 1 when saved, 0 when the cap is reached.
const SAVE: &str = r#"
if redis.call('SISMEMBER', KEYS[1], ARGV[4]) == 0
   and redis.call('SCARD', KEYS[1]) >= tonumber(ARGV[5]) then
  return 0
end
redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[3])
redis.call('SADD', KEYS[1], ARGV[4])
if redis.call('TTL', KEYS[1]) < tonumber(ARGV[3]) then
  redis.call('EXPIRE', KEYS[1], ARGV[3])
end
return 1
"#;

/// KEYS[1] = old entry, KEYS[2] = new entry, KEYS[3] = index.
/// ARGV[1] = user id, ARGV[2] = ttl secs, ARGV[3] = old hash, ARGV[4] = new hash.
/// Returns 1 when rotated, 0 when the old entry is gone or foreign.
const ROTATE: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
  return 0
end
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[3], ARGV[3])
redis.call('SET', KEYS[2], ARGV[1], 'EX', ARGV[2])
redis.call('SADD', KEYS[3], ARGV[4])
if redis.call('TTL', KEYS[3]) < tonumber(ARGV[2]) then
  redis.call('EXPIRE', KEYS[3], ARGV[2])
end
return 1
"#;

/// KEYS[1] = entry, KEYS[2] = index. ARGV[1] = user id, ARGV[2] = hash.
const DELETE: &str = r#"
redis.call('SREM', KEYS[2], ARGV[2])
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('DEL', KEYS[1])
end
return 1
"#;

/// KEYS[1] = index. ARGV[1] = entry prefix. Returns the number of entries removed.
const DELETE_ALL: &str = r#"
local members = redis.call('SMEMBERS', KEYS[1])
for _, member in ipairs(members) do
  redis.call('DEL', ARGV[1] .. member)
end
redis.call('DEL', KEYS[1])
return #members
"#;

/// Runs after [`PRUNE`]. KEYS[1] = index.
const COUNT: &str = "return redis.call('SCARD', KEYS[1])";

/// Session store on a shared Redis connection manager.
#[derive(Clone)]
pub struct RedisSessionStore {
    redis: ConnectionManager,
    timeout: Duration,
    max_sessions: usize,
    save_script: Script,
    rotate_script: Script,
    delete_script: Script,
    delete_all_script: Script,
    count_script: Script,
}

impl RedisSessionStore {
    /// Wraps an existing connection manager.
    pub fn new(redis: ConnectionManager, timeout: Duration, max_sessions: usize) -> Self {
        Self {
            redis,
            timeout,
            max_sessions,
            save_script: Script::new(&format!("{}{}", PRUNE, SAVE)),
            rotate_script: Script::new(ROTATE),
            delete_script: Script::new(DELETE),
            delete_all_script: Script::new(DELETE_ALL),
            count_script: Script::new(&format!("{}{}", PRUNE, COUNT)),
        }
    }

    /// Opens a connection manager for `config.redis_url`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let redis = tokio::time::timeout(config.session_store_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| AppError::SessionStoreTimeout)??;
        tracing::info!("✅ Redis Connection Manager initialized (session store)");

        Ok(Self::new(
            redis,
            config.session_store_timeout,
            config.max_sessions_per_user,
        ))
    }

    /// Writes a marker key, proving the store is reachable and writable.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        self.bounded(async move { conn.set::<_, _, ()>("health", "ok").await })
            .await?;
        tracing::info!("✅ Session store health check passed");
        Ok(())
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|e| {
                tracing::error!("❌ Redis session store call failed: {}", sanitize_error(&e));
                AppError::SessionStore(e)
            }),
            Err(_) => {
                tracing::error!("❌ Redis session store call timed out after {:?}", self.timeout);
                Err(AppError::SessionStoreTimeout)
            }
        }
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn save(&self, user_id: i64, hashed_token: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.redis.clone();
        let mut invocation = self.save_script.prepare_invoke();
        invocation
            .key(user_tokens_key(user_id))
            .key(refresh_token_key(hashed_token))
            .arg(REFRESH_PREFIX)
            .arg(user_id)
            .arg(ttl_secs(ttl))
            .arg(hashed_token)
            .arg(self.max_sessions);

        let saved: i64 = self
            .bounded(async move { invocation.invoke_async(&mut conn).await })
            .await?;

        if saved == 0 {
            tracing::warn!(user_id, "⚠️ Session limit reached");
            return Err(AppError::SessionLimitExceeded {
                max: self.max_sessions,
            });
        }
        Ok(())
    }

    async fn exists(&self, hashed_token: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let key = refresh_token_key(hashed_token);
        self.bounded(async move { conn.exists(key).await }).await
    }

    async fn delete(&self, hashed_token: &str, user_id: i64) -> Result<()> {
        let mut conn = self.redis.clone();
        let mut invocation = self.delete_script.prepare_invoke();
        invocation
            .key(refresh_token_key(hashed_token))
            .key(user_tokens_key(user_id))
            .arg(user_id)
            .arg(hashed_token);

        let _: i64 = self
            .bounded(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: i64) -> Result<()> {
        let mut conn = self.redis.clone();
        let mut invocation = self.delete_all_script.prepare_invoke();
        invocation.key(user_tokens_key(user_id)).arg(REFRESH_PREFIX);

        let removed: i64 = self
            .bounded(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        tracing::debug!(user_id, removed, "Deleted all sessions for user");
        Ok(())
    }

    async fn compare_and_rotate(
        &self,
        user_id: i64,
        old_hash: &str,
        new_hash: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.redis.clone();
        let mut invocation = self.rotate_script.prepare_invoke();
        invocation
            .key(refresh_token_key(old_hash))
            .key(refresh_token_key(new_hash))
            .key(user_tokens_key(user_id))
            .arg(user_id)
            .arg(ttl_secs(ttl))
            .arg(old_hash)
            .arg(new_hash);

        let rotated: i64 = self
            .bounded(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(rotated == 1)
    }

    async fn count_for_user(&self, user_id: i64) -> Result<usize> {
        let mut conn = self.redis.clone();
        let mut invocation = self.count_script.prepare_invoke();
        invocation.key(user_tokens_key(user_id)).arg(REFRESH_PREFIX);

        let count: i64 = self
            .bounded(async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok(count.max(0) as usize)
    }
}
