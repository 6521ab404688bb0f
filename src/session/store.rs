//! Revocable refresh-token sessions.
//!
//! A session entry maps a refresh-token hash to its owning user and expires
//! with the token. Each user also has an index of their live hashes, which
//! bounds concurrent sessions and backs "log out everywhere". An entry for a
//! hash exists if and only if the hash is in its owner's index; every
//! backend mutates both in one atomic step.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Default ceiling on concurrent sessions per user.
pub const DEFAULT_MAX_SESSIONS_PER_USER: usize = 5;

/// Key prefix of primary session entries.
pub const REFRESH_PREFIX: &str = "refresh:";

/// Key of a primary session entry.
pub fn refresh_token_key(hashed_token: &str) -> String {
    format!("{}{}", REFRESH_PREFIX, hashed_token)
}

/// Key of a user's session index.
pub fn user_tokens_key(user_id: i64) -> String {
    format!("user:{}:tokens", user_id)
}

/// Storage for session entries. Hashes only; raw tokens never reach a store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Registers `hashed_token` for `user_id` for `ttl`.
    ///
    /// Re-saving a hash the user already holds only refreshes its TTL.
    ///
    /// # Errors
    ///
    /// `SessionLimitExceeded` when the user already holds the maximum number
    /// of live sessions. The check and the insert are atomic per user.
    async fn save(&self, user_id: i64, hashed_token: &str, ttl: Duration) -> Result<()>;

    /// Whether an unexpired entry exists for `hashed_token`.
    async fn exists(&self, hashed_token: &str) -> Result<bool>;

    /// Removes the entry and its index membership. Absent entries are a no-op.
    async fn delete(&self, hashed_token: &str, user_id: i64) -> Result<()>;

    /// Removes every entry the user holds, then the index itself.
    async fn delete_all_for_user(&self, user_id: i64) -> Result<()>;

    /// Atomically replaces `old_hash` with `new_hash` for `user_id`.
    ///
    /// Returns `false`, changing nothing, when `old_hash` is no longer live
    /// or belongs to another user. Of two concurrent rotations of one hash,
    /// exactly one succeeds.
    async fn compare_and_rotate(
        &self,
        user_id: i64,
        old_hash: &str,
        new_hash: &str,
        ttl: Duration,
    ) -> Result<bool>;

    /// Number of live sessions the user holds.
    async fn count_for_user(&self, user_id: i64) -> Result<usize>;
}
