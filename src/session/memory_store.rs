//! In-process session store.
//!
//! One mutex guards both the entries and the per-user indexes, so every
//! operation is atomic. Expiry is evaluated lazily against
//! [`tokio::time::Instant`], which lets tests drive it with a paused clock.
//! Data is lost when the process exits; use it for tests and single-node
//! development.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::session::store::{DEFAULT_MAX_SESSIONS_PER_USER, SessionStore};

struct Entry {
    user_id: i64,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    index: HashMap<i64, HashSet<String>>,
}

impl Inner {
    fn is_live(&self, hashed_token: &str, now: Instant) -> bool {
        self.entries
            .get(hashed_token)
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Drops expired entries owned by `user_id` from both maps.
    fn prune_user(&mut self, user_id: i64, now: Instant) {
        let Some(hashes) = self.index.get(&user_id) else {
            return;
        };
        let expired: Vec<String> = hashes
            .iter()
            .filter(|hash| !self.is_live(hash, now))
            .cloned()
            .collect();

        for hash in &expired {
            self.entries.remove(hash);
        }
        if let Some(hashes) = self.index.get_mut(&user_id) {
            for hash in &expired {
                hashes.remove(hash);
            }
            if hashes.is_empty() {
                self.index.remove(&user_id);
            }
        }
    }
}

/// Session store held in process memory. Clones share the same data.
#[derive(Clone)]
pub struct MemorySessionStore {
    inner: Arc<Mutex<Inner>>,
    max_sessions: usize,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS_PER_USER)
    }
}

impl MemorySessionStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            max_sessions,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, user_id: i64, hashed_token: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.prune_user(user_id, now);

        let index = inner.index.entry(user_id).or_default();
        if !index.contains(hashed_token) && index.len() >= self.max_sessions {
            return Err(AppError::SessionLimitExceeded {
                max: self.max_sessions,
            });
        }
        index.insert(hashed_token.to_string());
        inner.entries.insert(
            hashed_token.to_string(),
            Entry {
                user_id,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn exists(&self, hashed_token: &str) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let owner = match inner.entries.get(hashed_token) {
            None => return Ok(false),
            Some(entry) if entry.expires_at > now => return Ok(true),
            Some(entry) => entry.user_id,
        };
        // Evict the owner's expired sessions along with this one.
        inner.prune_user(owner, now);
        Ok(false)
    }

    async fn delete(&self, hashed_token: &str, user_id: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(hashes) = inner.index.get_mut(&user_id) {
            hashes.remove(hashed_token);
            if hashes.is_empty() {
                inner.index.remove(&user_id);
            }
        }
        if inner
            .entries
            .get(hashed_token)
            .is_some_and(|entry| entry.user_id == user_id)
        {
            inner.entries.remove(hashed_token);
        }
        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(hashes) = inner.index.remove(&user_id) {
            for hash in hashes {
                inner.entries.remove(&hash);
            }
        }
        Ok(())
    }

    async fn compare_and_rotate(
        &self,
        user_id: i64,
        old_hash: &str,
        new_hash: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let owned_and_live = inner
            .entries
            .get(old_hash)
            .is_some_and(|entry| entry.user_id == user_id && entry.expires_at > now);
        if !owned_and_live {
            return Ok(false);
        }

        inner.entries.remove(old_hash);
        inner.entries.insert(
            new_hash.to_string(),
            Entry {
                user_id,
                expires_at: now + ttl,
            },
        );
        let index = inner.index.entry(user_id).or_default();
        index.remove(old_hash);
        index.insert(new_hash.to_string());
        Ok(true)
    }

    async fn count_for_user(&self, user_id: i64) -> Result<usize> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.prune_user(user_id, now);
        Ok(inner.index.get(&user_id).map_or(0, HashSet::len))
    }
}
