//! Fixtures shared by the integration tests: fixed RSA keys, an in-memory
//! user directory and a scripted identity verifier.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use tower_cookies::cookie::SameSite;

use kc_auth::crypto::jwt::TokenCodec;
use kc_auth::crypto::keys::{KeySet, SigningKey};
use kc_auth::error::{AppError, Result};
use kc_auth::models::user::{ExternalIdentity, NewUser, User};
use kc_auth::repositories::user::UserDirectory;
use kc_auth::services::auth::AuthService;
use kc_auth::services::cookies::CookiePolicy;
use kc_auth::services::identity::IdentityVerifier;
use kc_auth::session::memory_store::MemorySessionStore;

pub const ISSUER: &str = "one-kc";
pub const AUDIENCE: &str = "one-kc-web";

static PEM_PAIRS: Lazy<Vec<(String, String)>> = Lazy::new(|| {
    (0..2)
        .map(|_| {
            let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
            let private_pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
            let public_pem = private_key
                .to_public_key()
                .to_public_key_pem(LineEnding::LF)
                .unwrap();
            (private_pem, public_pem)
        })
        .collect()
});

pub fn signing_key(key_id: &str, index: usize) -> SigningKey {
    let (private_pem, public_pem) = &PEM_PAIRS[index];
    SigningKey::from_pem(key_id, private_pem, public_pem).unwrap()
}

/// `old` retiring, `new` active.
pub fn key_set() -> KeySet {
    KeySet::from_keys(vec![signing_key("old", 0), signing_key("new", 1)], "new").unwrap()
}

pub fn codec() -> TokenCodec {
    TokenCodec::new(
        ISSUER,
        AUDIENCE,
        Duration::from_secs(15 * 60),
        Duration::from_secs(7 * 86400),
    )
    .unwrap()
}

/// Users keyed by id, with sequential ids from 42.
pub struct MemoryUserDirectory {
    users: Mutex<HashMap<i64, User>>,
    next_id: AtomicI64,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(42),
        }
    }

    pub fn remove(&self, user_id: i64) {
        self.users.lock().remove(&user_id);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>> {
        Ok(self.users.lock().get(&user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<User> {
        let user = User {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            email: new_user.email,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            status: new_user.status,
        };
        self.users.lock().insert(user.id, user.clone());
        Ok(user)
    }
}

/// Accepts tokens of the form `google:<email>`; rejects everything else.
pub struct StaticIdentityVerifier;

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, external_token: &str) -> Result<ExternalIdentity> {
        let email = external_token
            .strip_prefix("google:")
            .ok_or_else(|| AppError::IdentityInvalid("token signature rejected".to_string()))?;
        Ok(ExternalIdentity {
            email: email.to_string(),
            first_name: "Ada".to_string(),
            last_name: Some("Lovelace".to_string()),
            subject: format!("sub-{}", email),
        })
    }
}

pub struct Harness {
    pub service: AuthService,
    pub sessions: MemorySessionStore,
    pub users: Arc<MemoryUserDirectory>,
}

pub fn harness() -> Harness {
    let sessions = MemorySessionStore::default();
    let users = Arc::new(MemoryUserDirectory::new());
    let service = AuthService::new(
        Arc::new(key_set()),
        codec(),
        Arc::new(sessions.clone()),
        users.clone(),
        Arc::new(StaticIdentityVerifier),
        CookiePolicy::new(true, SameSite::Lax),
    );
    Harness {
        service,
        sessions,
        users,
    }
}
