//! The auth orchestrator: login, refresh, logout and logout-all.
//!
//! Each refresh token moves through issued, active, rotated or revoked, and
//! expires when its TTL elapses. Rotation is a single `compare_and_rotate`
//! on the session store; the replacement pair is minted first and only
//! handed out if that swap wins.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::crypto::jwt::{Token, TokenCodec};
use crate::crypto::keys::KeySet;
use crate::crypto::token_hash::hash_refresh_token;
use crate::error::{AppError, Result};
use crate::models::auth::{AuthCookies, LoginResponse, SessionResponse};
use crate::models::user::{ExternalIdentity, User, UserProfile};
use crate::repositories::user::UserDirectory;
use crate::sanitize::sanitize_error;
use crate::services::cookies::CookiePolicy;
use crate::services::identity::IdentityVerifier;
use crate::session::store::SessionStore;

/// Composes keys, tokens, sessions and the two collaborators into the
/// user-facing auth flows.
#[derive(Clone)]
pub struct AuthService {
    keys: Arc<KeySet>,
    codec: TokenCodec,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    identity: Arc<dyn IdentityVerifier>,
    cookies: CookiePolicy,
}

impl AuthService {
    pub fn new(
        keys: Arc<KeySet>,
        codec: TokenCodec,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        identity: Arc<dyn IdentityVerifier>,
        cookies: CookiePolicy,
    ) -> Self {
        Self {
            keys,
            codec,
            sessions,
            users,
            identity,
            cookies,
        }
    }

    /// Builds the service from configuration and already-connected backends.
    pub fn from_config(
        config: &Config,
        keys: Arc<KeySet>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Result<Self> {
        Ok(Self::new(
            keys,
            TokenCodec::from_config(&config.jwt)?,
            sessions,
            users,
            identity,
            CookiePolicy::from_config(config),
        ))
    }

    /// Logs a user in with a token from the external identity provider.
    ///
    /// # Arguments
    ///
    /// * `external_token` - The provider-issued credential.
    ///
    /// # Returns
    ///
    /// Fresh access and refresh cookies plus the user's profile.
    ///
    /// # Errors
    ///
    /// `SessionLimitExceeded` when the user already holds the maximum number
    /// of sessions, a retryable store error, or `LoginFailed` for anything else.
    pub async fn login(&self, external_token: &str) -> Result<LoginResponse> {
        match self.try_login(external_token).await {
            Ok(response) => Ok(response),
            Err(e @ AppError::SessionLimitExceeded { .. }) => Err(e),
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                tracing::warn!("❌ Login failed: {}", sanitize_error(&e));
                Err(AppError::LoginFailed)
            }
        }
    }

    async fn try_login(&self, external_token: &str) -> Result<LoginResponse> {
        let identity = self.identity.verify(external_token).await?;
        let user = self.resolve_user(&identity).await?;

        let (access, refresh) = self.mint_pair(&user)?;
        self.sessions
            .save(user.id, &hash_refresh_token(&refresh.value), self.session_ttl())
            .await?;

        tracing::info!(user_id = user.id, key_id = %access.key_id, "🔐 Login successful");
        Ok(LoginResponse {
            cookies: self.token_cookies(access, refresh),
            profile: UserProfile::from(&user),
        })
    }

    /// Finds the local account for `identity`, creating an inactive one on
    /// first login.
    async fn resolve_user(&self, identity: &ExternalIdentity) -> Result<User> {
        if let Some(user) = self.users.find_by_email(&identity.email).await? {
            return Ok(user);
        }
        let user = self.users.create(identity.to_new_user()).await?;
        tracing::info!(user_id = user.id, "New account created on first login");
        Ok(user)
    }

    /// Exchanges a refresh token for a new access and refresh pair.
    ///
    /// The presented token stops working once this returns `Ok`.
    ///
    /// # Errors
    ///
    /// A retryable store error, or `Unauthorized` for a missing, invalid,
    /// expired, revoked or orphaned token.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<SessionResponse> {
        match self.try_refresh(refresh_token).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                tracing::warn!("❌ Refresh token failed: {}", sanitize_error(&e));
                Err(AppError::Unauthorized)
            }
        }
    }

    async fn try_refresh(&self, refresh_token: Option<&str>) -> Result<SessionResponse> {
        let token = present(refresh_token)?;
        let user_id = self.refresh_subject(token)?;

        let old_hash = hash_refresh_token(token);
        if !self.sessions.exists(&old_hash).await? {
            return Err(AppError::TokenRevoked);
        }

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::UserNotFound(user_id))?;

        let (access, refresh) = self.mint_pair(&user)?;
        let new_hash = hash_refresh_token(&refresh.value);
        let rotated = self
            .sessions
            .compare_and_rotate(user.id, &old_hash, &new_hash, self.session_ttl())
            .await?;
        if !rotated {
            tracing::warn!(user_id, "⚠️ Refresh token already rotated or revoked");
            return Err(AppError::TokenRevoked);
        }

        tracing::info!(user_id, key_id = %access.key_id, "🔄 Refresh token rotated");
        Ok(SessionResponse {
            cookies: self.token_cookies(access, refresh),
            message: "Token refreshed",
        })
    }

    /// Revokes the presented refresh token, if any, and clears both cookies.
    ///
    /// Never fails: a missing, invalid or already revoked token still yields
    /// cleared cookies, and store failures are only logged.
    pub async fn logout(&self, refresh_token: Option<&str>) -> SessionResponse {
        if let Some(token) = refresh_token.filter(|t| !t.is_empty()) {
            match self.codec.decode(token, &self.keys).and_then(|c| c.subject_user_id()) {
                Ok(user_id) => {
                    match self.sessions.delete(&hash_refresh_token(token), user_id).await {
                        Ok(()) => tracing::info!(user_id, "👋 Logout"),
                        Err(e) => tracing::error!(
                            user_id,
                            "❌ Logout could not revoke session: {}",
                            sanitize_error(&e)
                        ),
                    }
                }
                Err(e) => tracing::debug!(
                    "Logout with unusable refresh token: {}",
                    sanitize_error(&e)
                ),
            }
        }

        SessionResponse {
            cookies: self.cookies.cleared_cookies(),
            message: "Logout successful",
        }
    }

    /// Revokes every session of the refresh token's owner and clears both cookies.
    ///
    /// # Errors
    ///
    /// A retryable store error, or `Unauthorized` when the token is missing,
    /// invalid or not a refresh token.
    pub async fn logout_all(&self, refresh_token: Option<&str>) -> Result<SessionResponse> {
        let revoke = async {
            let user_id = self.refresh_subject(present(refresh_token)?)?;
            self.sessions.delete_all_for_user(user_id).await?;
            Ok::<_, AppError>(user_id)
        };

        match revoke.await {
            Ok(user_id) => {
                tracing::info!(user_id, "👋 Logged out from all devices");
                Ok(SessionResponse {
                    cookies: self.cookies.cleared_cookies(),
                    message: "Logged out from all devices",
                })
            }
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                tracing::warn!("❌ Logout-all rejected: {}", sanitize_error(&e));
                Err(AppError::Unauthorized)
            }
        }
    }

    /// Decodes `token`, requires it to be a refresh token and returns its subject.
    fn refresh_subject(&self, token: &str) -> Result<i64> {
        let claims = self.codec.decode(token, &self.keys)?;
        if !claims.is_refresh_token() {
            return Err(AppError::TokenInvalid("not a refresh token".to_string()));
        }
        claims.subject_user_id()
    }

    fn mint_pair(&self, user: &User) -> Result<(Token, Token)> {
        let key = self.keys.active_key();
        let access = self.codec.mint_access(user, key)?;
        let refresh = self.codec.mint_refresh(user.id, key)?;
        Ok((access, refresh))
    }

    fn token_cookies(&self, access: Token, refresh: Token) -> AuthCookies {
        self.cookies.token_cookies(
            access.value,
            self.codec.access_ttl_secs(),
            refresh.value,
            self.codec.refresh_ttl_secs(),
        )
    }

    /// Session entries live exactly as long as the refresh token.
    fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.codec.refresh_ttl_secs().max(0) as u64)
    }
}

fn present(token: Option<&str>) -> Result<&str> {
    token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::TokenInvalid("missing refresh token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::{NewUser, UserStatus};
    use crate::session::memory_store::MemorySessionStore;
    use crate::testutil;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tower_cookies::cookie::SameSite;

    struct OneUser(Mutex<Option<User>>);

    #[async_trait]
    impl UserDirectory for OneUser {
        async fn find_by_id(&self, user_id: i64) -> Result<Option<User>> {
            Ok(self.0.lock().clone().filter(|u| u.id == user_id))
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
            Ok(self.0.lock().clone().filter(|u| u.email == email))
        }

        async fn create(&self, new_user: NewUser) -> Result<User> {
            let user = User {
                id: 42,
                email: new_user.email,
                first_name: new_user.first_name,
                last_name: new_user.last_name,
                status: new_user.status,
            };
            *self.0.lock() = Some(user.clone());
            Ok(user)
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl IdentityVerifier for AcceptAll {
        async fn verify(&self, external_token: &str) -> Result<ExternalIdentity> {
            if external_token == "bad" {
                return Err(AppError::IdentityInvalid(
                    "upstream rejected id_token=eyJleHBvc2VkIn0".to_string(),
                ));
            }
            Ok(ExternalIdentity {
                email: "ada@example.com".to_string(),
                first_name: "Ada".to_string(),
                last_name: None,
                subject: "google-1".to_string(),
            })
        }
    }

    struct UnreachableDirectory;

    #[async_trait]
    impl UserDirectory for UnreachableDirectory {
        async fn find_by_id(&self, _user_id: i64) -> Result<Option<User>> {
            Err(AppError::Pool(deadpool_postgres::PoolError::Closed))
        }

        async fn find_by_email(&self, _email: &str) -> Result<Option<User>> {
            Err(AppError::Pool(deadpool_postgres::PoolError::Closed))
        }

        async fn create(&self, _new_user: NewUser) -> Result<User> {
            Err(AppError::Pool(deadpool_postgres::PoolError::Closed))
        }
    }

    /// Collects formatted log lines.
    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogCapture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    fn service(store: MemorySessionStore) -> AuthService {
        service_with(store, Arc::new(OneUser(Mutex::new(None))))
    }

    fn service_with(store: MemorySessionStore, users: Arc<dyn UserDirectory>) -> AuthService {
        AuthService::new(
            Arc::new(testutil::rollover_key_set()),
            TokenCodec::new(
                "one-kc",
                "one-kc-web",
                Duration::from_secs(900),
                Duration::from_secs(7 * 86400),
            )
            .unwrap(),
            Arc::new(store),
            users,
            Arc::new(AcceptAll),
            CookiePolicy::new(true, SameSite::Lax),
        )
    }

    #[tokio::test]
    async fn first_login_creates_an_inactive_account() {
        let store = MemorySessionStore::default();
        let response = service(store.clone()).login("good").await.unwrap();

        assert_eq!(response.profile.user_id, "42");
        assert_eq!(response.profile.status, UserStatus::Inactive);
        assert_eq!(store.count_for_user(42).await.unwrap(), 1);
        assert_eq!(response.cookies.access.max_age().map(|d| d.whole_seconds()), Some(900));
    }

    #[tokio::test]
    async fn identity_failure_is_generic() {
        let err = service(MemorySessionStore::default()).login("bad").await.unwrap_err();
        assert!(matches!(err, AppError::LoginFailed));
    }

    #[tokio::test]
    async fn failure_causes_are_masked_in_logs() {
        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let service = service(MemorySessionStore::default());
        assert!(service.login("bad").await.is_err());

        let logs = capture.contents();
        assert!(logs.contains("Login failed"), "{}", logs);
        assert!(logs.contains("id_token=****"), "{}", logs);
        assert!(!logs.contains("eyJleHBvc2VkIn0"), "{}", logs);
    }

    #[tokio::test]
    async fn user_directory_outage_is_a_generic_login_failure() {
        let store = MemorySessionStore::default();
        let service = service_with(store.clone(), Arc::new(UnreachableDirectory));

        let err = service.login("good").await.unwrap_err();
        assert!(matches!(err, AppError::LoginFailed));
        assert_eq!(store.count_for_user(42).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn access_token_cannot_refresh() {
        let service = service(MemorySessionStore::default());
        let login = service.login("good").await.unwrap();

        let err = service
            .refresh(Some(login.cookies.access.value()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn missing_cookie_is_unauthorized() {
        let service = service(MemorySessionStore::default());
        assert!(matches!(service.refresh(None).await, Err(AppError::Unauthorized)));
        assert!(matches!(service.refresh(Some("")).await, Err(AppError::Unauthorized)));
        assert!(matches!(service.logout_all(None).await, Err(AppError::Unauthorized)));
    }
}
