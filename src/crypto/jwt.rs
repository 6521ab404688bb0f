//! Access and refresh token codec.
//!
//! Tokens are RS256 JWTs. The header carries the signing key id (`kid`);
//! verification looks that id up in the [`KeySet`], so any key still in the
//! set verifies. Claims are a tagged union on the `type` claim: access
//! tokens carry identity claims, refresh tokens carry only the subject.
//! Timestamps are epoch seconds.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::crypto::keys::{KeySet, SigningKey};
use crate::error::{AppError, Result};
use crate::models::user::User;

/// The `type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub jti: String,
    pub email: String,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName", default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// Claims of a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub jti: String,
}

/// Verified claims of either token kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Claims {
    Access(AccessClaims),
    Refresh(RefreshClaims),
}

impl Claims {
    pub fn token_type(&self) -> TokenType {
        match self {
            Claims::Access(_) => TokenType::Access,
            Claims::Refresh(_) => TokenType::Refresh,
        }
    }

    pub fn is_access_token(&self) -> bool {
        matches!(self, Claims::Access(_))
    }

    pub fn is_refresh_token(&self) -> bool {
        matches!(self, Claims::Refresh(_))
    }

    pub fn subject(&self) -> &str {
        match self {
            Claims::Access(c) => &c.sub,
            Claims::Refresh(c) => &c.sub,
        }
    }

    /// The subject parsed as a numeric user id.
    pub fn subject_user_id(&self) -> Result<i64> {
        self.subject()
            .parse()
            .map_err(|_| AppError::TokenInvalid("subject is not a user id".to_string()))
    }

    pub fn issued_at(&self) -> i64 {
        match self {
            Claims::Access(c) => c.iat,
            Claims::Refresh(c) => c.iat,
        }
    }

    pub fn expires_at(&self) -> i64 {
        match self {
            Claims::Access(c) => c.exp,
            Claims::Refresh(c) => c.exp,
        }
    }
}

/// A freshly minted token.
#[derive(Debug, Clone)]
pub struct Token {
    /// The compact JWS serialization.
    pub value: String,
    pub token_type: TokenType,
    pub key_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Mints and verifies tokens. Stateless apart from its settings.
#[derive(Clone)]
pub struct TokenCodec {
    issuer: String,
    audience: String,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self> {
        let issuer = issuer.into();
        let audience = audience.into();
        let to_chrono = |d: Duration| {
            chrono::Duration::from_std(d)
                .map_err(|e| AppError::ConfigInvalid(format!("token lifetime out of range: {}", e)))
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.set_issuer(&[&issuer]);
        validation.set_audience(&[&audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Ok(Self {
            access_ttl: to_chrono(access_ttl)?,
            refresh_ttl: to_chrono(refresh_ttl)?,
            issuer,
            audience,
            validation,
        })
    }

    pub fn from_config(config: &JwtConfig) -> Result<Self> {
        Self::new(
            config.issuer.clone(),
            config.audience.clone(),
            config.access_token_ttl,
            config.refresh_token_ttl,
        )
    }

    /// Access token lifetime in whole seconds.
    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    /// Refresh token lifetime in whole seconds.
    pub fn refresh_ttl_secs(&self) -> i64 {
        self.refresh_ttl.num_seconds()
    }

    pub fn mint_access(&self, user: &User, key: &SigningKey) -> Result<Token> {
        self.mint_access_at(user, key, Utc::now())
    }

    /// Mints an access token as if issued at `issued_at`.
    pub fn mint_access_at(
        &self,
        user: &User,
        key: &SigningKey,
        issued_at: DateTime<Utc>,
    ) -> Result<Token> {
        let expires_at = issued_at + self.access_ttl;
        let claims = Claims::Access(AccessClaims {
            sub: user.id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4().to_string(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        });
        self.sign(&claims, key, issued_at, expires_at)
    }

    pub fn mint_refresh(&self, user_id: i64, key: &SigningKey) -> Result<Token> {
        self.mint_refresh_at(user_id, key, Utc::now())
    }

    /// Mints a refresh token as if issued at `issued_at`.
    pub fn mint_refresh_at(
        &self,
        user_id: i64,
        key: &SigningKey,
        issued_at: DateTime<Utc>,
    ) -> Result<Token> {
        let expires_at = issued_at + self.refresh_ttl;
        let claims = Claims::Refresh(RefreshClaims {
            sub: user_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4().to_string(),
        });
        self.sign(&claims, key, issued_at, expires_at)
    }

    fn sign(
        &self,
        claims: &Claims,
        key: &SigningKey,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Token> {
        let mut header = Header::new(key.algorithm());
        header.kid = Some(key.key_id().to_string());

        let value = encode(&header, claims, key.encoding_key())
            .map_err(|e| AppError::Internal(format!("failed to sign token: {}", e)))?;

        Ok(Token {
            value,
            token_type: claims.token_type(),
            key_id: key.key_id().to_string(),
            issued_at,
            expires_at,
        })
    }

    /// Verifies `token` against the key named by its `kid` header and returns
    /// its claims.
    ///
    /// # Errors
    ///
    /// `TokenExpired` once `exp` is not after now; `TokenInvalid` for a bad
    /// signature, unknown key id, wrong algorithm, issuer or audience, or a
    /// malformed token.
    pub fn decode(&self, token: &str, keys: &KeySet) -> Result<Claims> {
        let header = decode_header(token)
            .map_err(|e| AppError::TokenInvalid(format!("malformed token: {}", e)))?;

        if header.alg != Algorithm::RS256 {
            return Err(AppError::TokenInvalid(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }

        let key_id = header
            .kid
            .ok_or_else(|| AppError::TokenInvalid("missing key id".to_string()))?;
        let key = keys
            .get(&key_id)
            .ok_or_else(|| AppError::TokenInvalid(format!("unknown key id {}", key_id)))?;

        let claims = decode::<Claims>(token, key.decoding_key(), &self.validation)
            .map_err(map_jwt_error)?
            .claims;

        // The library accepts `exp == now`; a token must expire strictly after now.
        if claims.expires_at() <= Utc::now().timestamp() {
            return Err(AppError::TokenExpired);
        }

        Ok(claims)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AppError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AppError::TokenExpired,
        _ => AppError::TokenInvalid(err.to_string()),
    }
}
