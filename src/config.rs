use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tower_cookies::cookie::SameSite;

/// One signing key pair as configured (`jwt.keys[]`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyConfig {
    /// The key id embedded in token headers.
    pub key_id: String,
    /// Path to the X.509 (SubjectPublicKeyInfo) PEM public key.
    pub public_key_path: PathBuf,
    /// Path to the PKCS#8 PEM private key.
    pub private_key_path: PathBuf,
}

/// The JWT section of the configuration.
#[derive(Clone, Debug)]
pub struct JwtConfig {
    /// The key id that signs new tokens.
    pub active_key_id: String,
    /// Every key offered for verification.
    pub keys: Vec<KeyConfig>,
    /// The `iss` claim.
    pub issuer: String,
    /// The `aud` claim.
    pub audience: String,
    /// Lifetime of access tokens.
    pub access_token_ttl: Duration,
    /// Lifetime of refresh tokens and their session entries.
    pub refresh_token_ttl: Duration,
}

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// Deadline for every session store call.
    pub session_store_timeout: Duration,
    /// Maximum concurrent sessions per user.
    pub max_sessions_per_user: usize,
    /// Whether auth cookies carry the `Secure` attribute.
    pub token_secure: bool,
    /// The `SameSite` attribute of auth cookies.
    pub token_same_site: SameSite,
    /// JWT signing configuration.
    pub jwt: JwtConfig,
    /// Snowflake worker id (0..=31).
    pub snowflake_worker_id: u64,
    /// Snowflake datacenter id (0..=31).
    pub snowflake_datacenter_id: u64,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Creates a new `Config` from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let active_key_id = lookup("JWT_ACTIVE_KEY_ID")
            .context("JWT_ACTIVE_KEY_ID must be set")?;
        let keys = parse_key_list(&lookup("JWT_KEYS").context("JWT_KEYS must be set")?)?;

        let token_same_site = parse_same_site(
            &lookup("TOKEN_SAME_SITE").unwrap_or_else(|| "Lax".to_string()),
        )?;
        let token_secure: bool = parse_or(&lookup, "TOKEN_SECURE", true)?;
        if token_same_site == SameSite::None && !token_secure {
            tracing::warn!("TOKEN_SAME_SITE=None without TOKEN_SECURE; browsers will drop the cookies");
        }

        let access_minutes: u64 = parse_or(&lookup, "ACCESS_TOKEN_TTL_MINUTES", 15)?;
        let refresh_days: u64 = parse_or(&lookup, "REFRESH_TOKEN_TTL_DAYS", 7)?;
        if access_minutes == 0 || refresh_days == 0 {
            anyhow::bail!("token lifetimes must be positive");
        }
        let Some(access_secs) = access_minutes.checked_mul(60) else {
            anyhow::bail!("ACCESS_TOKEN_TTL_MINUTES is too large");
        };
        let Some(refresh_secs) = refresh_days.checked_mul(86400) else {
            anyhow::bail!("REFRESH_TOKEN_TTL_DAYS is too large");
        };

        let max_sessions_per_user: usize = parse_or(&lookup, "MAX_SESSIONS_PER_USER", 5)?;
        if max_sessions_per_user == 0 {
            anyhow::bail!("MAX_SESSIONS_PER_USER must be at least 1");
        }

        let snowflake_worker_id: u64 = parse_or(&lookup, "SNOWFLAKE_WORKER_ID", 0)?;
        let snowflake_datacenter_id: u64 = parse_or(&lookup, "SNOWFLAKE_DATACENTER_ID", 0)?;

        Ok(Self {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: lookup("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            session_store_timeout: Duration::from_millis(parse_or(
                &lookup,
                "SESSION_STORE_TIMEOUT_MS",
                2000,
            )?),
            max_sessions_per_user,
            token_secure,
            token_same_site,
            jwt: JwtConfig {
                active_key_id,
                keys,
                issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "one-kc".to_string()),
                audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| "one-kc-web".to_string()),
                access_token_ttl: Duration::from_secs(access_secs),
                refresh_token_ttl: Duration::from_secs(refresh_secs),
            },
            snowflake_worker_id,
            snowflake_datacenter_id,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        None => Ok(default),
    }
}

/// Parses `kid,public_path,private_path` entries separated by `;`.
fn parse_key_list(raw: &str) -> Result<Vec<KeyConfig>> {
    let mut keys = Vec::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<&str> = entry.split(',').map(str::trim).collect();
        let [key_id, public_key_path, private_key_path] = parts.as_slice() else {
            anyhow::bail!("JWT_KEYS entry must be `kid,public_path,private_path`: {}", entry);
        };
        if key_id.is_empty() {
            anyhow::bail!("JWT_KEYS entry has an empty key id");
        }
        if keys.iter().any(|k: &KeyConfig| k.key_id == *key_id) {
            anyhow::bail!("JWT_KEYS contains duplicate key id {}", key_id);
        }
        keys.push(KeyConfig {
            key_id: key_id.to_string(),
            public_key_path: PathBuf::from(public_key_path),
            private_key_path: PathBuf::from(private_key_path),
        });
    }
    if keys.is_empty() {
        anyhow::bail!("JWT_KEYS must list at least one key");
    }
    Ok(keys)
}

fn parse_same_site(raw: &str) -> Result<SameSite> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "strict" => Ok(SameSite::Strict),
        "lax" => Ok(SameSite::Lax),
        "none" => Ok(SameSite::None),
        other => anyhow::bail!("TOKEN_SAME_SITE must be Strict, Lax or None, got {}", other),
    }
}
