use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kc_auth::config::Config;
use kc_auth::crypto::jwt::TokenCodec;
use kc_auth::crypto::keys::KeySet;
use kc_auth::db;
use kc_auth::id_generator::IdGenerator;
use kc_auth::repositories::user::{PgUserDirectory, UserDirectory};
use kc_auth::session::redis_store::RedisSessionStore;

/// Loads configuration and key material, checks both backends and prints
/// the JWKS document for the verification key set.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let keys = match KeySet::load(&config.jwt.keys, &config.jwt.active_key_id) {
        Ok(keys) => Arc::new(keys),
        Err(e) => {
            tracing::error!("❌ Failed to load signing keys: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!(
        active_key_id = keys.active_key_id(),
        keys = keys.all_keys().len(),
        "✅ Key set loaded"
    );
    TokenCodec::from_config(&config.jwt)?;

    let ids = Arc::new(IdGenerator::new(
        config.snowflake_worker_id,
        config.snowflake_datacenter_id,
    )?);

    let sessions = RedisSessionStore::connect(&config).await?;
    sessions.health_check().await?;

    let pool = db::create_pool(&config)?;
    let users = PgUserDirectory::new(pool, ids);
    // Fails fast when the users table is missing.
    users.find_by_id(0).await?;
    tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

    tracing::info!(
        max_sessions = config.max_sessions_per_user,
        "✅ Auth core ready"
    );

    println!("{}", sonic_rs::to_string(&keys.jwks())?);
    Ok(())
}
