use deadpool_postgres::{ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts};
use std::time::Duration;
use tokio_postgres::NoTls;

use crate::config::Config;
use crate::error::{AppError, Result};

/// Connections held by the user directory pool. Lookups are short and
/// only happen on login and refresh.
const MAX_POOL_SIZE: usize = 16;

/// Creates the PostgreSQL pool backing the user directory.
///
/// # Arguments
///
/// * `config` - The application's configuration; only `database_url` is read.
///
/// # Returns
///
/// A `Result` containing the `Pool`. No connection is opened until first use.
pub fn create_pool(config: &Config) -> Result<Pool> {
    let mut cfg = deadpool_postgres::Config::new();
    cfg.url = Some(config.database_url.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig {
        max_size: MAX_POOL_SIZE,
        timeouts: Timeouts {
            wait: Some(Duration::from_secs(5)),
            create: Some(Duration::from_secs(2)),
            recycle: Some(Duration::from_secs(1)),
        },
        ..Default::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| AppError::ConfigInvalid(format!("Invalid database configuration: {}", e)))
}

