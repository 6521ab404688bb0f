pub mod config;
pub mod db;
pub mod error;
pub mod id_generator;
pub mod sanitize;

pub mod crypto {
    pub mod jwt;
    pub mod keys;
    pub mod token_hash;
}

pub mod session {
    pub mod memory_store;
    pub mod redis_store;
    pub mod store;
}

pub mod models {
    pub mod auth;
    pub mod user;
}

pub mod repositories {
    pub mod user;
}

pub mod services {
    pub mod auth;
    pub mod cookies;
    pub mod identity;
}

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use error::{AppError, Result};
pub use services::auth::AuthService;
