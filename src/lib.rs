//! EMR backend core library
//!
//! Patient records, clinical orders and workflow queues for a clinic network,
//! served over a versioned REST API.

pub mod api;
pub mod db;
pub mod ehr;
pub mod error;
pub mod models;
pub mod security;

use ehr::EhrDatabase;
use security::TokenKeys;

/// Application configuration
pub mod config {
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(default)]
    pub struct Config {
        pub server: ServerConfig,
        pub database: DatabaseConfig,
        pub auth: AuthConfig,
        pub pagination: PaginationConfig,
        pub logging: LoggingConfig,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct ServerConfig {
        pub host: String,
        pub port: u16,
        pub workers: usize,
        pub cors_origins: Vec<String>,
    }

    impl Default for ServerConfig {
        fn default() -> Self {
            Self {
                host: "127.0.0.1".into(),
                port: 8000,
                workers: 4,
                cors_origins: Vec::new(),
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct DatabaseConfig {
        pub url: String,
        pub max_connections: u32,
    }

    impl Default for DatabaseConfig {
        fn default() -> Self {
            Self {
                url: "sqlite://emr.db".into(),
                max_connections: 10,
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct AuthConfig {
        pub jwt_secret: String,
        pub access_token_minutes: i64,
        pub refresh_token_days: i64,
    }

    impl Default for AuthConfig {
        fn default() -> Self {
            Self {
                jwt_secret: "change-me-in-production".into(),
                access_token_minutes: 60,
                refresh_token_days: 7,
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct PaginationConfig {
        pub page_size: u32,
        pub max_page_size: u32,
    }

    impl Default for PaginationConfig {
        fn default() -> Self {
            Self {
                page_size: 20,
                max_page_size: 1000,
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct LoggingConfig {
        pub level: String,
        pub json: bool,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: "info".into(),
                json: false,
            }
        }
    }

    /// Load configuration from file
    pub fn load_config() -> Result<Config, ::config::ConfigError> {
        let env = std::env::var("EMR_ENV").unwrap_or_else(|_| "development".into());

        ::config::Config::builder()
            // Start with default settings
            .add_source(::config::File::with_name("config/default").required(false))
            // Override with environment-specific settings
            .add_source(::config::File::with_name(&format!("config/{}", env)).required(false))
            // Override with environment variables, e.g. EMR_AUTH__JWT_SECRET
            .add_source(
                ::config::Environment::with_prefix("EMR")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

/// Shared state handed to every request through `web::Data`.
pub struct AppState {
    pub ehr: EhrDatabase,
    pub tokens: TokenKeys,
    pub config: config::Config,
}

impl AppState {
    pub fn new(ehr: EhrDatabase, config: config::Config) -> Self {
        let tokens = TokenKeys::new(&config.auth);
        Self { ehr, tokens, config }
    }
}
