//! Server configuration

use anyhow::Result;
use serde::Deserialize;

/// Server configuration, read from `COMPUTE_`-prefixed environment
/// variables with defaults for local development.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// SQLite database path
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// HMAC secret for signing access tokens
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Access token lifetime in hours
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,

    /// Resource sampler tick period in seconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    /// Bound on concurrent computation workers (0 = unbounded)
    #[serde(default)]
    pub max_concurrent_computations: usize,

    /// Per-computation timeout in seconds (0 = none)
    #[serde(default)]
    pub compute_timeout_secs: u64,

    /// Optional initial user created at startup
    #[serde(default)]
    pub bootstrap_email: Option<String>,
    #[serde(default)]
    pub bootstrap_password: Option<String>,
}

fn default_api_port() -> u16 {
    8080
}

fn default_database_path() -> String {
    "data/compute.db".to_string()
}

fn default_jwt_secret() -> String {
    // Overridden in any real deployment via COMPUTE_JWT_SECRET.
    "insecure-dev-secret".to_string()
}

fn default_token_ttl_hours() -> i64 {
    6
}

fn default_sample_interval() -> u64 {
    1
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            database_path: default_database_path(),
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl_hours(),
            sample_interval_secs: default_sample_interval(),
            max_concurrent_computations: 0,
            compute_timeout_secs: 0,
            bootstrap_email: None,
            bootstrap_password: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("COMPUTE"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }
}
