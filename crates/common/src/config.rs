//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Environment label (e.g. `development`, `production`).
    #[serde(default = "default_env")]
    pub env: String,
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Redis configuration.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Counts cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Change source configuration.
    #[serde(default)]
    pub source: SourceConfig,
    /// Rate limit quotas.
    #[serde(default)]
    pub ratelimit: RateLimitConfig,
    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen address of the telemetry endpoint.
    #[serde(default = "default_telemetry_addr")]
    pub telemetry_addr: String,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Key prefix for rate limiter buckets.
    #[serde(default = "default_ratelimit_prefix")]
    pub ratelimit_prefix: String,
}

/// Counts cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL of cached counts in seconds.
    #[serde(default = "default_count_ttl")]
    pub count_ttl_secs: u64,
}

/// Kind of change source used for state change propagation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Discard changes.
    Nop,
    /// In-process channel, consumed by workers in the same process.
    #[default]
    Memory,
    /// Amazon SQS queues.
    Sqs,
}

/// Change source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Source implementation.
    #[serde(default)]
    pub kind: SourceKind,
    /// Queue provider region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Prefix prepended to queue names.
    #[serde(default)]
    pub queue_prefix: String,
}

/// Per-app request quotas.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Quota for production apps.
    #[serde(default = "default_production_limit")]
    pub production: i64,
    /// Quota for staging apps.
    #[serde(default = "default_staging_limit")]
    pub staging: i64,
    /// Window length in seconds.
    #[serde(default = "default_window")]
    pub window_secs: i64,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON formatted logs.
    #[serde(default)]
    pub json: bool,
}

fn default_env() -> String {
    "development".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8083
}

fn default_telemetry_addr() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_database_url() -> String {
    "postgres://fanout@127.0.0.1:5432/fanout_dev".to_string()
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_ratelimit_prefix() -> String {
    "test.ratelimiter.".to_string()
}

const fn default_count_ttl() -> u64 {
    300
}

fn default_region() -> String {
    "us-east-1".to_string()
}

const fn default_production_limit() -> i64 {
    20_000
}

const fn default_staging_limit() -> i64 {
    100
}

const fn default_window() -> i64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            telemetry_addr: default_telemetry_addr(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            ratelimit_prefix: default_ratelimit_prefix(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            count_ttl_secs: default_count_ttl(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            region: default_region(),
            queue_prefix: String::new(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            production: default_production_limit(),
            staging: default_staging_limit(),
            window_secs: default_window(),
        }
    }
}

impl RateLimitConfig {
    /// Quota applied to an app depending on its production flag.
    #[must_use]
    pub const fn limit_for(&self, in_production: bool) -> i64 {
        if in_production {
            self.production
        } else {
            self.staging
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `FANOUT_ENV`)
    /// 4. Environment variables with `FANOUT_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();
        let env = std::env::var("FANOUT_ENV").unwrap_or_else(|_| default_env());

        let config = config::Config::builder()
            .set_default("env", env.clone())?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("FANOUT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("FANOUT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Socket address of the HTTP gateway.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.cache.count_ttl_secs, 300);
        assert_eq!(config.source.kind, SourceKind::Memory);
        assert_eq!(config.ratelimit.limit_for(true), 20_000);
        assert_eq!(config.ratelimit.limit_for(false), 100);
        assert_eq!(config.listen_addr(), "0.0.0.0:8083");
    }

    #[test]
    fn test_source_kind_parses_lowercase() {
        let config: Config = config::Config::builder()
            .set_override("source.kind", "sqs")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.source.kind, SourceKind::Sqs);
    }
}
