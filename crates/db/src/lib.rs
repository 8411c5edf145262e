//! Storage layer for fanout.
//!
//! Entities are stored per namespace behind the generic [`Service`] contract.
//! Concrete stores (Postgres, memory, nop) are wrapped by middleware for
//! logging, instrumentation, count caching and change sourcing.

pub mod cache;
pub mod entities;
pub mod middleware;
pub mod service;
pub mod source;
pub mod store;

pub use cache::{CountsCache, MemoryCountsCache, RedisCountsCache};
pub use service::{
    AppService, ConnectionService, DeviceService, EventService, ObjectService, ObjectServiceExt,
    ReactionCounts, ReactionService, ReactionServiceExt, RuleService, Service, ServiceExt,
    SessionService, UserService,
};
pub use source::{MemorySource, NopSource, Source, StateChange};

use fanout_common::{AppError, Config};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::log::LevelFilter;

/// Initialize database connection.
pub async fn init(config: &Config) -> Result<DatabaseConnection, AppError> {
    let mut opt = ConnectOptions::new(&config.database.url);

    opt.max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(LevelFilter::Debug);

    Database::connect(opt)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}
