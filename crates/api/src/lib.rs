//! HTTP API layer for fanout.
//!
//! This crate serves the versioned REST API:
//!
//! - **Endpoints**: users, connections, posts, comments, likes, reactions,
//!   feeds and devices under `/0.4`
//! - **Extractors**: app and user context, caller origin, paths and bodies
//! - **Middleware**: security headers, CORS, content checks, authentication
//! - **Rate limiting**: per-app quotas in memory or Redis
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod paging;
pub mod payload;
pub mod rate_limit;
pub mod response;
pub mod state;

pub use endpoints::{app, telemetry};
pub use rate_limit::{Limiter, MemoryLimiter, RedisLimiter};
pub use response::{ApiError, ApiResult};
pub use state::{AppState, Probe, RedisProbe, StaticProbe};
