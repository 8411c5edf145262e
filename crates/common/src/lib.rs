//! Common utilities and shared types for fanout.
//!
//! - **Configuration**: layered settings via [`Config`]
//! - **Error handling**: error kinds shared by every layer via [`AppError`] and [`AppResult`]
//! - **Passwords**: scrypt hashing in [`crypto`]
//! - **ID Generation**: namespace-keyed monotonic ids and tokens via [`IdGenerator`]
//! - **Metrics**: process counters via [`Metrics`]
//!
//! # Example
//!
//! ```no_run
//! use fanout_common::{AppResult, Config, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     let id = id_gen.next("app_1_1_objects")?;
//!     println!("{} -> {id}", config.listen_addr());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod id;
pub mod metrics;

pub use config::{Config, SourceKind};
pub use crypto::{password_compare, password_secure};
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
pub use metrics::{Metrics, MetricsSnapshot, Timer, get_metrics};
