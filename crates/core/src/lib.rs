//! Business operations of fanout: entity lifecycles, authorization,
//! feed composition and the rule pipeline.

pub mod origin;
pub mod services;

pub use origin::{Integration, Origin};
pub use services::*;
