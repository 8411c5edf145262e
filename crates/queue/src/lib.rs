//! Change consumers for fanout.
//!
//! - **Consumers**: one worker per entity kind turning state changes into
//!   rule messages
//! - **Sinks**: where rendered messages go (log, Redis Pub/Sub)
//! - **SQS**: queue-backed change source (feature `sqs`)

pub mod consumer;
pub mod sink;
#[cfg(feature = "sqs")]
pub mod sqs;

pub use consumer::{Consumer, DEFAULT_IDLE, Routed};
pub use sink::{LogSink, MessageSink, RedisSink};
#[cfg(feature = "sqs")]
pub use sqs::SqsSource;
