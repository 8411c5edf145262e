//! Change sources: state-change envelopes published on entity writes.
//!
//! Delivery is at-least-once. A consumed envelope that is not acked becomes
//! visible again once its visibility timeout passes.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fanout_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::entities::Entity;

/// Default visibility timeout of consumed, unacked envelopes.
pub const DEFAULT_VISIBILITY: Duration = Duration::from_secs(30);

/// Wire body of a state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "E: Entity")]
pub struct Envelope<E> {
    /// Namespace the change happened in.
    pub namespace: String,
    /// Value after the change; absent on removal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<E>,
    /// Value before the change; absent on creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<E>,
}

/// A consumed state change.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange<E> {
    /// Receipt handle passed back to [`Source::ack`].
    pub ack_id: String,
    /// Namespace the change happened in.
    pub namespace: String,
    /// Value after the change.
    pub new: Option<E>,
    /// Value before the change.
    pub old: Option<E>,
    /// When the change was propagated.
    pub sent_at: DateTime<Utc>,
}

/// Producer and consumer of state changes of one entity kind.
#[async_trait]
pub trait Source<E: Entity>: Send + Sync {
    /// Publish a change, returning the message id.
    async fn propagate(&self, ns: &str, old: Option<&E>, new: Option<&E>) -> AppResult<String>;

    /// Next change. Fails with [`AppError::EmptySource`] when none is ready.
    async fn consume(&self) -> AppResult<StateChange<E>>;

    /// Mark a consumed change as processed.
    async fn ack(&self, ack_id: &str) -> AppResult<()>;
}

/// Discards changes.
pub struct NopSource<E>(PhantomData<fn() -> E>);

impl<E> NopSource<E> {
    /// Source that drops every change.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E> Default for NopSource<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> Source<E> for NopSource<E> {
    async fn propagate(&self, _ns: &str, _old: Option<&E>, _new: Option<&E>) -> AppResult<String> {
        Ok(Uuid::new_v4().to_string())
    }

    async fn consume(&self) -> AppResult<StateChange<E>> {
        Err(AppError::EmptySource)
    }

    async fn ack(&self, _ack_id: &str) -> AppResult<()> {
        Ok(())
    }
}

struct Message<E> {
    envelope: Envelope<E>,
    sent_at: DateTime<Utc>,
}

struct Queue<E> {
    ready: VecDeque<Message<E>>,
    in_flight: HashMap<String, (Instant, Message<E>)>,
}

/// In-process queue with visibility timeouts.
pub struct MemorySource<E> {
    visibility: Duration,
    queue: Mutex<Queue<E>>,
}

impl<E> MemorySource<E> {
    /// Queue redelivering unacked envelopes after `visibility`.
    #[must_use]
    pub fn new(visibility: Duration) -> Self {
        Self {
            visibility,
            queue: Mutex::new(Queue {
                ready: VecDeque::new(),
                in_flight: HashMap::new(),
            }),
        }
    }

    /// Envelopes waiting to be consumed, excluding in-flight ones.
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.ready.len()
    }
}

impl<E> Default for MemorySource<E> {
    fn default() -> Self {
        Self::new(DEFAULT_VISIBILITY)
    }
}

#[async_trait]
impl<E: Entity> Source<E> for MemorySource<E> {
    async fn propagate(&self, ns: &str, old: Option<&E>, new: Option<&E>) -> AppResult<String> {
        let id = Uuid::new_v4().to_string();
        self.queue.lock().await.ready.push_back(Message {
            envelope: Envelope {
                namespace: ns.to_string(),
                new: new.cloned(),
                old: old.cloned(),
            },
            sent_at: Utc::now(),
        });
        Ok(id)
    }

    async fn consume(&self) -> AppResult<StateChange<E>> {
        let now = Instant::now();
        let mut queue = self.queue.lock().await;

        let expired: Vec<String> = queue
            .in_flight
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some((_, msg)) = queue.in_flight.remove(&id) {
                queue.ready.push_back(msg);
            }
        }

        let msg = queue.ready.pop_front().ok_or(AppError::EmptySource)?;
        let ack_id = Uuid::new_v4().to_string();
        let change = StateChange {
            ack_id: ack_id.clone(),
            namespace: msg.envelope.namespace.clone(),
            new: msg.envelope.new.clone(),
            old: msg.envelope.old.clone(),
            sent_at: msg.sent_at,
        };
        queue
            .in_flight
            .insert(ack_id, (now + self.visibility, msg));
        Ok(change)
    }

    async fn ack(&self, ack_id: &str) -> AppResult<()> {
        self.queue.lock().await.in_flight.remove(ack_id);
        Ok(())
    }
}
