//! Change consumers: one worker loop per entity kind.
//!
//! A worker pulls a state change, resolves the app owning its namespace,
//! loads the active rules of its kind, runs the pipeline and hands the
//! messages to a sink. Only fully processed changes are acked; anything else
//! becomes visible again once the source's visibility timeout passes.

use std::sync::Arc;
use std::time::Duration;

use fanout_common::{AppResult, get_metrics};
use fanout_core::{Core, Message};
use fanout_db::{
    Source, StateChange,
    entities::{App, Connection, Event, Object, Reaction, Rule, RuleKind},
};
use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::sink::MessageSink;

/// Pause after an empty or failed consume.
pub const DEFAULT_IDLE: Duration = Duration::from_secs(1);

/// Entities whose changes are routed through a rule pipeline.
pub trait Routed: fanout_db::entities::Entity {
    /// Rule kind evaluated against changes of this entity.
    const KIND: RuleKind;

    /// Messages produced by `rules` for `change`.
    fn pipeline<'a>(
        core: &'a Core,
        app: &'a App,
        change: &'a StateChange<Self>,
        rules: &'a [Rule],
    ) -> BoxFuture<'a, AppResult<Vec<Message>>>;
}

impl Routed for Connection {
    const KIND: RuleKind = RuleKind::Connection;

    fn pipeline<'a>(
        core: &'a Core,
        app: &'a App,
        change: &'a StateChange<Self>,
        rules: &'a [Rule],
    ) -> BoxFuture<'a, AppResult<Vec<Message>>> {
        Box::pin(core.pipeline_connection(app, change, rules))
    }
}

impl Routed for Event {
    const KIND: RuleKind = RuleKind::Event;

    fn pipeline<'a>(
        core: &'a Core,
        app: &'a App,
        change: &'a StateChange<Self>,
        rules: &'a [Rule],
    ) -> BoxFuture<'a, AppResult<Vec<Message>>> {
        Box::pin(core.pipeline_event(app, change, rules))
    }
}

impl Routed for Object {
    const KIND: RuleKind = RuleKind::Object;

    fn pipeline<'a>(
        core: &'a Core,
        app: &'a App,
        change: &'a StateChange<Self>,
        rules: &'a [Rule],
    ) -> BoxFuture<'a, AppResult<Vec<Message>>> {
        Box::pin(core.pipeline_object(app, change, rules))
    }
}

impl Routed for Reaction {
    const KIND: RuleKind = RuleKind::Reaction;

    fn pipeline<'a>(
        core: &'a Core,
        app: &'a App,
        change: &'a StateChange<Self>,
        rules: &'a [Rule],
    ) -> BoxFuture<'a, AppResult<Vec<Message>>> {
        Box::pin(core.pipeline_reaction(app, change, rules))
    }
}

/// Worker draining one change source.
pub struct Consumer<E: Routed> {
    core: Core,
    source: Arc<dyn Source<E>>,
    sink: Arc<dyn MessageSink>,
    idle: Duration,
}

impl<E: Routed> Consumer<E> {
    /// Consumer of `source` delivering to `sink`.
    #[must_use]
    pub fn new(core: Core, source: Arc<dyn Source<E>>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            core,
            source,
            sink,
            idle: DEFAULT_IDLE,
        }
    }

    /// Override the pause after empty or failed consumes.
    #[must_use]
    pub const fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Process at most one change. Returns `false` when the source had none.
    ///
    /// A change whose processing fails is left unacked and still counts as
    /// handled.
    pub async fn step(&self) -> AppResult<bool> {
        let change = match self.source.consume().await {
            Ok(change) => change,
            Err(e) if e.is_empty_source() => return Ok(false),
            Err(e) => return Err(e),
        };
        let metrics = get_metrics();
        metrics.record_consumed();

        match self.process(&change).await {
            Ok(count) => {
                self.source.ack(&change.ack_id).await?;
                metrics.record_acked();
                metrics.record_pipeline(count, false);
                debug!(
                    kind = E::KIND.as_str(),
                    namespace = %change.namespace,
                    messages = count,
                    "change processed"
                );
            }
            Err(e) => {
                metrics.record_pipeline(0, true);
                warn!(
                    kind = E::KIND.as_str(),
                    namespace = %change.namespace,
                    error = %e,
                    "change processing failed, left for redelivery"
                );
            }
        }
        Ok(true)
    }

    /// Run until `shutdown` flips to `true` or its sender goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(kind = E::KIND.as_str(), "consumer started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.step().await {
                Ok(true) => continue,
                Ok(false) => self.idle,
                Err(e) => {
                    error!(kind = E::KIND.as_str(), error = %e, "consume failed");
                    self.idle
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tokio::time::sleep(pause) => {}
            }
        }
        info!(kind = E::KIND.as_str(), "consumer stopped");
    }

    async fn process(&self, change: &StateChange<E>) -> AppResult<usize> {
        let app = self.core.app_by_namespace(&change.namespace).await?;
        let rules = self.core.rules_active(&app, E::KIND).await?;
        if rules.is_empty() {
            return Ok(0);
        }

        let messages = E::pipeline(&self.core, &app, change, &rules).await?;
        if !messages.is_empty() {
            self.sink.deliver(&app, &messages).await?;
        }
        Ok(messages.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use fanout_common::IdGenerator;
    use fanout_core::Stores;
    use fanout_db::{
        MemorySource, Service,
        entities::{ConnectionState, ConnectionType, Criteria, CriteriaSet, Recipient, User},
    };
    use maplit::hashmap;
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Message>>);

    #[async_trait]
    impl MessageSink for Collect {
        async fn deliver(&self, _app: &App, messages: &[Message]) -> AppResult<()> {
            self.0.lock().await.extend_from_slice(messages);
            Ok(())
        }
    }

    struct Fixture {
        core: Core,
        app: App,
        source: Arc<MemorySource<Connection>>,
        sink: Arc<Collect>,
    }

    impl Fixture {
        async fn new(visibility: Duration) -> Self {
            let ids = IdGenerator::new();
            let core = Core::new(Stores::memory(&ids), ids);
            let app = core.app_create(1, "demo", "").await.unwrap();
            Self {
                core,
                app,
                source: Arc::new(MemorySource::new(visibility)),
                sink: Arc::new(Collect::default()),
            }
        }

        fn consumer(&self) -> Consumer<Connection> {
            Consumer::new(self.core.clone(), self.source.clone(), self.sink.clone())
                .with_idle(Duration::from_millis(5))
        }

        async fn user(&self, name: &str) -> User {
            self.core
                .stores()
                .users
                .put(
                    &self.app.namespace(),
                    User {
                        enabled: true,
                        username: name.to_string(),
                        email: format!("{name}@example.com"),
                        password: "secret".to_string(),
                        ..User::default()
                    },
                )
                .await
                .unwrap()
        }

        async fn follow_rule(&self, template: &str) {
            self.core
                .rule_create(
                    &self.app,
                    Rule {
                        active: true,
                        criteria: Criteria::Connection(CriteriaSet::default()),
                        name: "follow".to_string(),
                        recipients: vec![Recipient {
                            query: hashmap! { "userTo".to_string() => String::new() },
                            templates: hashmap! { "en".to_string() => template.to_string() },
                            urn: "users/{{ .From.ID }}".to_string(),
                        }],
                        ..Rule::default()
                    },
                )
                .await
                .unwrap();
        }

        async fn follow(&self, from: u64, to: u64) {
            let con = Connection {
                enabled: true,
                from_id: from,
                to_id: to,
                kind: ConnectionType::Follow,
                state: ConnectionState::Confirmed,
                ..Connection::default()
            };
            self.source
                .propagate(&self.app.namespace(), None, Some(&con))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_step_delivers_and_acks() {
        let f = Fixture::new(Duration::from_secs(30)).await;
        let alice = f.user("alice").await;
        let bob = f.user("bob").await;
        f.follow_rule("{{ .From.Username }} follows you").await;
        f.follow(alice.id, bob.id).await;

        let consumer = f.consumer();
        assert!(consumer.step().await.unwrap());
        assert!(!consumer.step().await.unwrap());

        let got = f.sink.0.lock().await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].recipient, bob.id);
        assert_eq!(got[0].messages, HashMap::from([("en".to_string(), "alice follows you".to_string())]));
        assert_eq!(f.source.pending().await, 0);
    }

    #[tokio::test]
    async fn test_failed_change_is_redelivered() {
        let f = Fixture::new(Duration::ZERO).await;
        let alice = f.user("alice").await;
        let bob = f.user("bob").await;
        f.follow_rule("{{ .From.Secret }}").await;
        f.follow(alice.id, bob.id).await;

        let consumer = f.consumer();
        assert!(consumer.step().await.unwrap());
        assert!(f.sink.0.lock().await.is_empty());

        // Not acked, so it comes back.
        assert!(consumer.step().await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_namespace_is_not_acked() {
        let f = Fixture::new(Duration::ZERO).await;
        f.source
            .propagate("app_9_9", None, Some(&Connection::default()))
            .await
            .unwrap();

        let consumer = f.consumer();
        assert!(consumer.step().await.unwrap());
        assert!(consumer.step().await.unwrap());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = Fixture::new(Duration::from_secs(30)).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(f.consumer().run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
