//! Destinations of rendered rule messages.

use async_trait::async_trait;
use fanout_common::{AppError, AppResult};
use fanout_core::Message;
use fanout_db::entities::App;
use fred::clients::Client;
use fred::interfaces::{ClientLike, PubsubInterface};
use fred::types::config::Config as RedisConfig;
use serde::Serialize;
use tracing::{debug, info};

/// Channel prefix of published messages; the app id is appended.
pub const CHANNEL_PREFIX: &str = "fanout:messages:";

/// Receives the messages produced for one state change.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Hand over the messages of one change of `app`.
    async fn deliver(&self, app: &App, messages: &[Message]) -> AppResult<()>;
}

/// Logs every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl MessageSink for LogSink {
    async fn deliver(&self, app: &App, messages: &[Message]) -> AppResult<()> {
        for msg in messages {
            info!(
                app_id = app.id,
                recipient = msg.recipient,
                urn = %msg.urn,
                languages = msg.messages.len(),
                "message"
            );
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct Published<'a> {
    app_id: u64,
    #[serde(flatten)]
    message: &'a Message,
}

/// Publishes messages as JSON on a per-app Redis channel.
#[derive(Clone)]
pub struct RedisSink {
    client: Client,
}

impl RedisSink {
    /// Connect a publisher to `redis_url`.
    pub async fn connect(redis_url: &str) -> AppResult<Self> {
        let config = RedisConfig::from_url(redis_url).map_err(|e| AppError::Redis(e.to_string()))?;
        let client = Client::new(config, None, None, None);
        client
            .init()
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        info!("message sink connected to redis");
        Ok(Self { client })
    }

    /// Publish over an existing client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn channel(app: &App) -> String {
        format!("{CHANNEL_PREFIX}{}", app.id)
    }
}

#[async_trait]
impl MessageSink for RedisSink {
    async fn deliver(&self, app: &App, messages: &[Message]) -> AppResult<()> {
        let channel = Self::channel(app);
        for message in messages {
            let payload = serde_json::to_string(&Published {
                app_id: app.id,
                message,
            })
            .map_err(|e| AppError::Internal(e.to_string()))?;
            let _: () = self
                .client
                .publish(channel.as_str(), payload)
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
        }
        debug!(%channel, count = messages.len(), "published messages");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use serde_json::json;

    #[test]
    fn test_published_payload() {
        let msg = Message {
            messages: hashmap! { "en".to_string() => "hi".to_string() },
            recipient: 9,
            urn: "users/1".to_string(),
        };
        let v = serde_json::to_value(Published {
            app_id: 3,
            message: &msg,
        })
        .unwrap();
        assert_eq!(
            v,
            json!({ "app_id": 3, "messages": { "en": "hi" }, "recipient": 9, "urn": "users/1" })
        );
    }

    #[test]
    fn test_channel() {
        let app = App {
            id: 12,
            ..App::default()
        };
        assert_eq!(RedisSink::channel(&app), "fanout:messages:12");
    }

    #[tokio::test]
    async fn test_log_sink_accepts_everything() {
        LogSink
            .deliver(&App::default(), &[Message::default()])
            .await
            .unwrap();
    }
}
