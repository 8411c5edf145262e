//! Change source backed by Amazon SQS, one queue per entity kind.

use std::marker::PhantomData;

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::types::MessageAttributeValue;
use chrono::{DateTime, SecondsFormat, Utc};
use fanout_common::{AppError, AppResult};
use fanout_db::source::Envelope;
use fanout_db::{Source, StateChange};
use tracing::{debug, info};

use crate::consumer::Routed;

const ATTR_SENT_AT: &str = "sent_at";
const WAIT_SECONDS: i32 = 10;

fn queue_err(e: impl std::fmt::Display) -> AppError {
    AppError::Queue(e.to_string())
}

/// Queue name for changes of `E`, e.g. `<prefix>object-state-change`.
#[must_use]
pub fn queue_name<E: Routed>(prefix: &str) -> String {
    format!("{prefix}{}-state-change", E::KIND.as_str())
}

/// SQS producer and consumer of changes of one entity kind.
pub struct SqsSource<E> {
    client: Client,
    queue_url: String,
    _kind: PhantomData<fn() -> E>,
}

impl<E: Routed> SqsSource<E> {
    /// Resolve the queue of `E` under `prefix`.
    pub async fn connect(client: Client, prefix: &str) -> AppResult<Self> {
        let name = queue_name::<E>(prefix);
        let out = client
            .get_queue_url()
            .queue_name(&name)
            .send()
            .await
            .map_err(queue_err)?;
        let queue_url = out
            .queue_url()
            .ok_or_else(|| AppError::Queue(format!("no url for queue '{name}'")))?
            .to_string();

        info!(queue = %name, "sqs source ready");
        Ok(Self {
            client,
            queue_url,
            _kind: PhantomData,
        })
    }
}

/// SQS client for `region` using the default credential chain.
pub async fn client(region: &str) -> Client {
    let conf = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await;
    Client::new(&conf)
}

#[async_trait]
impl<E: Routed> Source<E> for SqsSource<E> {
    async fn propagate(&self, ns: &str, old: Option<&E>, new: Option<&E>) -> AppResult<String> {
        let body = serde_json::to_string(&Envelope {
            namespace: ns.to_string(),
            new: new.cloned(),
            old: old.cloned(),
        })
        .map_err(queue_err)?;
        let sent_at = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true))
            .build()
            .map_err(queue_err)?;

        let out = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .message_attributes(ATTR_SENT_AT, sent_at)
            .send()
            .await
            .map_err(queue_err)?;

        Ok(out.message_id().unwrap_or_default().to_string())
    }

    async fn consume(&self) -> AppResult<StateChange<E>> {
        let out = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(WAIT_SECONDS)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(queue_err)?;

        let Some(msg) = out.messages().first() else {
            return Err(AppError::EmptySource);
        };

        let ack_id = msg
            .receipt_handle()
            .ok_or_else(|| AppError::Queue("message without receipt handle".to_string()))?
            .to_string();
        let envelope: Envelope<E> =
            serde_json::from_str(msg.body().unwrap_or_default()).map_err(queue_err)?;
        let sent_at = msg
            .message_attributes()
            .and_then(|attrs| attrs.get(ATTR_SENT_AT))
            .and_then(MessageAttributeValue::string_value)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map_or_else(Utc::now, |t| t.with_timezone(&Utc));

        debug!(namespace = %envelope.namespace, "consumed change");
        Ok(StateChange {
            ack_id,
            namespace: envelope.namespace,
            new: envelope.new,
            old: envelope.old,
            sent_at,
        })
    }

    async fn ack(&self, ack_id: &str) -> AppResult<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(ack_id)
            .send()
            .await
            .map_err(queue_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_db::entities::{Connection, Object};

    #[test]
    fn test_queue_names() {
        assert_eq!(queue_name::<Object>("prod-"), "prod-object-state-change");
        assert_eq!(queue_name::<Connection>(""), "connection-state-change");
    }
}
