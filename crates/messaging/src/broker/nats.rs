//! NATS JetStream binding.
//!
//! An exchange maps to a stream capturing `<exchange>.>` and a queue maps to
//! a durable pull consumer filtered on the bound routing keys. A message
//! published under routing key `order.created` on exchange `order-sync`
//! travels on subject `order-sync.order.created`.

use std::collections::HashSet;
use std::sync::Arc;

use async_nats::jetstream::{self, AckKind, consumer::AckPolicy, consumer::pull};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{
    BrokerKind, Delivery, DeliveryHandler, MessageBroker, Settlement, Subscription,
    log_dead_letter,
};
use crate::error::BrokerError;

struct Connection {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

/// JetStream-backed broker.
#[derive(Clone)]
pub struct NatsBroker {
    url: String,
    connection: Arc<RwLock<Option<Connection>>>,
    streams: Arc<RwLock<HashSet<String>>>,
}

impl NatsBroker {
    /// Creates a broker for the given server URL. No connection is opened
    /// until [`MessageBroker::connect`].
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection: Arc::new(RwLock::new(None)),
            streams: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn context(&self) -> Result<jetstream::Context, BrokerError> {
        self.connection
            .read()
            .await
            .as_ref()
            .map(|c| c.jetstream.clone())
            .ok_or(BrokerError::NotConnected)
    }

    /// Creates the stream for an exchange once per process.
    async fn ensure_stream(
        &self,
        context: &jetstream::Context,
        exchange: &str,
    ) -> Result<jetstream::stream::Stream, BrokerError> {
        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name(exchange),
                subjects: vec![format!("{exchange}.>")],
                ..Default::default()
            })
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        if self.streams.write().await.insert(exchange.to_string()) {
            tracing::info!(exchange, stream = %stream_name(exchange), "stream declared");
        }
        Ok(stream)
    }
}

#[async_trait]
impl MessageBroker for NatsBroker {
    fn broker_type(&self) -> BrokerKind {
        BrokerKind::Nats
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        let mut connection = self.connection.write().await;
        if connection.is_some() {
            return Ok(());
        }

        let client = async_nats::connect(self.url.as_str())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let jetstream = jetstream::new(client.clone());
        *connection = Some(Connection { client, jetstream });

        tracing::info!(url = %self.url, "connected to NATS");
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let context = self.context().await?;
        if !self.streams.read().await.contains(exchange) {
            self.ensure_stream(&context, exchange).await?;
        }

        context
            .publish(subject(exchange, routing_key), payload.into())
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        subscription: &Subscription,
        handler: Arc<dyn DeliveryHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), BrokerError> {
        let context = self.context().await?;
        let stream = self.ensure_stream(&context, &subscription.exchange).await?;

        let durable = consumer_name(&subscription.queue);
        let consumer: jetstream::consumer::PullConsumer = stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy: AckPolicy::Explicit,
                    filter_subjects: subscription
                        .routing_keys
                        .iter()
                        .map(|key| subject(&subscription.exchange, key))
                        .collect(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        tracing::info!(
            consumer = %durable,
            routing_keys = ?subscription.routing_keys,
            "consuming from JetStream"
        );

        let prefix = format!("{}.", subscription.exchange);
        let dead_letter_subject = subject(
            &subscription.exchange,
            &subscription.redelivery.dead_letter_routing_key,
        );

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = messages.next() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(BrokerError::Connection(e.to_string())),
                None => return Err(BrokerError::Connection("message stream ended".into())),
            };

            let attempt = message
                .info()
                .map(|info| info.delivered.max(1) as u32)
                .unwrap_or(1);
            let message_subject = message.subject.to_string();
            let delivery = Delivery {
                routing_key: message_subject
                    .strip_prefix(&prefix)
                    .unwrap_or(&message_subject)
                    .to_string(),
                payload: message.payload.to_vec(),
                attempt,
            };

            let outcome = handler.handle(&delivery).await;
            let settled = match subscription.redelivery.settle(&outcome, attempt) {
                Settlement::Ack => message.ack().await,
                Settlement::Requeue => message.ack_with(AckKind::Nak(None)).await,
                Settlement::DeadLetter => {
                    log_dead_letter(&delivery, &outcome);
                    if let Err(e) = self
                        .publish(
                            &subscription.exchange,
                            &subscription.redelivery.dead_letter_routing_key,
                            delivery.payload.clone(),
                        )
                        .await
                    {
                        tracing::error!(
                            subject = %dead_letter_subject,
                            error = %e,
                            "failed to publish dead letter, leaving message for redelivery"
                        );
                        message.ack_with(AckKind::Nak(None)).await
                    } else {
                        message.ack_with(AckKind::Term).await
                    }
                }
            };

            if let Err(e) = settled {
                tracing::warn!(routing_key = %delivery.routing_key, error = %e, "failed to settle message");
            }
        }
    }

    async fn is_healthy(&self) -> bool {
        self.connection.read().await.as_ref().is_some_and(|c| {
            matches!(
                c.client.connection_state(),
                async_nats::connection::State::Connected
            )
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if let Some(connection) = self.connection.write().await.take() {
            connection
                .client
                .flush()
                .await
                .map_err(|e| BrokerError::Connection(e.to_string()))?;
        }
        self.streams.write().await.clear();
        tracing::info!("NATS connection closed");
        Ok(())
    }
}

/// Subject carrying a routing key on an exchange. AMQP-style `#` bindings
/// become the NATS `>` wildcard.
fn subject(exchange: &str, routing_key: &str) -> String {
    let key = routing_key
        .split('.')
        .map(|word| if word == "#" { ">" } else { word })
        .collect::<Vec<_>>()
        .join(".");
    format!("{exchange}.{key}")
}

fn stream_name(exchange: &str) -> String {
    sanitize(exchange).to_ascii_uppercase()
}

fn consumer_name(queue: &str) -> String {
    sanitize(queue)
}

/// Stream and consumer names may not contain `.`, `*`, `>` or whitespace.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
