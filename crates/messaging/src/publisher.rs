//! [`EventPublisher`] transports.
//!
//! - [`BrokerEventPublisher`] writes through a shared broker connection owned
//!   by a single writer task.
//! - [`HttpEventPublisher`] posts to a relay service that fronts the broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use domain::{EventPublisher, PublishError};

use crate::broker::MessageBroker;
use crate::error::BrokerError;

impl From<BrokerError> for PublishError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::Connection(msg) => PublishError::Connection(msg),
            BrokerError::NotConnected => PublishError::Connection(e.to_string()),
            other => PublishError::Rejected(other.to_string()),
        }
    }
}

struct PublishRequest {
    exchange: String,
    routing_key: String,
    payload: Vec<u8>,
    reply: oneshot::Sender<Result<(), BrokerError>>,
}

/// Publishes through a broker connection serialized by one writer task.
///
/// The connection is opened on the first publish and reopened after a
/// connection error. Clones share the writer.
#[derive(Clone)]
pub struct BrokerEventPublisher {
    requests: mpsc::Sender<PublishRequest>,
    timeout: Duration,
}

impl BrokerEventPublisher {
    /// Spawns the writer task. Must be called inside a tokio runtime.
    pub fn spawn(broker: Arc<dyn MessageBroker>, timeout: Duration, capacity: usize) -> Self {
        let (requests, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_writer(broker, rx));
        Self { requests, timeout }
    }
}

async fn run_writer(broker: Arc<dyn MessageBroker>, mut rx: mpsc::Receiver<PublishRequest>) {
    let mut connected = false;

    while let Some(request) = rx.recv().await {
        if !connected {
            match broker.connect().await {
                Ok(()) => connected = true,
                Err(e) => {
                    let _ = request.reply.send(Err(e));
                    continue;
                }
            }
        }

        let result = broker
            .publish(&request.exchange, &request.routing_key, request.payload)
            .await;
        if matches!(
            result,
            Err(BrokerError::Connection(_) | BrokerError::NotConnected)
        ) {
            connected = false;
        }

        // The caller may have timed out and dropped its receiver.
        let _ = request.reply.send(result);
    }

    tracing::debug!(broker = %broker.broker_type(), "publish writer stopped");
}

#[async_trait]
impl EventPublisher for BrokerEventPublisher {
    async fn publish_event(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: serde_json::Value,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(&payload)?;
        let (reply, response) = oneshot::channel();
        let request = PublishRequest {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
            reply,
        };

        let send = async {
            self.requests
                .send(request)
                .await
                .map_err(|_| PublishError::Connection("publish writer stopped".to_string()))?;
            response
                .await
                .map_err(|_| PublishError::Connection("publish writer stopped".to_string()))?
                .map_err(PublishError::from)
        };

        tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| PublishError::Timeout(self.timeout.as_millis() as u64))?
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    exchange: &'a str,
    routing_key: &'a str,
    message: serde_json::Value,
}

/// Publishes by posting to `{base_url}/api/events/publish`.
#[derive(Clone)]
pub struct HttpEventPublisher {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpEventPublisher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Connection(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/events/publish", base_url.trim_end_matches('/')),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish_event(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: serde_json::Value,
    ) -> Result<(), PublishError> {
        let body = RelayRequest {
            exchange,
            routing_key,
            message: payload,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PublishError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    PublishError::Connection(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected(format!(
                "relay returned {status}: {body}"
            )));
        }
        Ok(())
    }
}
