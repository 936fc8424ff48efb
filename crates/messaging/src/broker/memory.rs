//! In-process topic exchange.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;

use super::{
    BrokerKind, Delivery, DeliveryHandler, HandlerOutcome, MessageBroker, Settlement,
    Subscription, log_dead_letter,
};
use crate::error::BrokerError;

/// A message waiting in a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub routing_key: String,
    pub payload: Vec<u8>,
    /// How many times the message has been handed to a consumer.
    pub deliveries: u32,
}

/// A message removed from its queue after exhausting redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub queue: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct Binding {
    exchange: String,
    pattern: String,
    queue: String,
}

#[derive(Debug, Default)]
struct State {
    connected: bool,
    fail_publish: bool,
    bindings: Vec<Binding>,
    queues: HashMap<String, VecDeque<QueuedMessage>>,
    dead_letters: Vec<DeadLetter>,
}

impl State {
    fn route(&mut self, exchange: &str, routing_key: &str, payload: &[u8]) -> usize {
        let mut targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, routing_key))
            .map(|b| b.queue.clone())
            .collect();
        targets.sort();
        targets.dedup();

        for queue in &targets {
            self.queues
                .entry(queue.clone())
                .or_default()
                .push_back(QueuedMessage {
                    routing_key: routing_key.to_string(),
                    payload: payload.to_vec(),
                    deliveries: 0,
                });
        }
        targets.len()
    }

    fn bind(&mut self, exchange: &str, queue: &str, routing_keys: &[String]) {
        self.queues.entry(queue.to_string()).or_default();
        for key in routing_keys {
            let exists = self
                .bindings
                .iter()
                .any(|b| b.exchange == exchange && b.queue == queue && &b.pattern == key);
            if !exists {
                self.bindings.push(Binding {
                    exchange: exchange.to_string(),
                    pattern: key.clone(),
                    queue: queue.to_string(),
                });
            }
        }
    }
}

/// Topic exchange living in the current process.
///
/// Clones share the same exchange, so a publisher and a consumer built from
/// clones of one broker see each other's messages.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<State>>,
    wakeup: Arc<Notify>,
}

impl InMemoryBroker {
    /// Creates a new, disconnected broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail as if the broker were unreachable.
    pub async fn set_fail_publish(&self, fail: bool) {
        self.state.write().await.fail_publish = fail;
    }

    /// Severs the connection. Running subscriptions end with an error until
    /// `connect` is called again.
    pub async fn drop_connections(&self) {
        self.state.write().await.connected = false;
        self.wakeup.notify_waiters();
    }

    /// Declares a queue and binds it without consuming from it.
    pub async fn bind(&self, exchange: &str, queue: &str, routing_keys: &[&str]) {
        let keys: Vec<String> = routing_keys.iter().map(|k| k.to_string()).collect();
        self.state.write().await.bind(exchange, queue, &keys);
    }

    /// Number of messages waiting in a queue.
    pub async fn queue_depth(&self, queue: &str) -> usize {
        self.state
            .read()
            .await
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Snapshot of the messages waiting in a queue, head first.
    pub async fn queued(&self, queue: &str) -> Vec<QueuedMessage> {
        self.state
            .read()
            .await
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages that exhausted redelivery.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.read().await.dead_letters.clone()
    }

    async fn next_message(&self, queue: &str) -> Result<Option<QueuedMessage>, BrokerError> {
        let mut state = self.state.write().await;
        if !state.connected {
            return Err(BrokerError::Connection("connection lost".to_string()));
        }
        Ok(state.queues.get_mut(queue).and_then(|q| {
            let mut message = q.pop_front()?;
            message.deliveries += 1;
            Some(message)
        }))
    }

    async fn settle(
        &self,
        subscription: &Subscription,
        message: QueuedMessage,
        settlement: Settlement,
        reason: String,
    ) {
        let mut state = self.state.write().await;
        match settlement {
            Settlement::Ack => {}
            Settlement::Requeue => {
                state
                    .queues
                    .entry(subscription.queue.clone())
                    .or_default()
                    .push_front(message);
            }
            Settlement::DeadLetter => {
                state.route(
                    &subscription.exchange,
                    &subscription.redelivery.dead_letter_routing_key,
                    &message.payload,
                );
                state.dead_letters.push(DeadLetter {
                    queue: subscription.queue.clone(),
                    routing_key: message.routing_key,
                    payload: message.payload,
                    attempts: message.deliveries,
                    reason,
                });
            }
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    fn broker_type(&self) -> BrokerKind {
        BrokerKind::InMemory
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        self.state.write().await.connected = true;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.state.write().await;
            if state.fail_publish {
                return Err(BrokerError::Connection("broker unreachable".to_string()));
            }
            if !state.connected {
                return Err(BrokerError::NotConnected);
            }
            let routed = state.route(exchange, routing_key, &payload);
            tracing::trace!(exchange, routing_key, routed, "message published");
        }
        self.wakeup.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        subscription: &Subscription,
        handler: Arc<dyn DeliveryHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.state.write().await;
            if !state.connected {
                return Err(BrokerError::NotConnected);
            }
            state.bind(
                &subscription.exchange,
                &subscription.queue,
                &subscription.routing_keys,
            );
        }
        tracing::info!(
            queue = %subscription.queue,
            routing_keys = ?subscription.routing_keys,
            "consuming from in-memory queue"
        );

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            // Register interest before looking at the queue so a publish
            // between the check and the wait is not missed.
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let Some(message) = self.next_message(&subscription.queue).await? else {
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = &mut notified => {}
                }
                continue;
            };

            let delivery = Delivery {
                routing_key: message.routing_key.clone(),
                payload: message.payload.clone(),
                attempt: message.deliveries,
            };
            let outcome = handler.handle(&delivery).await;
            let settlement = subscription.redelivery.settle(&outcome, delivery.attempt);
            if settlement == Settlement::DeadLetter {
                log_dead_letter(&delivery, &outcome);
            }

            let reason = match outcome {
                HandlerOutcome::Ack => String::new(),
                HandlerOutcome::Retry(r) | HandlerOutcome::Reject(r) => r,
            };
            self.settle(subscription, message, settlement, reason).await;
        }
    }

    async fn is_healthy(&self) -> bool {
        self.state.read().await.connected
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.drop_connections().await;
        Ok(())
    }
}

/// Matches a routing key against a binding pattern.
///
/// Words are dot-separated. `*` matches exactly one word and `#` matches
/// zero or more words.
pub(crate) fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&k, key_rest)) if word == "*" || word == k => match_words(rest, key_rest),
            _ => false,
        },
    }
}
