//! Routing-key keyed registry of inbound event handlers.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use common::CorrelationId;
use domain::{OrderService, RequestContext};
use order_store::OrderStore;

use crate::error::HandlerError;
use crate::events::{
    FulfillmentEvent, InventoryReserved, OrderCompleted, OrderFailed, PaymentProcessed,
    ShippingPrepared, decode_event,
};

/// Actor recorded on orders changed by inbound events.
pub const CONSUMER_ACTOR: &str = "order-sync-consumer";

/// Handles one decoded inbound event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    type Event: FulfillmentEvent;

    async fn handle(&self, event: Self::Event) -> Result<(), HandlerError>;
}

/// Moves the referenced order to the event's target status.
pub struct OrderStatusHandler<S: OrderStore, E> {
    service: Arc<OrderService<S>>,
    _event: PhantomData<fn() -> E>,
}

impl<S: OrderStore, E> OrderStatusHandler<S, E> {
    pub fn new(service: Arc<OrderService<S>>) -> Self {
        Self {
            service,
            _event: PhantomData,
        }
    }
}

#[async_trait]
impl<S, E> EventHandler for OrderStatusHandler<S, E>
where
    S: OrderStore + 'static,
    E: FulfillmentEvent,
{
    type Event = E;

    #[tracing::instrument(skip_all, fields(event = E::NAME, order_id = %event.order_id()))]
    async fn handle(&self, event: E) -> Result<(), HandlerError> {
        let order_id = event.order_id();
        let ctx = RequestContext::with_correlation(CorrelationId::or_new(event.correlation_id()))
            .actor(CONSUMER_ACTOR);

        match self
            .service
            .update_status(order_id, E::TARGET_STATUS, &ctx)
            .await?
        {
            Some(order) => {
                tracing::debug!(status = %order.status, version = %order.version, "event applied");
                Ok(())
            }
            None => Err(HandlerError::OrderNotFound(order_id)),
        }
    }
}

type Dispatch = Box<dyn Fn(&[u8]) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Inbound routing keys and the events they carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRoutingKeys {
    pub order_completed: String,
    pub order_failed: String,
    pub payment_processed: String,
    pub inventory_reserved: String,
    pub shipping_prepared: String,
}

impl Default for InboundRoutingKeys {
    fn default() -> Self {
        Self {
            order_completed: "order.completed".to_string(),
            order_failed: "order.failed".to_string(),
            payment_processed: "payment.processed".to_string(),
            inventory_reserved: "inventory.reserved".to_string(),
            shipping_prepared: "shipping.prepared".to_string(),
        }
    }
}

/// Maps routing keys to handler factories.
///
/// Every message gets a fresh handler from its factory.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Dispatch>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the five order status handlers bound to `keys`.
    pub fn with_order_handlers<S>(service: Arc<OrderService<S>>, keys: &InboundRoutingKeys) -> Self
    where
        S: OrderStore + 'static,
    {
        let mut registry = Self::new();
        registry.register_status::<S, OrderCompleted>(&keys.order_completed, &service);
        registry.register_status::<S, OrderFailed>(&keys.order_failed, &service);
        registry.register_status::<S, PaymentProcessed>(&keys.payment_processed, &service);
        registry.register_status::<S, InventoryReserved>(&keys.inventory_reserved, &service);
        registry.register_status::<S, ShippingPrepared>(&keys.shipping_prepared, &service);
        registry
    }

    fn register_status<S, E>(&mut self, routing_key: &str, service: &Arc<OrderService<S>>)
    where
        S: OrderStore + 'static,
        E: FulfillmentEvent,
    {
        let service = service.clone();
        self.register(routing_key, move || {
            OrderStatusHandler::<S, E>::new(service.clone())
        });
    }

    /// Binds a routing key to a handler factory, replacing any previous one.
    pub fn register<H, F>(&mut self, routing_key: impl Into<String>, factory: F)
    where
        H: EventHandler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let dispatch: Dispatch = Box::new(
            move |payload: &[u8]| -> BoxFuture<'static, Result<(), HandlerError>> {
                match decode_event::<H::Event>(payload) {
                    Ok(event) => {
                        let handler = factory();
                        Box::pin(async move { handler.handle(event).await })
                    }
                    Err(e) => Box::pin(std::future::ready(Err(e))),
                }
            },
        );
        self.handlers.insert(routing_key.into(), dispatch);
    }

    /// Registered routing keys, sorted.
    pub fn routing_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Decodes and handles a payload. Returns None if no handler is bound
    /// to the routing key.
    pub async fn dispatch(
        &self,
        routing_key: &str,
        payload: &[u8],
    ) -> Option<Result<(), HandlerError>> {
        let dispatch = self.handlers.get(routing_key)?;
        Some(dispatch(payload).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use domain::{
        Address, CreateOrder, CustomerId, DomainError, EventTopology, InMemoryEventPublisher,
        OrderEventPublisher, OrderStatus, PricingConfig,
    };
    use order_store::InMemoryOrderStore;

    use super::*;

    fn service() -> Arc<OrderService<InMemoryOrderStore>> {
        let events = OrderEventPublisher::new(
            Arc::new(InMemoryEventPublisher::new()),
            EventTopology::default(),
        );
        Arc::new(OrderService::new(
            InMemoryOrderStore::new(),
            PricingConfig::default(),
            events,
        ))
    }

    async fn create(service: &OrderService<InMemoryOrderStore>) -> common::Order {
        service
            .create_order(
                CreateOrder::for_customer(CustomerId::new(), Address::default()),
                &RequestContext::new(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn binds_the_five_inbound_keys() {
        let registry = HandlerRegistry::with_order_handlers(service(), &InboundRoutingKeys::default());
        assert_eq!(
            registry.routing_keys(),
            vec![
                "inventory.reserved",
                "order.completed",
                "order.failed",
                "payment.processed",
                "shipping.prepared",
            ]
        );
    }

    #[tokio::test]
    async fn dispatch_applies_target_status() {
        let service = service();
        let registry =
            HandlerRegistry::with_order_handlers(service.clone(), &InboundRoutingKeys::default());
        let order = create(&service).await;

        let payload = format!(r#"{{"orderId":"{}","correlationId":"corr-9"}}"#, order.id);
        registry
            .dispatch("payment.processed", payload.as_bytes())
            .await
            .unwrap()
            .unwrap();

        let stored = service.get_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Confirmed);
        assert_eq!(stored.updated_by.as_deref(), Some(CONSUMER_ACTOR));
    }

    #[tokio::test]
    async fn unknown_key_is_not_dispatched() {
        let registry = HandlerRegistry::with_order_handlers(service(), &InboundRoutingKeys::default());
        assert!(registry.dispatch("order.exploded", b"{}").await.is_none());
    }

    #[tokio::test]
    async fn missing_order_is_reported() {
        let registry = HandlerRegistry::with_order_handlers(service(), &InboundRoutingKeys::default());
        let payload = format!(r#"{{"orderId":"{}"}}"#, common::OrderId::new());

        let result = registry
            .dispatch("order.completed", payload.as_bytes())
            .await
            .unwrap();
        assert!(matches!(result, Err(HandlerError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn illegal_transition_is_permanent() {
        let service = service();
        let registry =
            HandlerRegistry::with_order_handlers(service.clone(), &InboundRoutingKeys::default());
        let order = create(&service).await;
        let payload = format!(r#"{{"orderId":"{}"}}"#, order.id);

        registry
            .dispatch("order.failed", payload.as_bytes())
            .await
            .unwrap()
            .unwrap();
        let err = registry
            .dispatch("shipping.prepared", payload.as_bytes())
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(
            err,
            HandlerError::Domain(DomainError::IllegalTransition { .. })
        ));
        assert!(err.is_permanent());
    }

    struct Counting;

    #[async_trait]
    impl EventHandler for Counting {
        type Event = OrderCompleted;

        async fn handle(&self, _event: OrderCompleted) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn factory_runs_once_per_message() {
        let created = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        {
            let created = created.clone();
            registry.register("order.completed", move || {
                created.fetch_add(1, Ordering::SeqCst);
                Counting
            });
        }

        let payload = format!(r#"{{"orderId":"{}"}}"#, common::OrderId::new());
        for _ in 0..3 {
            registry
                .dispatch("order.completed", payload.as_bytes())
                .await
                .unwrap()
                .unwrap();
        }
        // Payloads that fail to decode never reach a handler
        let result = registry.dispatch("order.completed", b"garbage").await.unwrap();
        assert!(matches!(result, Err(HandlerError::Decode { .. })));

        assert_eq!(created.load(Ordering::SeqCst), 3);
    }
}
