//! Order endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use domain::{
    Address, CreateOrder, CustomerId, NewOrderItem, Order, OrderId, OrderService, OrderStatus,
    ProductId, RequestContext, round_money,
};
use messaging::MessageBroker;
use order_store::{OrderFilter, OrderStats, OrderStore, Page};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Header carrying the caller's correlation ID.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
/// Header naming the acting user for audit fields.
pub const ACTOR_HEADER: &str = "x-actor";

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore> {
    pub order_service: Arc<OrderService<S>>,
    pub broker: Arc<dyn MessageBroker>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: CustomerId,
    pub currency: Option<String>,
    #[serde(default)]
    pub items: Vec<OrderItemRequest>,
    pub shipping_address: Address,
    /// Defaults to the shipping address.
    pub billing_address: Option<Address>,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub customer_id: Option<CustomerId>,
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub order_number: String,
    pub customer_id: String,
    pub status: String,
    pub payment_status: String,
    pub shipping_status: String,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub tax_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub shipping_cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub discount_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub version: i64,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub id: String,
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_price: Decimal,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            order_number: order.order_number,
            customer_id: order.customer_id.to_string(),
            status: order.status.to_string(),
            payment_status: order.payment_status.to_string(),
            shipping_status: order.shipping_status.to_string(),
            currency: order.currency,
            subtotal: round_money(order.subtotal),
            tax_amount: round_money(order.tax_amount),
            shipping_cost: round_money(order.shipping_cost),
            discount_amount: round_money(order.discount_amount),
            total_amount: round_money(order.total_amount),
            shipping_address: order.shipping_address,
            billing_address: order.billing_address,
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemResponse {
                    id: item.id.to_string(),
                    product_id: item.product_id.to_string(),
                    product_name: item.product_name,
                    quantity: item.quantity,
                    unit_price: round_money(item.unit_price),
                    total_price: round_money(item.total_price),
                })
                .collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
            created_by: order.created_by,
            updated_by: order.updated_by,
            version: order.version.as_i64(),
        }
    }
}

#[derive(Serialize)]
pub struct PageResponse {
    pub items: Vec<OrderResponse>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

impl From<Page<Order>> for PageResponse {
    fn from(page: Page<Order>) -> Self {
        let total_pages = page.total_pages();
        Self {
            total: page.total,
            page: page.page,
            page_size: page.page_size,
            total_pages,
            items: page.items.into_iter().map(OrderResponse::from).collect(),
        }
    }
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub total_orders: u64,
    pub orders_by_status: BTreeMap<String, u64>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_revenue: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub average_order_value: Decimal,
}

impl From<OrderStats> for StatsResponse {
    fn from(stats: OrderStats) -> Self {
        Self {
            total_orders: stats.total_orders,
            orders_by_status: OrderStatus::ALL
                .iter()
                .map(|status| {
                    let count = stats.orders_by_status.get(status).copied().unwrap_or(0);
                    (status.to_string(), count)
                })
                .collect(),
            total_revenue: stats.total_revenue,
            average_order_value: stats.average_order_value,
        }
    }
}

// -- Handlers --

/// `POST /orders`: create a new order.
#[tracing::instrument(skip(state, headers, req))]
pub async fn create<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let mut cmd = CreateOrder::for_customer(req.customer_id, req.shipping_address);
    if let Some(billing) = req.billing_address {
        cmd.billing_address = billing;
    }
    cmd.currency = req.currency;

    for item in req.items {
        if item.quantity == 0 {
            return Err(ApiError::BadRequest(format!(
                "Quantity for {} must be at least 1",
                item.product_name
            )));
        }
        if item.unit_price.is_sign_negative() {
            return Err(ApiError::BadRequest(format!(
                "Unit price for {} must not be negative",
                item.product_name
            )));
        }
        cmd = cmd.with_item(NewOrderItem::new(
            item.product_id,
            item.product_name,
            item.unit_price,
            item.quantity,
        ));
    }

    let order = state
        .order_service
        .create_order(cmd, &request_context(&headers))
        .await?;

    Ok((StatusCode::CREATED, Json(order.into())))
}

/// `GET /orders`: paged listing with optional filters.
#[tracing::instrument(skip(state))]
pub async fn list<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<PageResponse>, ApiError> {
    let mut filter = OrderFilter::new();
    if let Some(customer_id) = query.customer_id {
        filter = filter.customer_id(customer_id);
    }
    if let Some(status) = query.status.as_deref() {
        filter = filter.status(parse_status(status)?);
    }
    if let Some(page) = query.page {
        filter = filter.page(page);
    }
    if let Some(page_size) = query.page_size {
        filter = filter.page_size(page_size);
    }

    let page = state.order_service.get_paged(filter).await?;
    Ok(Json(page.into()))
}

/// `GET /orders/stats`: aggregate figures over all orders.
#[tracing::instrument(skip(state))]
pub async fn stats<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.order_service.get_stats().await?;
    Ok(Json(stats.into()))
}

/// `GET /orders/{id}`: load one order.
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .order_service
        .get_by_id(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(order.into()))
}

/// `PUT /orders/{id}/status`: move an order to a new status.
#[tracing::instrument(skip(state, headers, req))]
pub async fn update_status<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let status = parse_status(&req.status)?;

    let order = state
        .order_service
        .update_status(order_id, status, &request_context(&headers))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(order.into()))
}

/// `DELETE /orders/{id}`: remove an order and its items.
#[tracing::instrument(skip(state, headers))]
pub async fn delete<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let order_id = parse_order_id(&id)?;

    if state
        .order_service
        .delete_order(order_id, &request_context(&headers))
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Order {id} not found")))
    }
}

/// `GET /customers/{id}/orders`: every order placed by a customer.
#[tracing::instrument(skip(state))]
pub async fn by_customer<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let customer_id = id
        .parse::<CustomerId>()
        .map_err(|e| ApiError::BadRequest(format!("Invalid customer ID: {e}")))?;

    let orders = state.order_service.get_by_customer(customer_id).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// `GET /orders/status/{status}`: every order in a status.
#[tracing::instrument(skip(state))]
pub async fn by_status<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(status): Path<String>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let status = parse_status(&status)?;

    let orders = state.order_service.get_by_status(status).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// Builds the request context from the correlation and actor headers.
pub fn request_context(headers: &HeaderMap) -> RequestContext {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let ctx = RequestContext::with_correlation(domain::CorrelationId::or_new(header(
        CORRELATION_ID_HEADER,
    )));
    match header(ACTOR_HEADER).map(str::trim).filter(|a| !a.is_empty()) {
        Some(actor) => ctx.actor(actor),
        None => ctx,
    }
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}

fn parse_status(status: &str) -> Result<OrderStatus, ApiError> {
    status
        .parse()
        .map_err(|e: common::ParseStatusError| ApiError::BadRequest(e.to_string()))
}
