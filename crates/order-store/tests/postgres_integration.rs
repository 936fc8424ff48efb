//! Order store tests against a real PostgreSQL.
//!
//! One container is started for the whole file and every test truncates the
//! tables before use, so the tests must not run concurrently:
//!
//! ```bash
//! cargo test -p order-store --test postgres_integration -- --test-threads=1
//! ```

use chrono::{Duration, Utc};
use common::{Address, CustomerId, OrderItem, ProductId};
use order_store::{
    Order, OrderFilter, OrderId, OrderStatus, OrderStore, PostgresOrderStore, StoreError,
    UpdateOptions, Version,
};
use rust_decimal::Decimal;
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Database shared by every test in this file.
struct TestDatabase {
    _container: ContainerAsync<Postgres>,
    url: String,
}

static DATABASE: OnceCell<TestDatabase> = OnceCell::const_new();

async fn database() -> &'static TestDatabase {
    DATABASE
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let url = format!(
                "postgres://postgres:postgres@{}:{}/postgres",
                container.get_host().await.unwrap(),
                container.get_host_port_ipv4(5432).await.unwrap()
            );

            let pool = PgPoolOptions::new()
                .max_connections(1)
                .connect(&url)
                .await
                .unwrap();
            PostgresOrderStore::new(pool.clone())
                .run_migrations()
                .await
                .unwrap();
            pool.close().await;

            TestDatabase {
                _container: container,
                url,
            }
        })
        .await
}

/// A store over a fresh pool with both tables emptied.
async fn empty_store() -> PostgresOrderStore {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database().await.url)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE order_items, orders")
        .execute(&pool)
        .await
        .unwrap();

    PostgresOrderStore::new(pool)
}

fn address(city: &str) -> Address {
    Address {
        line1: "1 Main St".to_string(),
        line2: Some("Suite 4".to_string()),
        city: city.to_string(),
        state: "IL".to_string(),
        postal_code: "62701".to_string(),
        country: "US".to_string(),
    }
}

fn create_test_order(customer_id: CustomerId, number: &str) -> Order {
    let now = Utc::now();
    let items = vec![
        OrderItem::new(ProductId::new(), "Widget", Decimal::new(2500, 2), 2),
        OrderItem::new(ProductId::new(), "Gadget", Decimal::new(1500, 2), 1),
    ];
    Order {
        id: OrderId::new(),
        order_number: number.to_string(),
        customer_id,
        status: OrderStatus::Created,
        payment_status: Default::default(),
        shipping_status: Default::default(),
        currency: "USD".to_string(),
        subtotal: Decimal::new(6500, 2),
        tax_amount: Decimal::new(520, 2),
        shipping_cost: Decimal::new(1000, 2),
        discount_amount: Decimal::ZERO,
        total_amount: Decimal::new(8020, 2),
        shipping_address: address("Springfield"),
        billing_address: address("Shelbyville"),
        items,
        created_at: now,
        updated_at: now,
        created_by: Some("tester".to_string()),
        updated_by: Some("tester".to_string()),
        version: Version::first(),
    }
}

#[tokio::test]
#[serial]
async fn create_and_load_order_with_items() {
    let store = empty_store().await;
    let order = create_test_order(CustomerId::new(), "ORD-20260101-0000000A");

    store.create(&order).await.unwrap();

    let loaded = store.get_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.order_number, order.order_number);
    assert_eq!(loaded.total_amount, order.total_amount);
    assert_eq!(loaded.shipping_address, order.shipping_address);
    assert_eq!(loaded.billing_address.city, "Shelbyville");
    assert_eq!(loaded.version, Version::first());

    let names: Vec<_> = loaded.items.iter().map(|i| i.product_name.as_str()).collect();
    assert_eq!(names, vec!["Widget", "Gadget"]);
    assert_eq!(loaded.items[0].total_price, Decimal::new(5000, 2));
}

#[tokio::test]
#[serial]
async fn missing_order_is_none() {
    let store = empty_store().await;
    assert!(store.get_by_id(OrderId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn duplicate_order_number_is_rejected() {
    let store = empty_store().await;
    let customer = CustomerId::new();

    store
        .create(&create_test_order(customer, "ORD-DUP"))
        .await
        .unwrap();
    let result = store.create(&create_test_order(customer, "ORD-DUP")).await;

    assert!(matches!(result, Err(StoreError::DuplicateOrderNumber(_))));
}

#[tokio::test]
#[serial]
async fn update_checks_version() {
    let store = empty_store().await;
    let order = create_test_order(CustomerId::new(), "ORD-1");
    store.create(&order).await.unwrap();

    let mut confirmed = order.clone();
    confirmed.status = OrderStatus::Confirmed;
    let version = store
        .update(&confirmed, UpdateOptions::expect_version(Version::first()))
        .await
        .unwrap();
    assert_eq!(version, Version::new(2));

    let mut stale = order.clone();
    stale.status = OrderStatus::Cancelled;
    let result = store
        .update(&stale, UpdateOptions::expect_version(Version::first()))
        .await;
    assert!(matches!(
        result,
        Err(StoreError::ConcurrencyConflict { actual, .. }) if actual == Version::new(2)
    ));

    let loaded = store.get_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrderStatus::Confirmed);
}

#[tokio::test]
#[serial]
async fn update_missing_order_is_not_found() {
    let store = empty_store().await;
    let order = create_test_order(CustomerId::new(), "ORD-1");

    let result = store
        .update(&order, UpdateOptions::expect_version(Version::first()))
        .await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
#[serial]
async fn delete_cascades_to_items() {
    let store = empty_store().await;
    let order = create_test_order(CustomerId::new(), "ORD-1");
    store.create(&order).await.unwrap();

    assert!(store.delete(order.id).await.unwrap());
    assert!(!store.delete(order.id).await.unwrap());

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_items")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
#[serial]
async fn paged_query_with_filters() {
    let store = empty_store().await;
    let customer = CustomerId::new();
    let base = Utc::now();

    for i in 0..5 {
        let mut order = create_test_order(customer, &format!("ORD-{i}"));
        order.created_at = base + Duration::seconds(i);
        store.create(&order).await.unwrap();
    }
    let mut other = create_test_order(CustomerId::new(), "OTHER-1");
    other.status = OrderStatus::Shipped;
    store.create(&other).await.unwrap();

    let page = store
        .get_paged(&OrderFilter::new().customer_id(customer).page(1).page_size(2))
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    let numbers: Vec<_> = page.items.iter().map(|o| o.order_number.as_str()).collect();
    assert_eq!(numbers, vec!["ORD-4", "ORD-3"]);
    assert_eq!(page.items[0].items.len(), 2);

    let shipped = store
        .get_paged(&OrderFilter::new().status(OrderStatus::Shipped))
        .await
        .unwrap();
    assert_eq!(shipped.total, 1);
    assert_eq!(shipped.items[0].id, other.id);

    let beyond = store
        .get_paged(&OrderFilter::new().page(10))
        .await
        .unwrap();
    assert_eq!(beyond.total, 6);
    assert!(beyond.items.is_empty());
}

#[tokio::test]
#[serial]
async fn query_by_customer_and_status() {
    let store = empty_store().await;
    let customer = CustomerId::new();
    store
        .create(&create_test_order(customer, "ORD-1"))
        .await
        .unwrap();
    store
        .create(&create_test_order(CustomerId::new(), "ORD-2"))
        .await
        .unwrap();

    assert_eq!(store.get_by_customer_id(customer).await.unwrap().len(), 1);
    assert_eq!(
        store
            .get_by_status(OrderStatus::Created)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
#[serial]
async fn stats_exclude_cancelled_revenue() {
    let store = empty_store().await;
    let customer = CustomerId::new();
    store
        .create(&create_test_order(customer, "ORD-1"))
        .await
        .unwrap();
    let mut cancelled = create_test_order(customer, "ORD-2");
    cancelled.status = OrderStatus::Cancelled;
    store.create(&cancelled).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_orders, 2);
    assert_eq!(stats.count(OrderStatus::Cancelled), 1);
    assert_eq!(stats.total_revenue, Decimal::new(8020, 2));
    assert_eq!(stats.average_order_value, Decimal::new(8020, 2));
}
