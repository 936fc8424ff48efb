use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{
    PgPool, Postgres, Row,
    postgres::{PgArguments, PgRow},
    query::Query,
};
use uuid::Uuid;

use common::{Address, CustomerId, OrderItem, OrderItemId, ProductId};

use crate::{
    Order, OrderFilter, OrderId, OrderStatus, Page, Result, StoreError, Version,
    store::{OrderStats, OrderStore, UpdateOptions, average},
};

const ORDER_COLUMNS: &str = r#"
    id, order_number, customer_id, status, payment_status, shipping_status, currency,
    subtotal, tax_amount, shipping_cost, discount_amount, total_amount,
    shipping_address, billing_address, created_at, updated_at, created_by, updated_by, version
"#;

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn invalid_row(message: String) -> StoreError {
        StoreError::Serialization(serde_json::Error::io(std::io::Error::other(message)))
    }

    fn parse_column<T: std::str::FromStr>(row: &PgRow, column: &str) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        let raw: String = row.try_get(column)?;
        raw.parse()
            .map_err(|e: T::Err| Self::invalid_row(format!("{column}: {e}")))
    }

    fn row_to_order(row: &PgRow) -> Result<Order> {
        let shipping_address: serde_json::Value = row.try_get("shipping_address")?;
        let billing_address: serde_json::Value = row.try_get("billing_address")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_number: row.try_get("order_number")?,
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            status: Self::parse_column(row, "status")?,
            payment_status: Self::parse_column(row, "payment_status")?,
            shipping_status: Self::parse_column(row, "shipping_status")?,
            currency: row.try_get("currency")?,
            subtotal: row.try_get("subtotal")?,
            tax_amount: row.try_get("tax_amount")?,
            shipping_cost: row.try_get("shipping_cost")?,
            discount_amount: row.try_get("discount_amount")?,
            total_amount: row.try_get("total_amount")?,
            shipping_address: serde_json::from_value::<Address>(shipping_address)?,
            billing_address: serde_json::from_value::<Address>(billing_address)?,
            items: Vec::new(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            created_by: row.try_get("created_by")?,
            updated_by: row.try_get("updated_by")?,
            version: Version::new(row.try_get("version")?),
        })
    }

    fn row_to_item(row: &PgRow) -> Result<(OrderId, OrderItem)> {
        let quantity: i64 = row.try_get("quantity")?;
        let quantity = u32::try_from(quantity)
            .map_err(|_| Self::invalid_row(format!("quantity out of range: {quantity}")))?;

        Ok((
            OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            OrderItem {
                id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
                product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
                product_name: row.try_get("product_name")?,
                unit_price: row.try_get("unit_price")?,
                quantity,
                total_price: row.try_get("total_price")?,
            },
        ))
    }

    /// Converts order rows and attaches their items in insertion order.
    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let mut orders = rows
            .iter()
            .map(Self::row_to_order)
            .collect::<Result<Vec<_>>>()?;
        if orders.is_empty() {
            return Ok(orders);
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let item_rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, product_name, unit_price, quantity, total_price
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items_by_order: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for row in &item_rows {
            let (order_id, item) = Self::row_to_item(row)?;
            items_by_order.entry(order_id).or_default().push(item);
        }

        for order in &mut orders {
            order.items = items_by_order.remove(&order.id).unwrap_or_default();
        }
        Ok(orders)
    }

    fn filter_clause(filter: &OrderFilter) -> (String, usize) {
        let mut sql = String::from(" WHERE 1=1");
        let mut param_count = 0;

        if filter.customer_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND customer_id = ${param_count}"));
        }
        if filter.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        if filter.created_from.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if filter.created_to.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at <= ${param_count}"));
        }

        (sql, param_count)
    }

    fn bind_filter<'q>(
        mut query: Query<'q, Postgres, PgArguments>,
        filter: &OrderFilter,
    ) -> Query<'q, Postgres, PgArguments> {
        if let Some(customer_id) = filter.customer_id {
            query = query.bind(customer_id.as_uuid());
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(from) = filter.created_from {
            query = query.bind(from);
        }
        if let Some(to) = filter.created_to {
            query = query.bind(to);
        }
        query
    }

    fn map_insert_error(order: &Order, e: sqlx::Error) -> StoreError {
        if let sqlx::Error::Database(ref db_err) = e {
            match db_err.constraint() {
                Some("unique_order_number") => {
                    return StoreError::DuplicateOrderNumber(order.order_number.clone());
                }
                Some("orders_pkey") => return StoreError::AlreadyExists(order.id),
                _ => {}
            }
        }
        StoreError::Database(e)
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, customer_id, status, payment_status, shipping_status, currency,
                subtotal, tax_amount, shipping_cost, discount_amount, total_amount,
                shipping_address, billing_address, created_at, updated_at, created_by, updated_by, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.order_number)
        .bind(order.customer_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.shipping_status.as_str())
        .bind(&order.currency)
        .bind(order.subtotal)
        .bind(order.tax_amount)
        .bind(order.shipping_cost)
        .bind(order.discount_amount)
        .bind(order.total_amount)
        .bind(serde_json::to_value(&order.shipping_address)?)
        .bind(serde_json::to_value(&order.billing_address)?)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(&order.created_by)
        .bind(&order.updated_by)
        .bind(order.version.as_i64())
        .execute(&mut *tx)
        .await
        .map_err(|e| Self::map_insert_error(order, e))?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, position, product_id, product_name, unit_price, quantity, total_price)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(order.id.as_uuid())
            .bind(position as i32)
            .bind(item.product_id.as_uuid())
            .bind(&item.product_name)
            .bind(item.unit_price)
            .bind(i64::from(item.quantity))
            .bind(item.total_price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn get_by_customer_id(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE customer_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(customer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn get_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn update(&self, order: &Order, options: UpdateOptions) -> Result<Version> {
        let expected = options.expected_version.map(|v| v.as_i64());

        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE orders SET
                status = $3,
                payment_status = $4,
                shipping_status = $5,
                subtotal = $6,
                tax_amount = $7,
                shipping_cost = $8,
                discount_amount = $9,
                total_amount = $10,
                shipping_address = $11,
                billing_address = $12,
                updated_at = $13,
                updated_by = $14,
                version = version + 1
            WHERE id = $1 AND ($2::BIGINT IS NULL OR version = $2)
            RETURNING version
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(expected)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.shipping_status.as_str())
        .bind(order.subtotal)
        .bind(order.tax_amount)
        .bind(order.shipping_cost)
        .bind(order.discount_amount)
        .bind(order.total_amount)
        .bind(serde_json::to_value(&order.shipping_address)?)
        .bind(serde_json::to_value(&order.billing_address)?)
        .bind(order.updated_at)
        .bind(&order.updated_by)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(version) = updated {
            return Ok(Version::new(version));
        }

        // Nothing matched: either the row is gone or the version moved on
        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
            .bind(order.id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match (actual, options.expected_version) {
            (Some(actual), Some(expected)) => {
                metrics::counter!("order_store_conflicts_total").increment(1);
                tracing::debug!(
                    order_id = %order.id,
                    %expected,
                    actual,
                    "optimistic concurrency check failed"
                );
                Err(StoreError::ConcurrencyConflict {
                    order_id: order.id,
                    expected,
                    actual: Version::new(actual),
                })
            }
            _ => Err(StoreError::NotFound(order.id)),
        }
    }

    async fn delete(&self, id: OrderId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_paged(&self, filter: &OrderFilter) -> Result<Page<Order>> {
        let (where_clause, param_count) = Self::filter_clause(filter);

        let count_sql = format!("SELECT COUNT(*) FROM orders{where_clause}");
        let count_row = Self::bind_filter(sqlx::query(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = count_row.try_get(0)?;

        let select_sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders{where_clause} ORDER BY created_at DESC, id DESC LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        );
        let rows = Self::bind_filter(sqlx::query(&select_sql), filter)
            .bind(i64::from(filter.page_size))
            .bind(filter.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items: self.hydrate(rows).await?,
            total: total.max(0) as u64,
            page: filter.page,
            page_size: filter.page_size,
        })
    }

    async fn stats(&self) -> Result<OrderStats> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS order_count, COALESCE(SUM(total_amount), 0) AS revenue
            FROM orders
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = OrderStats::default();
        let mut revenue_orders = 0u64;

        for row in &rows {
            let status: OrderStatus = Self::parse_column(row, "status")?;
            let count = row.try_get::<i64, _>("order_count")?.max(0) as u64;
            let revenue: Decimal = row.try_get("revenue")?;

            stats.total_orders += count;
            stats.orders_by_status.insert(status, count);
            if status != OrderStatus::Cancelled {
                stats.total_revenue = stats.total_revenue.saturating_add(revenue);
                revenue_orders += count;
            }
        }

        stats.average_order_value = average(stats.total_revenue, revenue_orders);
        Ok(stats)
    }
}
