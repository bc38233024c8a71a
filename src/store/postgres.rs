// =============================================================================
// POSTGRES STORE
// =============================================================================
// SQLx implementation of the Store traits.
//
// LEARNING NOTES:
// - Stock reservation is ONE conditional UPDATE; rows affected = 0 means the
//   reservation failed. Postgres row locks serialize concurrent updates of
//   the same product, so two checkouts racing for the last unit cannot both
//   succeed
// - Multi-step writes (order creation, cancellation) run inside a
//   `sqlx::Transaction`; dropping it without commit rolls back
// - CHECK constraints repeat the ledger invariant at the schema level
// =============================================================================

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    PgPool, Postgres, QueryBuilder, Row, Transaction,
};
use uuid::Uuid;

use super::{
    OrderFilter, ProductFilter, Reservation, ReservationFailure, Store, StoreError, StoreResult,
    StoreTx,
};
use crate::metrics;
use crate::models::{
    Cart, CartItem, FlashSale, FlashSaleProduct, Order, OrderItem, OrderStatus, PaymentMethod,
    Product, ShippingAddress,
};

const PRODUCT_COLUMNS: &str = "id, merchant_id, merchant_name, name, price, stock_quantity, \
     sold_quantity, is_active, created_at, updated_at";

const ORDER_COLUMNS: &str =
    "id, user_id, total_amount, status, shipping_address, payment_method, created_at, updated_at";

const FLASH_SALE_COLUMNS: &str = "id, title, description, start_date, end_date, is_active, \
     products, view_count, created_by, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    // -------------------------------------------------------------------------
    // CONNECTION
    // -------------------------------------------------------------------------
    /// Create the connection pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }

    // -------------------------------------------------------------------------
    // MIGRATIONS
    // -------------------------------------------------------------------------
    /// Create tables if they don't exist and seed sample products.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        let statements = [
            (
                "products",
                r#"
                CREATE TABLE IF NOT EXISTS products (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    merchant_id UUID NOT NULL,
                    merchant_name VARCHAR(255) NOT NULL,
                    name VARCHAR(255) NOT NULL,
                    price NUMERIC(12, 2) NOT NULL,
                    stock_quantity INTEGER NOT NULL DEFAULT 0,
                    sold_quantity INTEGER NOT NULL DEFAULT 0,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                    CONSTRAINT positive_price CHECK (price > 0),
                    CONSTRAINT valid_stock CHECK (stock_quantity >= 0),
                    -- the ledger invariant
                    CONSTRAINT valid_sold CHECK (sold_quantity >= 0 AND sold_quantity <= stock_quantity)
                )
                "#,
            ),
            (
                "carts",
                r#"
                CREATE TABLE IF NOT EXISTS carts (
                    user_id UUID PRIMARY KEY,
                    items JSONB NOT NULL DEFAULT '[]'::jsonb,
                    total_amount NUMERIC(12, 2) NOT NULL DEFAULT 0,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            ),
            (
                "orders",
                r#"
                CREATE TABLE IF NOT EXISTS orders (
                    id UUID PRIMARY KEY,
                    user_id UUID NOT NULL,
                    total_amount NUMERIC(12, 2) NOT NULL,
                    status VARCHAR(20) NOT NULL,
                    shipping_address JSONB NOT NULL,
                    payment_method VARCHAR(32) NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                    CONSTRAINT known_status CHECK (status IN
                        ('pending', 'confirmed', 'processing', 'shipped', 'delivered', 'cancelled'))
                )
                "#,
            ),
            (
                "order_items",
                r#"
                CREATE TABLE IF NOT EXISTS order_items (
                    order_id UUID NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                    position INTEGER NOT NULL,
                    product_id UUID NOT NULL REFERENCES products(id),
                    quantity INTEGER NOT NULL CHECK (quantity > 0),
                    unit_price NUMERIC(12, 2) NOT NULL,
                    PRIMARY KEY (order_id, position)
                )
                "#,
            ),
            (
                "flash_sales",
                r#"
                CREATE TABLE IF NOT EXISTS flash_sales (
                    id UUID PRIMARY KEY,
                    title VARCHAR(255) NOT NULL,
                    description TEXT,
                    start_date TIMESTAMPTZ NOT NULL,
                    end_date TIMESTAMPTZ NOT NULL,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    products JSONB NOT NULL DEFAULT '[]'::jsonb,
                    view_count BIGINT NOT NULL DEFAULT 0,
                    created_by UUID NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                    CONSTRAINT valid_window CHECK (start_date < end_date)
                )
                "#,
            ),
            (
                "idx_orders_user",
                "CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id, created_at DESC)",
            ),
            (
                "idx_products_merchant",
                "CREATE INDEX IF NOT EXISTS idx_products_merchant ON products(merchant_id)",
            ),
        ];

        for (name, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to create {name}"))?;
        }

        self.seed_sample_data().await?;

        Ok(())
    }

    /// Seed sample products when the catalog is empty
    async fn seed_sample_data(&self) -> anyhow::Result<()> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        if count.0 > 0 {
            return Ok(());
        }

        let merchant_id = Uuid::new_v4();
        let sample_products = [
            ("Dell XPS 15 Laptop", "1899.00", 50),
            ("MacBook Pro 14", "2399.00", 30),
            ("iPhone 15 Pro", "999.00", 100),
            ("Samsung Galaxy S24", "799.00", 75),
            ("Logitech MX Keys", "99.99", 200),
            ("Sony WH-1000XM5", "349.00", 60),
            ("USB-C Cable 2m", "12.99", 500),
        ];

        for (name, price, stock) in sample_products {
            sqlx::query(
                r#"
                INSERT INTO products (merchant_id, merchant_name, name, price, stock_quantity)
                VALUES ($1, 'Sample Electronics', $2, $3::numeric, $4)
                "#,
            )
            .bind(merchant_id)
            .bind(name)
            .bind(price)
            .bind(stock)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn load_order_items(
        conn: &mut sqlx::PgConnection,
        order_id: Uuid,
    ) -> StoreResult<Vec<OrderItem>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity, unit_price
            FROM order_items
            WHERE order_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(conn)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(OrderItem {
                    product_id: row.try_get("product_id")?,
                    quantity: row.try_get("quantity")?,
                    unit_price: row.try_get("unit_price")?,
                })
            })
            .collect()
    }
}

// -----------------------------------------------------------------------------
// ROW MAPPING
// -----------------------------------------------------------------------------

fn product_from_row(row: &PgRow) -> StoreResult<Product> {
    Ok(Product {
        id: row.try_get("id")?,
        merchant_id: row.try_get("merchant_id")?,
        merchant_name: row.try_get("merchant_name")?,
        name: row.try_get("name")?,
        price: row.try_get("price")?,
        stock_quantity: row.try_get("stock_quantity")?,
        sold_quantity: row.try_get("sold_quantity")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Order header without its lines.
fn order_from_row(row: &PgRow) -> StoreResult<Order> {
    let status: String = row.try_get("status")?;
    let payment_method: String = row.try_get("payment_method")?;
    let Json(shipping_address): Json<ShippingAddress> = row.try_get("shipping_address")?;

    Ok(Order {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        items: Vec::new(),
        total_amount: row.try_get("total_amount")?,
        status: status
            .parse::<OrderStatus>()
            .map_err(|err| StoreError::Corrupt(err.to_string()))?,
        shipping_address,
        payment_method: payment_method
            .parse::<PaymentMethod>()
            .map_err(StoreError::Corrupt)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn flash_sale_from_row(row: &PgRow) -> StoreResult<FlashSale> {
    let Json(products): Json<Vec<FlashSaleProduct>> = row.try_get("products")?;

    Ok(FlashSale {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        is_active: row.try_get("is_active")?,
        products,
        view_count: row.try_get("view_count")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Render a ProductFilter as SQL.
fn product_query(filter: &ProductFilter) -> QueryBuilder<'_, Postgres> {
    let mut query = QueryBuilder::new(format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE TRUE"));

    if filter.active_only {
        query.push(" AND is_active = TRUE");
    }
    if let Some(term) = &filter.search {
        query.push(" AND name ILIKE ").push_bind(format!("%{term}%"));
    }
    if let Some(merchant_id) = filter.merchant_id {
        query.push(" AND merchant_id = ").push_bind(merchant_id);
    }
    if let Some(min) = filter.min_price {
        query.push(" AND price >= ").push_bind(min);
    }
    if let Some(max) = filter.max_price {
        query.push(" AND price <= ").push_bind(max);
    }

    query
        .push(" ORDER BY name ASC, id ASC LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind(filter.offset);
    query
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        let start = Instant::now();
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        metrics::record_db_query("select", start.elapsed().as_secs_f64());

        row.as_ref().map(product_from_row).transpose()
    }

    async fn list_products(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>> {
        let start = Instant::now();
        let rows = product_query(filter).build().fetch_all(&self.pool).await?;
        metrics::record_db_query("select", start.elapsed().as_secs_f64());

        rows.iter().map(product_from_row).collect()
    }

    async fn load_cart(&self, user_id: Uuid) -> StoreResult<Option<Cart>> {
        let row = sqlx::query(
            "SELECT user_id, items, total_amount, updated_at FROM carts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> StoreResult<Cart> {
            let Json(items): Json<Vec<CartItem>> = row.try_get("items")?;
            Ok(Cart {
                user_id: row.try_get("user_id")?,
                items,
                total_amount: row.try_get("total_amount")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn save_cart(&self, cart: &Cart) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO carts (user_id, items, total_amount, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET items = EXCLUDED.items,
                total_amount = EXCLUDED.total_amount,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(cart.user_id)
        .bind(Json(&cart.items))
        .bind(cart.total_amount)
        .bind(cart.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut order = order_from_row(&row)?;
        order.items = Self::load_order_items(&mut conn, order.id).await?;
        Ok(Some(order))
    }

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<Vec<Order>> {
        let start = Instant::now();
        let mut query =
            QueryBuilder::<Postgres>::new(format!("SELECT {ORDER_COLUMNS} FROM orders WHERE TRUE"));
        if let Some(user_id) = filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let mut conn = self.pool.acquire().await?;
        let rows = query.build().fetch_all(&mut *conn).await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut order = order_from_row(row)?;
            order.items = Self::load_order_items(&mut conn, order.id).await?;
            orders.push(order);
        }
        metrics::record_db_query("select", start.elapsed().as_secs_f64());

        Ok(orders)
    }

    async fn list_flash_sales(&self) -> StoreResult<Vec<FlashSale>> {
        let rows = sqlx::query(&format!(
            "SELECT {FLASH_SALE_COLUMNS} FROM flash_sales ORDER BY start_date ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(flash_sale_from_row).collect()
    }

    async fn get_flash_sale(&self, id: Uuid) -> StoreResult<Option<FlashSale>> {
        let row = sqlx::query(&format!(
            "SELECT {FLASH_SALE_COLUMNS} FROM flash_sales WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(flash_sale_from_row).transpose()
    }

    async fn insert_flash_sale(&self, sale: &FlashSale) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO flash_sales
                (id, title, description, start_date, end_date, is_active, products,
                 view_count, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(sale.id)
        .bind(&sale.title)
        .bind(&sale.description)
        .bind(sale.start_date)
        .bind(sale.end_date)
        .bind(sale.is_active)
        .bind(Json(&sale.products))
        .bind(sale.view_count)
        .bind(sale.created_by)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_flash_sale(&self, sale: &FlashSale) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE flash_sales
            SET title = $2, description = $3, start_date = $4, end_date = $5,
                is_active = $6, products = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(sale.id)
        .bind(&sale.title)
        .bind(&sale.description)
        .bind(sale.start_date)
        .bind(sale.end_date)
        .bind(sale.is_active)
        .bind(Json(&sale.products))
        .bind(sale.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_flash_sale(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM flash_sales WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_flash_sale_view(&self, id: Uuid) -> StoreResult<Option<FlashSale>> {
        let row = sqlx::query(&format!(
            "UPDATE flash_sales SET view_count = view_count + 1 WHERE id = $1 \
             RETURNING {FLASH_SALE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(flash_sale_from_row).transpose()
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

// -----------------------------------------------------------------------------
// TRANSACTION
// -----------------------------------------------------------------------------

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn try_reserve(&mut self, product_id: Uuid, quantity: i32) -> StoreResult<Reservation> {
        let start = Instant::now();

        // Check and increment in one statement
        let reserved = sqlx::query(
            r#"
            UPDATE products
            SET sold_quantity = sold_quantity + $2, updated_at = NOW()
            WHERE id = $1
              AND is_active = TRUE
              AND stock_quantity - sold_quantity >= $2
            RETURNING price
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .fetch_optional(&mut *self.tx)
        .await?;
        metrics::record_db_query("update", start.elapsed().as_secs_f64());

        if let Some(row) = reserved {
            return Ok(Reservation::Reserved {
                unit_price: row.try_get("price")?,
            });
        }

        // Zero rows: find out which condition failed
        let row = sqlx::query(
            "SELECT is_active, stock_quantity - sold_quantity AS available FROM products WHERE id = $1",
        )
        .bind(product_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        let failure = match row {
            None => ReservationFailure::ProductNotFound,
            Some(row) => {
                let is_active: bool = row.try_get("is_active")?;
                let available: i32 = row.try_get("available")?;
                if is_active {
                    ReservationFailure::InsufficientStock {
                        available: available.max(0),
                    }
                } else {
                    ReservationFailure::ProductInactive
                }
            }
        };
        Ok(Reservation::Rejected(failure))
    }

    async fn release(&mut self, product_id: Uuid, quantity: i32) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET sold_quantity = GREATEST(sold_quantity - $2, 0), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders
                (id, user_id, total_amount, status, shipping_address, payment_method,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.total_amount)
        .bind(order.status.as_str())
        .bind(Json(&order.shipping_address))
        .bind(order.payment_method.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, product_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order.id)
            .bind(position as i32)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn get_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut order = order_from_row(&row)?;
        order.items = PgStore::load_order_items(&mut *self.tx, order.id).await?;
        Ok(Some(order))
    }

    async fn set_order_status(
        &mut self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
