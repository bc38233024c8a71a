// =============================================================================
// STORE MODULE
// =============================================================================
// Storage-agnostic persistence interface. Services receive an
// `Arc<dyn Store>` at construction; nothing in the order engine knows which
// database sits behind it.
//
// Two implementations:
// - `PgStore`: PostgreSQL via SQLx (production)
// - `MemoryStore`: in-process maps with an undo log (tests / local runs)
//
// CONCURRENCY CONTRACT:
// `StoreTx::try_reserve` is a single conditional update evaluated atomically
// by the backend ("add qty to sold WHERE active AND available >= qty").
// No caller takes an application-level lock around it.
// =============================================================================

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Cart, FlashSale, Order, OrderStatus, Product};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("in-memory store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

// -----------------------------------------------------------------------------
// RESERVATION RESULT
// -----------------------------------------------------------------------------

/// Why a reservation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationFailure {
    ProductNotFound,
    ProductInactive,
    InsufficientStock { available: i32 },
}

/// Outcome of one conditional reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Stock taken; carries the catalog price read in the same statement
    Reserved { unit_price: Decimal },
    Rejected(ReservationFailure),
}

// -----------------------------------------------------------------------------
// FILTERS
// -----------------------------------------------------------------------------
// Predicates are plain data. Each backend renders them in its own dialect
// (SQL for Postgres, closures for memory).

/// Product catalog query.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductFilter {
    pub search: Option<String>,
    pub merchant_id: Option<Uuid>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub active_only: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ProductFilter {
    fn default() -> Self {
        Self {
            search: None,
            merchant_id: None,
            min_price: None,
            max_price: None,
            active_only: true,
            limit: 50,
            offset: 0,
        }
    }
}

impl ProductFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive substring match on the product name.
    pub fn search(mut self, term: impl Into<String>) -> Self {
        let term = term.into();
        self.search = (!term.trim().is_empty()).then(|| term.trim().to_string());
        self
    }

    pub fn merchant(mut self, merchant_id: Uuid) -> Self {
        self.merchant_id = Some(merchant_id);
        self
    }

    pub fn price_between(mut self, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        self.min_price = min;
        self.max_price = max;
        self
    }

    pub fn include_inactive(mut self, include: bool) -> Self {
        self.active_only = !include;
        self
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit.clamp(1, 100);
        self.offset = offset.max(0);
        self
    }

    pub fn matches(&self, product: &Product) -> bool {
        if self.active_only && !product.is_active {
            return false;
        }
        if let Some(term) = &self.search {
            if !product.name.to_lowercase().contains(&term.to_lowercase()) {
                return false;
            }
        }
        if self.merchant_id.is_some_and(|id| id != product.merchant_id) {
            return false;
        }
        if self.min_price.is_some_and(|min| product.price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| product.price > max) {
            return false;
        }
        true
    }
}

/// Order history query.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            user_id: None,
            status: None,
            limit: 20,
            offset: 0,
        }
    }
}

impl OrderFilter {
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn status(mut self, status: Option<OrderStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit.clamp(1, 100);
        self.offset = offset.max(0);
        self
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.map_or(true, |id| id == order.user_id)
            && self.status.map_or(true, |status| status == order.status)
    }
}

// -----------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------

/// Read paths and single-statement writes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction scope for multi-step writes.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>>;
    async fn list_products(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>>;

    async fn load_cart(&self, user_id: Uuid) -> StoreResult<Option<Cart>>;
    async fn save_cart(&self, cart: &Cart) -> StoreResult<()>;

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>>;
    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<Vec<Order>>;

    async fn list_flash_sales(&self) -> StoreResult<Vec<FlashSale>>;
    async fn get_flash_sale(&self, id: Uuid) -> StoreResult<Option<FlashSale>>;
    async fn insert_flash_sale(&self, sale: &FlashSale) -> StoreResult<()>;

    /// Returns `false` when the sale does not exist.
    async fn update_flash_sale(&self, sale: &FlashSale) -> StoreResult<bool>;
    async fn delete_flash_sale(&self, id: Uuid) -> StoreResult<bool>;

    /// Atomically bump the view counter and return the updated record.
    async fn record_flash_sale_view(&self, id: Uuid) -> StoreResult<Option<FlashSale>>;

    async fn health_check(&self) -> bool;
}

/// A transaction scope. Dropping it without `commit` discards every effect.
#[async_trait]
pub trait StoreTx: Send {
    /// Conditionally add `quantity` to the product's sold count.
    async fn try_reserve(&mut self, product_id: Uuid, quantity: i32) -> StoreResult<Reservation>;

    /// Subtract `quantity` from the sold count (floored at zero).
    /// Returns `false` when the product does not exist.
    async fn release(&mut self, product_id: Uuid, quantity: i32) -> StoreResult<bool>;

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()>;

    /// Load an order inside this scope.
    async fn get_order(&mut self, id: Uuid) -> StoreResult<Option<Order>>;

    /// Compare-and-set the order status. Returns `false` when the order is no
    /// longer in `expected`.
    async fn set_order_status(
        &mut self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> StoreResult<bool>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
