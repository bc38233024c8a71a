//! In-memory store.
//!
//! Used by tests and by local runs without `DATABASE_URL`. Every operation
//! takes the state lock only for the duration of one statement, so two
//! transactions interleave the way two database sessions would; the
//! conditional reservation is atomic because check and increment happen under
//! the same lock acquisition. Rollback replays an undo log. Orders inserted in
//! a transaction become visible on commit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    OrderFilter, ProductFilter, Reservation, ReservationFailure, Store, StoreError, StoreResult,
    StoreTx,
};
use crate::models::{Cart, FlashSale, Order, OrderStatus, Product};

#[derive(Debug, Default)]
struct State {
    products: HashMap<Uuid, Product>,
    carts: HashMap<Uuid, Cart>,
    orders: HashMap<Uuid, Order>,
    flash_sales: HashMap<Uuid, FlashSale>,
}

fn lock(state: &Mutex<State>) -> StoreResult<MutexGuard<'_, State>> {
    state.lock().map_err(|_| StoreError::Poisoned)
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog write used for seeding. The order engine never calls this.
    pub fn insert_product(&self, product: Product) -> StoreResult<()> {
        lock(&self.state)?.products.insert(product.id, product);
        Ok(())
    }

    /// Catalog edit (price change, deactivation) as the merchant service
    /// would perform it.
    pub fn update_product(&self, id: Uuid, edit: impl FnOnce(&mut Product)) -> StoreResult<bool> {
        let mut state = lock(&self.state)?;
        Ok(match state.products.get_mut(&id) {
            Some(product) => {
                edit(product);
                product.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    /// Seed a handful of products so a local run has something to sell.
    pub fn seed_sample_products(&self) -> StoreResult<Vec<Product>> {
        let merchant_id = Uuid::new_v4();
        let samples = [
            ("Dell XPS 15 Laptop", Decimal::new(189_900, 2), 50),
            ("iPhone 15 Pro", Decimal::new(99_900, 2), 100),
            ("Logitech MX Keys", Decimal::new(9_999, 2), 200),
            ("Sony WH-1000XM5", Decimal::new(34_900, 2), 60),
            ("USB-C Cable 2m", Decimal::new(1_299, 2), 500),
        ];

        let now = Utc::now();
        let products: Vec<Product> = samples
            .into_iter()
            .map(|(name, price, stock)| Product {
                id: Uuid::new_v4(),
                merchant_id,
                merchant_name: "Sample Electronics".to_string(),
                name: name.to_string(),
                price,
                stock_quantity: stock,
                sold_quantity: 0,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .collect();

        let mut state = lock(&self.state)?;
        for product in &products {
            state.products.insert(product.id, product.clone());
        }
        Ok(products)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            undo: Vec::new(),
            pending_orders: Vec::new(),
            finished: false,
        }))
    }

    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(lock(&self.state)?.products.get(&id).cloned())
    }

    async fn list_products(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>> {
        let state = lock(&self.state)?;
        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|product| filter.matches(product))
            .cloned()
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        Ok(products
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect())
    }

    async fn load_cart(&self, user_id: Uuid) -> StoreResult<Option<Cart>> {
        Ok(lock(&self.state)?.carts.get(&user_id).cloned())
    }

    async fn save_cart(&self, cart: &Cart) -> StoreResult<()> {
        lock(&self.state)?.carts.insert(cart.user_id, cart.clone());
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(lock(&self.state)?.orders.get(&id).cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<Vec<Order>> {
        let state = lock(&self.state)?;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|order| filter.matches(order))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(orders
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect())
    }

    async fn list_flash_sales(&self) -> StoreResult<Vec<FlashSale>> {
        let state = lock(&self.state)?;
        let mut sales: Vec<FlashSale> = state.flash_sales.values().cloned().collect();
        sales.sort_by(|a, b| a.start_date.cmp(&b.start_date));
        Ok(sales)
    }

    async fn get_flash_sale(&self, id: Uuid) -> StoreResult<Option<FlashSale>> {
        Ok(lock(&self.state)?.flash_sales.get(&id).cloned())
    }

    async fn insert_flash_sale(&self, sale: &FlashSale) -> StoreResult<()> {
        lock(&self.state)?.flash_sales.insert(sale.id, sale.clone());
        Ok(())
    }

    async fn update_flash_sale(&self, sale: &FlashSale) -> StoreResult<bool> {
        let mut state = lock(&self.state)?;
        Ok(match state.flash_sales.get_mut(&sale.id) {
            Some(existing) => {
                // The counter is owned by record_flash_sale_view
                let view_count = existing.view_count;
                *existing = sale.clone();
                existing.view_count = view_count;
                true
            }
            None => false,
        })
    }

    async fn delete_flash_sale(&self, id: Uuid) -> StoreResult<bool> {
        Ok(lock(&self.state)?.flash_sales.remove(&id).is_some())
    }

    async fn record_flash_sale_view(&self, id: Uuid) -> StoreResult<Option<FlashSale>> {
        let mut state = lock(&self.state)?;
        Ok(state.flash_sales.get_mut(&id).map(|sale| {
            sale.view_count += 1;
            sale.clone()
        }))
    }

    async fn health_check(&self) -> bool {
        self.state.lock().is_ok()
    }
}

// -----------------------------------------------------------------------------
// TRANSACTION
// -----------------------------------------------------------------------------

#[derive(Debug)]
enum Undo {
    Reserved { product_id: Uuid, quantity: i32 },
    Released { product_id: Uuid, quantity: i32 },
    Status { order_id: Uuid, previous: OrderStatus },
}

#[derive(Debug)]
struct MemoryTx {
    state: Arc<Mutex<State>>,
    undo: Vec<Undo>,
    pending_orders: Vec<Order>,
    finished: bool,
}

impl MemoryTx {
    fn undo_all(&mut self) -> StoreResult<()> {
        self.finished = true;
        self.pending_orders.clear();
        let mut state = lock(&self.state)?;
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Reserved {
                    product_id,
                    quantity,
                } => {
                    if let Some(product) = state.products.get_mut(&product_id) {
                        product.sold_quantity -= quantity;
                    }
                }
                Undo::Released {
                    product_id,
                    quantity,
                } => {
                    if let Some(product) = state.products.get_mut(&product_id) {
                        product.sold_quantity += quantity;
                    }
                }
                Undo::Status { order_id, previous } => {
                    if let Some(order) = state.orders.get_mut(&order_id) {
                        order.status = previous;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.undo_all() {
                tracing::error!(error = %err, "Failed to roll back dropped transaction");
            }
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn try_reserve(&mut self, product_id: Uuid, quantity: i32) -> StoreResult<Reservation> {
        let mut state = lock(&self.state)?;
        let Some(product) = state.products.get_mut(&product_id) else {
            return Ok(Reservation::Rejected(ReservationFailure::ProductNotFound));
        };
        if !product.is_active {
            return Ok(Reservation::Rejected(ReservationFailure::ProductInactive));
        }
        let available = product.available();
        if available < quantity {
            return Ok(Reservation::Rejected(ReservationFailure::InsufficientStock {
                available,
            }));
        }

        product.sold_quantity += quantity;
        let unit_price = product.price;
        drop(state);

        self.undo.push(Undo::Reserved {
            product_id,
            quantity,
        });
        Ok(Reservation::Reserved { unit_price })
    }

    async fn release(&mut self, product_id: Uuid, quantity: i32) -> StoreResult<bool> {
        let mut state = lock(&self.state)?;
        let Some(product) = state.products.get_mut(&product_id) else {
            return Ok(false);
        };
        let released = quantity.min(product.sold_quantity).max(0);
        product.sold_quantity -= released;
        drop(state);

        self.undo.push(Undo::Released {
            product_id,
            quantity: released,
        });
        Ok(true)
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        self.pending_orders.push(order.clone());
        Ok(())
    }

    async fn get_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        if let Some(order) = self.pending_orders.iter().find(|order| order.id == id) {
            return Ok(Some(order.clone()));
        }
        Ok(lock(&self.state)?.orders.get(&id).cloned())
    }

    async fn set_order_status(
        &mut self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> StoreResult<bool> {
        let mut state = lock(&self.state)?;
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(false);
        };
        if order.status != expected {
            return Ok(false);
        }
        order.status = next;
        order.updated_at = Utc::now();
        drop(state);

        self.undo.push(Undo::Status {
            order_id: id,
            previous: expected,
        });
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut this = self;
        let mut state = lock(&this.state)?;
        for order in this.pending_orders.drain(..) {
            state.orders.insert(order.id, order);
        }
        drop(state);

        this.undo.clear();
        this.finished = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let mut this = self;
        this.undo_all()
    }
}
