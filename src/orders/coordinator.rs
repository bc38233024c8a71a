// =============================================================================
// ORDER TRANSACTION COORDINATOR
// =============================================================================
// Turns line items into a committed order, all or nothing:
//
//   begin tx
//   for each line (client order): ledger::reserve
//       refused -> release earlier lines newest-first, roll back, return conflict
//   total = sum(current catalog price * qty)
//   insert order (pending), commit
//
// Concurrency comes from the store: each reservation is a single conditional
// update, so racing checkouts for the last unit serialize in the database.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::ledger::{self, ReservationLog};
use crate::metrics;
use crate::models::{
    round_money, CreateOrderRequest, Order, OrderItem, OrderLineRequest, OrderStatus,
    PaymentMethod, ShippingAddress,
};
use crate::notify::{self, Notification, Notifier};
use crate::store::{Store, StoreTx};

/// A request that passed field validation.
struct ValidOrder {
    lines: Vec<OrderLineRequest>,
    shipping_address: ShippingAddress,
    payment_method: PaymentMethod,
}

fn validate(request: CreateOrderRequest) -> AppResult<ValidOrder> {
    if request.items.is_empty() {
        return Err(AppError::InvalidInput(
            "Order must contain at least one item".to_string(),
        ));
    }
    if let Some(line) = request.items.iter().find(|line| line.quantity < 1) {
        return Err(AppError::InvalidInput(format!(
            "Quantity for product {} must be at least 1",
            line.product_id
        )));
    }

    let shipping_address = request
        .shipping_address
        .ok_or_else(|| AppError::InvalidInput("Shipping address is required".to_string()))?;
    let missing = shipping_address.missing_fields();
    if !missing.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "Shipping address is missing: {}",
            missing.join(", ")
        )));
    }

    let payment_method = request
        .payment_method
        .ok_or_else(|| AppError::InvalidInput("Payment method is required".to_string()))?;

    Ok(ValidOrder {
        lines: request.items,
        shipping_address,
        payment_method,
    })
}

fn failure_reason(err: &AppError) -> &'static str {
    match err {
        AppError::InsufficientStock { .. } => "insufficient_stock",
        AppError::ProductUnavailable { .. } => "product_unavailable",
        _ => "internal",
    }
}

pub struct OrderCoordinator {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
}

impl OrderCoordinator {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Create an order for `user_id`, reserving stock for every line.
    pub async fn create_order(&self, user_id: Uuid, request: CreateOrderRequest) -> AppResult<Order> {
        let order = validate(request)?;
        let mut tx = self.store.begin().await?;

        match Self::reserve_and_insert(tx.as_mut(), user_id, order).await {
            Ok(order) => {
                tx.commit().await?;

                metrics::record_order_created();
                tracing::info!(
                    order_id = %order.id,
                    %user_id,
                    items = order.items.len(),
                    total = %order.total_amount,
                    "Order created"
                );
                notify::dispatch(
                    &self.notifier,
                    Notification::OrderPlaced {
                        order_id: order.id,
                        user_id,
                        total_amount: order.total_amount,
                    },
                );
                Ok(order)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "Order rollback failed");
                }
                metrics::record_order_failure(failure_reason(&err));
                tracing::warn!(%user_id, error = %err, "Order rejected");
                Err(err)
            }
        }
    }

    async fn reserve_and_insert(
        tx: &mut dyn StoreTx,
        user_id: Uuid,
        order: ValidOrder,
    ) -> AppResult<Order> {
        let mut reservations = ReservationLog::default();
        let mut items = Vec::with_capacity(order.lines.len());

        for line in &order.lines {
            match ledger::reserve(tx, line.product_id, line.quantity).await {
                Ok(unit_price) => {
                    reservations.record(line.product_id, line.quantity);
                    items.push(OrderItem {
                        product_id: line.product_id,
                        quantity: line.quantity,
                        unit_price,
                    });
                }
                Err(err) => {
                    // Undo inside the scope too, so the effect is gone even
                    // before the rollback reaches the store
                    if let Err(undo_err) = reservations.undo(tx).await {
                        tracing::error!(error = %undo_err, "Compensating release failed");
                    }
                    return Err(err);
                }
            }
        }

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id,
            total_amount: round_money(items.iter().map(OrderItem::line_total).sum()),
            items,
            status: OrderStatus::Pending,
            shipping_address: order.shipping_address,
            payment_method: order.payment_method,
            created_at: now,
            updated_at: now,
        };
        tx.insert_order(&order).await?;

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{address, payment, recording, stocked, FailingNotifier};
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;

    fn coordinator(store: &MemoryStore) -> OrderCoordinator {
        OrderCoordinator::new(Arc::new(store.clone()), recording())
    }

    fn request(lines: &[(Uuid, i32)]) -> CreateOrderRequest {
        CreateOrderRequest {
            items: lines
                .iter()
                .map(|&(product_id, quantity)| OrderLineRequest {
                    product_id,
                    quantity,
                })
                .collect(),
            shipping_address: Some(address()),
            payment_method: Some(payment()),
        }
    }

    async fn sold(store: &MemoryStore, id: Uuid) -> i32 {
        store.get_product(id).await.unwrap().unwrap().sold_quantity
    }

    #[tokio::test]
    async fn order_uses_catalog_prices_and_starts_pending() {
        let store = MemoryStore::new();
        let a = stocked(&store, 10, 0, Decimal::new(1050, 2));
        let b = stocked(&store, 10, 0, Decimal::new(300, 2));

        let order = coordinator(&store)
            .create_order(Uuid::new_v4(), request(&[(a.id, 2), (b.id, 1)]))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_amount, Decimal::new(2400, 2));
        assert_eq!(order.items[0].unit_price, Decimal::new(1050, 2));
        assert_eq!(sold(&store, a.id).await, 2);
        assert!(store.get_order(order.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_line_leaves_earlier_lines_unreserved() {
        let store = MemoryStore::new();
        let p1 = stocked(&store, 10, 0, Decimal::ONE);
        let p2 = stocked(&store, 5, 0, Decimal::ONE);

        let err = coordinator(&store)
            .create_order(Uuid::new_v4(), request(&[(p1.id, 2), (p2.id, 100)]))
            .await
            .unwrap_err();

        match err {
            AppError::InsufficientStock {
                product_id,
                available,
                requested,
            } => {
                assert_eq!(product_id, p2.id);
                assert_eq!(available, 5);
                assert_eq!(requested, 100);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(sold(&store, p1.id).await, 0);
        assert_eq!(sold(&store, p2.id).await, 0);
        assert!(store
            .list_orders(&crate::store::OrderFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn inactive_product_aborts_order() {
        let store = MemoryStore::new();
        let p = stocked(&store, 10, 0, Decimal::ONE);
        store.update_product(p.id, |p| p.is_active = false).unwrap();

        let err = coordinator(&store)
            .create_order(Uuid::new_v4(), request(&[(p.id, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ProductUnavailable { product_id } if product_id == p.id));
    }

    #[tokio::test]
    async fn missing_fields_are_invalid_input() {
        let store = MemoryStore::new();
        let p = stocked(&store, 10, 0, Decimal::ONE);
        let orders = coordinator(&store);
        let user = Uuid::new_v4();

        let empty = request(&[]);
        let mut no_address = request(&[(p.id, 1)]);
        no_address.shipping_address = None;
        let mut no_payment = request(&[(p.id, 1)]);
        no_payment.payment_method = None;
        let zero_quantity = request(&[(p.id, 0)]);

        for bad in [empty, no_address, no_payment, zero_quantity] {
            let err = orders.create_order(user, bad).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)), "{err:?}");
        }
        assert_eq!(sold(&store, p.id).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_orders_never_oversell() {
        let store = MemoryStore::new();
        let p = stocked(&store, 10, 0, Decimal::ONE);
        let orders = Arc::new(coordinator(&store));

        let attempts: Vec<_> = (0..20)
            .map(|i| {
                let orders = Arc::clone(&orders);
                let quantity = 1 + (i % 3);
                tokio::spawn(async move {
                    orders
                        .create_order(Uuid::new_v4(), request(&[(p.id, quantity)]))
                        .await
                        .map(|order| order.items[0].quantity)
                })
            })
            .collect();

        let mut reserved = 0;
        let mut refused = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(quantity) => reserved += quantity,
                Err(AppError::InsufficientStock { .. }) => refused += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert!(reserved <= 10);
        assert!(refused >= 1);
        assert_eq!(sold(&store, p.id).await, reserved);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn last_units_go_to_one_buyer() {
        let store = MemoryStore::new();
        let p = stocked(&store, 10, 8, Decimal::ONE);
        let orders = Arc::new(coordinator(&store));

        let a = {
            let orders = Arc::clone(&orders);
            tokio::spawn(async move {
                orders
                    .create_order(Uuid::new_v4(), request(&[(p.id, 2)]))
                    .await
            })
        };
        let b = {
            let orders = Arc::clone(&orders);
            tokio::spawn(async move {
                orders
                    .create_order(Uuid::new_v4(), request(&[(p.id, 2)]))
                    .await
            })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(AppError::InsufficientStock { available: 0, .. })
        )));
        assert_eq!(sold(&store, p.id).await, 10);
    }

    #[tokio::test]
    async fn notification_failure_does_not_undo_order() {
        let store = MemoryStore::new();
        let p = stocked(&store, 10, 0, Decimal::ONE);
        let orders = OrderCoordinator::new(Arc::new(store.clone()), Arc::new(FailingNotifier));

        let order = orders
            .create_order(Uuid::new_v4(), request(&[(p.id, 3)]))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        assert!(store.get_order(order.id).await.unwrap().is_some());
        assert_eq!(sold(&store, p.id).await, 3);
    }
}
