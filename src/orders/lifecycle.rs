// =============================================================================
// ORDER LIFECYCLE
// =============================================================================
// Reads, cancellation and status changes for committed orders.
//
//   pending -> confirmed -> processing -> shipped -> delivered
//      \__________\____________\
//                               -> cancelled (stock restored)
//
// Transitions only move forward. Every status write is compare-and-set
// against the status we read, so two racing cancels release stock once.
// =============================================================================

use std::sync::Arc;

use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::{AppError, AppResult};
use crate::ledger;
use crate::metrics;
use crate::models::{Order, OrderStatus, ParseStatusError};
use crate::notify::{self, Notification, Notifier};
use crate::store::{OrderFilter, Store, StoreTx};

pub struct OrderLifecycle {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Order {id} not found"))
}

impl OrderLifecycle {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Fetch one order. Orders the caller may not see are reported missing.
    pub async fn get_order(&self, actor: &CurrentUser, id: Uuid) -> AppResult<Order> {
        match self.store.get_order(id).await? {
            Some(order) if actor.can_access(order.user_id) => Ok(order),
            _ => Err(not_found(id)),
        }
    }

    /// Order history. Customers only ever see their own orders.
    pub async fn list_orders(&self, actor: &CurrentUser, filter: OrderFilter) -> AppResult<Vec<Order>> {
        let filter = if actor.is_admin() {
            filter
        } else {
            OrderFilter {
                user_id: Some(actor.user_id),
                ..filter
            }
        };
        Ok(self.store.list_orders(&filter).await?)
    }

    /// Cancel an order and put its items back into stock.
    pub async fn cancel(&self, actor: &CurrentUser, id: Uuid) -> AppResult<Order> {
        let mut tx = self.store.begin().await?;

        match Self::cancel_in(tx.as_mut(), actor, id).await {
            Ok(order) => {
                tx.commit().await?;

                metrics::record_order_cancelled();
                tracing::info!(order_id = %id, actor = %actor.user_id, "Order cancelled");
                notify::dispatch(
                    &self.notifier,
                    Notification::OrderCancelled {
                        order_id: order.id,
                        user_id: order.user_id,
                    },
                );
                Ok(order)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "Cancel rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn cancel_in(tx: &mut dyn StoreTx, actor: &CurrentUser, id: Uuid) -> AppResult<Order> {
        let mut order = match tx.get_order(id).await? {
            Some(order) if actor.can_access(order.user_id) => order,
            _ => return Err(not_found(id)),
        };

        if !order.status.is_cancellable() {
            return Err(AppError::InvalidState {
                order_id: id,
                status: order.status,
            });
        }

        if !tx
            .set_order_status(id, order.status, OrderStatus::Cancelled)
            .await?
        {
            // Someone moved it between our read and write
            let current = tx.get_order(id).await?.ok_or_else(|| not_found(id))?;
            return Err(AppError::InvalidState {
                order_id: id,
                status: current.status,
            });
        }

        for item in &order.items {
            ledger::release(tx, item.product_id, item.quantity).await?;
        }

        order.status = OrderStatus::Cancelled;
        order.updated_at = chrono::Utc::now();
        Ok(order)
    }

    /// Move an order along its lifecycle.
    pub async fn update_status(&self, actor: &CurrentUser, id: Uuid, raw: &str) -> AppResult<Order> {
        let next: OrderStatus = raw
            .parse()
            .map_err(|err: ParseStatusError| AppError::InvalidInput(err.to_string()))?;

        if next == OrderStatus::Cancelled {
            return self.cancel(actor, id).await;
        }

        let mut tx = self.store.begin().await?;
        let mut order = match tx.get_order(id).await? {
            Some(order) if actor.can_access(order.user_id) => order,
            _ => return Err(not_found(id)),
        };

        if !order.status.can_transition_to(next) {
            tx.rollback().await?;
            return Err(AppError::InvalidTransition {
                from: order.status,
                to: next,
            });
        }

        if !tx.set_order_status(id, order.status, next).await? {
            let current = tx.get_order(id).await?.ok_or_else(|| not_found(id))?;
            tx.rollback().await?;
            return Err(AppError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }
        tx.commit().await?;

        let previous = order.status;
        order.status = next;
        order.updated_at = chrono::Utc::now();

        tracing::info!(order_id = %id, from = %previous, to = %next, "Order status updated");
        notify::dispatch(
            &self.notifier,
            Notification::OrderStatusChanged {
                order_id: id,
                user_id: order.user_id,
                status: next,
            },
        );
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{address, admin, customer, payment, recording, stocked};
    use crate::models::{CreateOrderRequest, OrderItem, OrderLineRequest};
    use crate::orders::OrderCoordinator;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;

    struct Harness {
        store: MemoryStore,
        orders: OrderCoordinator,
        lifecycle: OrderLifecycle,
    }

    fn harness() -> Harness {
        let store = MemoryStore::new();
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        Harness {
            orders: OrderCoordinator::new(Arc::clone(&shared), recording()),
            lifecycle: OrderLifecycle::new(shared, recording()),
            store,
        }
    }

    async fn place(h: &Harness, user: Uuid, product_id: Uuid, quantity: i32) -> Order {
        h.orders
            .create_order(
                user,
                CreateOrderRequest {
                    items: vec![OrderLineRequest {
                        product_id,
                        quantity,
                    }],
                    shipping_address: Some(address()),
                    payment_method: Some(payment()),
                },
            )
            .await
            .unwrap()
    }

    async fn sold(h: &Harness, id: Uuid) -> i32 {
        h.store.get_product(id).await.unwrap().unwrap().sold_quantity
    }

    #[tokio::test]
    async fn cancel_restores_reserved_stock() {
        let h = harness();
        let p = stocked(&h.store, 20, 0, Decimal::ONE);
        let buyer = customer();
        let order = place(&h, buyer.user_id, p.id, 10).await;
        assert_eq!(sold(&h, p.id).await, 10);

        let cancelled = h.lifecycle.cancel(&buyer, order.id).await.unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(sold(&h, p.id).await, 0);
        let stored = h.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_frees_units_for_the_next_buyer() {
        let h = harness();
        let p = stocked(&h.store, 10, 0, Decimal::ONE);
        let first = customer();
        let order = place(&h, first.user_id, p.id, 8).await;
        place(&h, Uuid::new_v4(), p.id, 2).await;

        h.lifecycle.cancel(&first, order.id).await.unwrap();

        let product = h.store.get_product(p.id).await.unwrap().unwrap();
        assert_eq!(product.available(), 8);
    }

    #[tokio::test]
    async fn failed_release_leaves_order_and_stock_untouched() {
        let h = harness();
        let p = stocked(&h.store, 20, 3, Decimal::ONE);
        let buyer = customer();
        let now = chrono::Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: buyer.user_id,
            items: vec![
                OrderItem {
                    product_id: p.id,
                    quantity: 3,
                    unit_price: Decimal::ONE,
                },
                OrderItem {
                    product_id: Uuid::new_v4(),
                    quantity: 1,
                    unit_price: Decimal::ONE,
                },
            ],
            total_amount: Decimal::from(4),
            status: OrderStatus::Pending,
            shipping_address: address(),
            payment_method: payment(),
            created_at: now,
            updated_at: now,
        };
        let mut tx = h.store.begin().await.unwrap();
        tx.insert_order(&order).await.unwrap();
        tx.commit().await.unwrap();

        let err = h.lifecycle.cancel(&buyer, order.id).await.unwrap_err();

        assert!(matches!(err, AppError::Internal(_)));
        let stored = h.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert_eq!(sold(&h, p.id).await, 3);
    }

    #[tokio::test]
    async fn shipped_orders_cannot_be_cancelled() {
        let h = harness();
        let p = stocked(&h.store, 10, 0, Decimal::ONE);
        let buyer = customer();
        let order = place(&h, buyer.user_id, p.id, 4).await;
        h.lifecycle
            .update_status(&admin(), order.id, "shipped")
            .await
            .unwrap();

        let err = h.lifecycle.cancel(&buyer, order.id).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::InvalidState {
                status: OrderStatus::Shipped,
                ..
            }
        ));
        assert_eq!(sold(&h, p.id).await, 4);
    }

    #[tokio::test]
    async fn second_cancel_is_rejected_without_double_release() {
        let h = harness();
        let p = stocked(&h.store, 10, 0, Decimal::ONE);
        let buyer = customer();
        let order = place(&h, buyer.user_id, p.id, 3).await;
        // Another buyer holds units too, so a double release would show
        place(&h, Uuid::new_v4(), p.id, 5).await;

        h.lifecycle.cancel(&buyer, order.id).await.unwrap();
        let err = h.lifecycle.cancel(&buyer, order.id).await.unwrap_err();

        assert!(matches!(err, AppError::InvalidState { .. }));
        assert_eq!(sold(&h, p.id).await, 5);
    }

    #[tokio::test]
    async fn strangers_see_not_found() {
        let h = harness();
        let p = stocked(&h.store, 10, 0, Decimal::ONE);
        let owner = customer();
        let order = place(&h, owner.user_id, p.id, 1).await;
        let stranger = customer();

        assert!(matches!(
            h.lifecycle.get_order(&stranger, order.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.lifecycle.cancel(&stranger, order.id).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(sold(&h, p.id).await, 1);
        assert!(h.lifecycle.get_order(&admin(), order.id).await.is_ok());
    }

    #[tokio::test]
    async fn status_moves_forward_only() {
        let h = harness();
        let p = stocked(&h.store, 10, 0, Decimal::ONE);
        let order = place(&h, Uuid::new_v4(), p.id, 1).await;
        let admin = admin();

        let confirmed = h
            .lifecycle
            .update_status(&admin, order.id, "confirmed")
            .await
            .unwrap();
        assert_eq!(confirmed.status, OrderStatus::Confirmed);

        let err = h
            .lifecycle
            .update_status(&admin, order.id, "pending")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: OrderStatus::Confirmed,
                to: OrderStatus::Pending
            }
        ));

        let err = h
            .lifecycle
            .update_status(&admin, order.id, "teleported")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn cancelling_through_status_update_restores_stock() {
        let h = harness();
        let p = stocked(&h.store, 10, 0, Decimal::ONE);
        let order = place(&h, Uuid::new_v4(), p.id, 6).await;

        let cancelled = h
            .lifecycle
            .update_status(&admin(), order.id, "cancelled")
            .await
            .unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(sold(&h, p.id).await, 0);
    }

    #[tokio::test]
    async fn strangers_cannot_change_status() {
        let h = harness();
        let p = stocked(&h.store, 10, 0, Decimal::ONE);
        let order = place(&h, Uuid::new_v4(), p.id, 1).await;

        let err = h
            .lifecycle
            .update_status(&customer(), order.id, "delivered")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let stored = h.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn listing_is_scoped_to_the_caller() {
        let h = harness();
        let p = stocked(&h.store, 10, 0, Decimal::ONE);
        let me = customer();
        place(&h, me.user_id, p.id, 1).await;
        place(&h, Uuid::new_v4(), p.id, 1).await;

        let mine = h
            .lifecycle
            .list_orders(&me, OrderFilter::default())
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert!(mine.iter().all(|o| o.user_id == me.user_id));

        let all = h
            .lifecycle
            .list_orders(&admin(), OrderFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }
}
