//! Notifications to the external delivery service.
//!
//! Delivery is fire-and-forget: `dispatch` spawns the send and only logs a
//! failure. Nothing here can roll back a committed order.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::OrderStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
    },
    OrderCancelled {
        order_id: Uuid,
        user_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        user_id: Uuid,
        status: OrderStatus,
    },
    FlashSaleChanged {
        flash_sale_id: Uuid,
        change: &'static str,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Default notifier: emits the event to the log stream, where the mailer
/// picks it up.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let payload = serde_json::to_string(notification)?;
        tracing::info!(target: "notifications", %payload, "Notification emitted");
        Ok(())
    }
}

/// Send in the background.
pub fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(err) = notifier.send(&notification).await {
            tracing::warn!(error = %err, ?notification, "Notification delivery failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{recording, FailingNotifier};
    use std::time::Duration;

    #[tokio::test]
    async fn dispatch_delivers_in_background() {
        let recorder = recording();
        let notifier: Arc<dyn Notifier> = recorder.clone();
        let event = Notification::OrderCancelled {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        };

        dispatch(&notifier, event.clone());

        for _ in 0..50 {
            if !recorder.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(recorder.sent.lock().unwrap().as_slice(), &[event]);
    }

    #[tokio::test]
    async fn failing_delivery_is_swallowed() {
        let notifier: Arc<dyn Notifier> = Arc::new(FailingNotifier);
        dispatch(
            &notifier,
            Notification::FlashSaleChanged {
                flash_sale_id: Uuid::new_v4(),
                change: "deleted",
            },
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[test]
    fn payload_is_tagged() {
        let json = serde_json::to_value(Notification::OrderStatusChanged {
            order_id: Uuid::nil(),
            user_id: Uuid::nil(),
            status: OrderStatus::Shipped,
        })
        .unwrap();
        assert_eq!(json["event"], "order_status_changed");
        assert_eq!(json["status"], "shipped");
    }
}
