//! Shared builders for unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::auth::{CurrentUser, Role};
use crate::models::{PaymentMethod, Product, ShippingAddress};
use crate::notify::{Notification, Notifier};
use crate::store::MemoryStore;

pub fn product(stock: i32, sold: i32, price: Decimal) -> Product {
    Product {
        id: Uuid::new_v4(),
        merchant_id: Uuid::new_v4(),
        merchant_name: "Test Merchant".to_string(),
        name: "Test Product".to_string(),
        price,
        stock_quantity: stock,
        sold_quantity: sold,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Insert a product and return it.
pub fn stocked(store: &MemoryStore, stock: i32, sold: i32, price: Decimal) -> Product {
    let p = product(stock, sold, price);
    store.insert_product(p.clone()).unwrap();
    p
}

pub fn address() -> ShippingAddress {
    ShippingAddress {
        full_name: "Ada Lovelace".to_string(),
        street: "12 Analytical Way".to_string(),
        city: "London".to_string(),
        postal_code: "N1 7AA".to_string(),
        country: "GB".to_string(),
        phone: None,
    }
}

pub fn payment() -> PaymentMethod {
    PaymentMethod::Card
}

pub fn customer() -> CurrentUser {
    CurrentUser {
        user_id: Uuid::new_v4(),
        role: Role::Customer,
    }
}

pub fn admin() -> CurrentUser {
    CurrentUser {
        user_id: Uuid::new_v4(),
        role: Role::Admin,
    }
}

/// Records every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Always fails, to prove delivery problems never reach the caller.
#[derive(Debug, Default)]
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _notification: &Notification) -> anyhow::Result<()> {
        anyhow::bail!("smtp relay unreachable")
    }
}

pub fn recording() -> Arc<RecordingNotifier> {
    Arc::new(RecordingNotifier::default())
}
