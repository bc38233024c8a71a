// =============================================================================
// MODELS MODULE
// =============================================================================
// Domain records (products, carts, orders, flash sales) and the request /
// response shapes of the HTTP API.
//
// LEARNING NOTES:
// - Money is rust_decimal::Decimal, never f64
// - Derived values (cart totals, discount percentages) are recomputed by the
//   owning component, never trusted from the client
// - Every write operation has an explicit input struct; validation lives in
//   the service that owns the invariant
// =============================================================================

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Smallest and largest quantity a single cart line may hold.
pub const MIN_CART_QUANTITY: i32 = 1;
pub const MAX_CART_QUANTITY: i32 = 10;

/// Round a money amount to cents.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp(2)
}

// =============================================================================
// PRODUCT
// =============================================================================
// Owned by the merchant catalog. This service reads price / stock / active
// flags and only writes `sold_quantity`, through the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub merchant_name: String,
    pub name: String,
    pub price: Decimal,

    /// Total units ever stocked
    pub stock_quantity: i32,

    /// Cumulative committed sales. Never exceeds `stock_quantity`.
    pub sold_quantity: i32,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Units that can still be reserved.
    pub fn available(&self) -> i32 {
        (self.stock_quantity - self.sold_quantity).max(0)
    }

    pub fn is_sold_out(&self) -> bool {
        self.available() == 0
    }
}

// =============================================================================
// CART
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartItem {
    /// Line id, used by PUT/DELETE /cart/items/:id
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,

    /// Price snapshot taken when the line was added or last repriced
    pub price: Decimal,

    pub merchant_id: Uuid,
    pub merchant_name: String,
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    pub fn from_product(product: &Product, quantity: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id: product.id,
            product_name: product.name.clone(),
            quantity,
            price: product.price,
            merchant_id: product.merchant_id,
            merchant_name: product.merchant_name.clone(),
            added_at: Utc::now(),
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// One cart per user, created lazily on first access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cart {
    pub user_id: Uuid,
    pub items: Vec<CartItem>,

    /// Derived; recomputed on every read and write
    pub total_amount: Decimal,

    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            items: Vec::new(),
            total_amount: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn recompute_total(&mut self) {
        self.total_amount = round_money(self.items.iter().map(CartItem::line_total).sum());
        self.updated_at = Utc::now();
    }
}

/// Why a cart line would not check out as-is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CartIssueKind {
    Unavailable,
    InsufficientStock,
    PriceChanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartIssue {
    pub product_id: Uuid,
    pub kind: CartIssueKind,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Decimal>,
}

/// Dry-run report returned by POST /cart/validate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartValidation {
    pub is_valid: bool,
    pub issues: Vec<CartIssue>,

    /// Lines that can still be purchased, carrying current prices
    pub valid_items: Vec<CartItem>,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
}

// =============================================================================
// ORDER
// =============================================================================

/// Order status. Happy path is forward-only; `Cancelled` is reachable from
/// `Pending` and `Confirmed` only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    /// Position on the happy path; `None` for `Cancelled`.
    fn rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Confirmed => Some(1),
            OrderStatus::Processing => Some(2),
            OrderStatus::Shipped => Some(3),
            OrderStatus::Delivered => Some(4),
            OrderStatus::Cancelled => None,
        }
    }

    /// Whether moving from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if next == OrderStatus::Cancelled {
            return self.is_cancellable();
        }
        match (self.rank(), next.rank()) {
            (Some(current), Some(target)) => target > current,
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for OrderStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Wallet,
    CashOnDelivery,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::CashOnDelivery => "cash_on_delivery",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(PaymentMethod::Card),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "wallet" => Ok(PaymentMethod::Wallet),
            "cash_on_delivery" => Ok(PaymentMethod::CashOnDelivery),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShippingAddress {
    pub full_name: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl ShippingAddress {
    /// Names of required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("full_name", &self.full_name),
            ("street", &self.street),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub quantity: i32,

    /// Catalog price at the moment of purchase
    pub unit_price: Decimal,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,

    /// Frozen at creation
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A requested order line. Prices are never accepted from the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderLineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Body of POST /orders. Optional fields are checked by the coordinator so
/// that a missing field is a 400 with a clear message, not a decode error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub items: Vec<OrderLineRequest>,
    pub shipping_address: Option<ShippingAddress>,
    pub payment_method: Option<PaymentMethod>,
}

/// Body of POST /cart/checkout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutRequest {
    pub shipping_address: Option<ShippingAddress>,
    pub payment_method: Option<PaymentMethod>,
}

/// Body of PUT /orders/:id/status. Kept as a string so an unknown value is a
/// 400 rather than a JSON rejection.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// =============================================================================
// FLASH SALE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlashSaleProduct {
    pub product_id: Uuid,
    pub original_price: Decimal,
    pub sale_price: Decimal,

    /// Derived from the two prices
    pub discount_percentage: Decimal,

    pub stock_quantity: i32,
    pub sold_quantity: i32,
    pub max_quantity_per_user: i32,
}

/// Admin-managed sale. Whether it is *currently* active is never stored; see
/// `flash_sales::status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlashSale {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,

    /// Administrative on/off switch, independent of the time window
    pub is_active: bool,

    pub products: Vec<FlashSaleProduct>,
    pub view_count: i64,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlashSaleProductInput {
    pub product_id: Uuid,
    pub original_price: Decimal,
    pub sale_price: Decimal,
    #[serde(default)]
    pub stock_quantity: i32,
    #[serde(default = "default_quantity")]
    pub max_quantity_per_user: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFlashSaleRequest {
    pub title: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub products: Vec<FlashSaleProductInput>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateFlashSaleRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub products: Option<Vec<FlashSaleProductInput>>,
}

// =============================================================================
// HEALTH CHECK RESPONSES
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub store: bool,

    /// `None` when no cache is configured
    pub redis: Option<bool>,
}

// =============================================================================
// ERROR RESPONSES
// =============================================================================

/// API error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,

    /// Machine-readable context (offending product, available quantity, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        error: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}
