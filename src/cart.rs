// =============================================================================
// CART AGGREGATOR
// =============================================================================
// Pending selections per user, reconciled against the live catalog on read.
//
// - add/update check quantity bounds and live stock (including what is
//   already in the cart) and snapshot the current price
// - view drops lines whose product is inactive or sold out and reprices the
//   rest
// - validate is a dry run that reports what checkout would run into
// - checkout hands the lines to the order coordinator, which re-reads prices
//   and reserves stock atomically
// =============================================================================

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    round_money, AddCartItemRequest, Cart, CartIssue, CartIssueKind, CartItem, CartValidation,
    CheckoutRequest, CreateOrderRequest, Order, OrderLineRequest, Product, MAX_CART_QUANTITY,
    MIN_CART_QUANTITY,
};
use crate::orders::OrderCoordinator;
use crate::store::Store;

pub struct CartService {
    store: Arc<dyn Store>,
}

fn check_quantity(quantity: i32) -> AppResult<()> {
    if !(MIN_CART_QUANTITY..=MAX_CART_QUANTITY).contains(&quantity) {
        return Err(AppError::InvalidInput(format!(
            "Quantity must be between {MIN_CART_QUANTITY} and {MAX_CART_QUANTITY}, got {quantity}"
        )));
    }
    Ok(())
}

fn check_stock(product: &Product, quantity: i32) -> AppResult<()> {
    if product.available() < quantity {
        return Err(AppError::InsufficientStock {
            product_id: product.id,
            available: product.available(),
            requested: quantity,
        });
    }
    Ok(())
}

impl CartService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn load_or_create(&self, user_id: Uuid) -> AppResult<Cart> {
        Ok(self
            .store
            .load_cart(user_id)
            .await?
            .unwrap_or_else(|| Cart::new(user_id)))
    }

    async fn load_existing(&self, user_id: Uuid) -> AppResult<Cart> {
        self.store
            .load_cart(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Cart not found".to_string()))
    }

    /// Product that can be put in a cart.
    async fn purchasable_product(&self, product_id: Uuid) -> AppResult<Product> {
        let product = self
            .store
            .get_product(product_id)
            .await?
            .ok_or_else(|| AppError::InvalidInput(format!("Product {product_id} does not exist")))?;

        if !product.is_active {
            return Err(AppError::ProductUnavailable { product_id });
        }
        Ok(product)
    }

    async fn save(&self, mut cart: Cart) -> AppResult<Cart> {
        cart.recompute_total();
        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    // -------------------------------------------------------------------------
    // WRITES
    // -------------------------------------------------------------------------

    /// Add a product, merging with an existing line for the same product.
    pub async fn add_item(&self, user_id: Uuid, request: AddCartItemRequest) -> AppResult<Cart> {
        check_quantity(request.quantity)?;
        let product = self.purchasable_product(request.product_id).await?;
        let mut cart = self.load_or_create(user_id).await?;

        match cart
            .items
            .iter_mut()
            .find(|item| item.product_id == product.id)
        {
            Some(line) => {
                let quantity = (line.quantity + request.quantity).min(MAX_CART_QUANTITY);
                check_stock(&product, quantity)?;
                line.quantity = quantity;
                line.price = product.price;
            }
            None => {
                check_stock(&product, request.quantity)?;
                cart.items.push(CartItem::from_product(&product, request.quantity));
            }
        }

        tracing::info!(%user_id, product_id = %product.id, quantity = request.quantity, "Cart item added");
        self.save(cart).await
    }

    /// Replace a line's quantity.
    pub async fn update_item(&self, user_id: Uuid, item_id: Uuid, quantity: i32) -> AppResult<Cart> {
        check_quantity(quantity)?;
        let mut cart = self.load_existing(user_id).await?;
        let product_id = cart
            .items
            .iter()
            .find(|item| item.id == item_id)
            .map(|item| item.product_id)
            .ok_or_else(|| AppError::NotFound(format!("Cart item {item_id} not found")))?;

        let product = self.purchasable_product(product_id).await?;
        check_stock(&product, quantity)?;

        if let Some(line) = cart.items.iter_mut().find(|item| item.id == item_id) {
            line.quantity = quantity;
            line.price = product.price;
        }
        self.save(cart).await
    }

    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> AppResult<Cart> {
        let mut cart = self.load_existing(user_id).await?;
        let before = cart.items.len();
        cart.items.retain(|item| item.id != item_id);
        if cart.items.len() == before {
            return Err(AppError::NotFound(format!("Cart item {item_id} not found")));
        }
        self.save(cart).await
    }

    pub async fn clear(&self, user_id: Uuid) -> AppResult<Cart> {
        let mut cart = self.load_existing(user_id).await?;
        cart.items.clear();
        self.save(cart).await
    }

    // -------------------------------------------------------------------------
    // READS
    // -------------------------------------------------------------------------

    /// Current cart, reconciled with the catalog.
    ///
    /// Lines whose product is gone, inactive or sold out are dropped without
    /// an error; remaining lines take the current price.
    pub async fn view(&self, user_id: Uuid) -> AppResult<Cart> {
        let stored = self.load_or_create(user_id).await?;
        let mut cart = stored.clone();
        cart.items.clear();

        for mut line in stored.items.iter().cloned() {
            match self.store.get_product(line.product_id).await? {
                Some(product) if product.is_active && !product.is_sold_out() => {
                    line.price = product.price;
                    line.product_name = product.name;
                    cart.items.push(line);
                }
                _ => {
                    tracing::info!(%user_id, product_id = %line.product_id, "Dropping unavailable cart line");
                }
            }
        }

        cart.recompute_total();
        if cart.items != stored.items || cart.total_amount != stored.total_amount {
            self.store.save_cart(&cart).await?;
        }
        Ok(cart)
    }

    /// Dry-run checkout. Never mutates the cart.
    pub async fn validate(&self, user_id: Uuid) -> AppResult<CartValidation> {
        let cart = self.load_existing(user_id).await?;
        let mut issues = Vec::new();
        let mut valid_items = Vec::new();

        for line in &cart.items {
            let product = match self.store.get_product(line.product_id).await? {
                Some(product) if product.is_active => product,
                _ => {
                    issues.push(CartIssue {
                        product_id: line.product_id,
                        kind: CartIssueKind::Unavailable,
                        detail: format!("{} is no longer available", line.product_name),
                        available: None,
                        previous_price: None,
                        current_price: None,
                    });
                    continue;
                }
            };

            if product.available() < line.quantity {
                issues.push(CartIssue {
                    product_id: line.product_id,
                    kind: CartIssueKind::InsufficientStock,
                    detail: format!(
                        "Only {} of {} left, {} requested",
                        product.available(),
                        product.name,
                        line.quantity
                    ),
                    available: Some(product.available()),
                    previous_price: None,
                    current_price: None,
                });
                continue;
            }

            let mut line = line.clone();
            if product.price != line.price {
                issues.push(CartIssue {
                    product_id: line.product_id,
                    kind: CartIssueKind::PriceChanged,
                    detail: format!("Price changed from {} to {}", line.price, product.price),
                    available: None,
                    previous_price: Some(line.price),
                    current_price: Some(product.price),
                });
                line.price = product.price;
            }
            valid_items.push(line);
        }

        let total_amount = round_money(valid_items.iter().map(CartItem::line_total).sum::<Decimal>());
        Ok(CartValidation {
            is_valid: issues.is_empty(),
            issues,
            valid_items,
            total_amount,
        })
    }

    /// Turn the cart into an order and empty it.
    pub async fn checkout(
        &self,
        user_id: Uuid,
        request: CheckoutRequest,
        coordinator: &OrderCoordinator,
    ) -> AppResult<Order> {
        let cart = self.load_existing(user_id).await?;
        if cart.items.is_empty() {
            return Err(AppError::InvalidInput("Cart is empty".to_string()));
        }

        let order = coordinator
            .create_order(
                user_id,
                CreateOrderRequest {
                    items: cart
                        .items
                        .iter()
                        .map(|item| OrderLineRequest {
                            product_id: item.product_id,
                            quantity: item.quantity,
                        })
                        .collect(),
                    shipping_address: request.shipping_address,
                    payment_method: request.payment_method,
                },
            )
            .await?;

        // The order is committed; a failed clear only leaves stale lines
        let mut emptied = cart;
        emptied.items.clear();
        if let Err(err) = self.save(emptied).await {
            tracing::warn!(%user_id, order_id = %order.id, error = %err, "Failed to clear cart after checkout");
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{address, payment, recording, stocked};
    use crate::notify::Notifier;
    use crate::store::MemoryStore;

    fn service(store: &MemoryStore) -> CartService {
        CartService::new(Arc::new(store.clone()))
    }

    fn add(product_id: Uuid, quantity: i32) -> AddCartItemRequest {
        AddCartItemRequest {
            product_id,
            quantity,
        }
    }

    #[tokio::test]
    async fn quantity_must_be_between_one_and_ten() {
        let store = MemoryStore::new();
        let p = stocked(&store, 100, 0, Decimal::TEN);
        let carts = service(&store);
        let user = Uuid::new_v4();

        for quantity in [0, 11, -1] {
            let err = carts.add_item(user, add(p.id, quantity)).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)), "{quantity}");
        }
    }

    #[tokio::test]
    async fn missing_or_inactive_products_are_rejected() {
        let store = MemoryStore::new();
        let p = stocked(&store, 5, 0, Decimal::TEN);
        store.update_product(p.id, |p| p.is_active = false).unwrap();
        let carts = service(&store);
        let user = Uuid::new_v4();

        assert!(matches!(
            carts.add_item(user, add(Uuid::new_v4(), 1)).await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            carts.add_item(user, add(p.id, 1)).await,
            Err(AppError::ProductUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn existing_quantity_counts_against_stock() {
        let store = MemoryStore::new();
        let p = stocked(&store, 5, 0, Decimal::TEN);
        let carts = service(&store);
        let user = Uuid::new_v4();

        carts.add_item(user, add(p.id, 3)).await.unwrap();
        let err = carts.add_item(user, add(p.id, 3)).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientStock { available: 5, requested: 6, .. }
        ));
    }

    #[tokio::test]
    async fn merged_lines_are_capped_at_ten() {
        let store = MemoryStore::new();
        let p = stocked(&store, 100, 0, Decimal::new(250, 2));
        let carts = service(&store);
        let user = Uuid::new_v4();

        carts.add_item(user, add(p.id, 8)).await.unwrap();
        let cart = carts.add_item(user, add(p.id, 5)).await.unwrap();

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 10);
        assert_eq!(cart.total_amount, Decimal::new(2500, 2));
    }

    #[tokio::test]
    async fn view_drops_inactive_and_sold_out_lines_and_reprices() {
        let store = MemoryStore::new();
        let keep = stocked(&store, 10, 0, Decimal::new(100, 0));
        let inactive = stocked(&store, 10, 0, Decimal::ONE);
        let sold_out = stocked(&store, 10, 0, Decimal::ONE);
        let carts = service(&store);
        let user = Uuid::new_v4();
        for id in [keep.id, inactive.id, sold_out.id] {
            carts.add_item(user, add(id, 1)).await.unwrap();
        }

        store.update_product(inactive.id, |p| p.is_active = false).unwrap();
        store.update_product(sold_out.id, |p| p.sold_quantity = 10).unwrap();
        store.update_product(keep.id, |p| p.price = Decimal::new(120, 0)).unwrap();

        let cart = carts.view(user).await.unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].product_id, keep.id);
        assert_eq!(cart.total_amount, Decimal::new(120, 0));
    }

    #[tokio::test]
    async fn validation_reports_price_changes_at_current_price() {
        let store = MemoryStore::new();
        let p = stocked(&store, 10, 0, Decimal::new(100, 0));
        let carts = service(&store);
        let user = Uuid::new_v4();
        carts.add_item(user, add(p.id, 2)).await.unwrap();

        store.update_product(p.id, |p| p.price = Decimal::new(120, 0)).unwrap();
        let report = carts.validate(user).await.unwrap();

        assert!(!report.is_valid);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, CartIssueKind::PriceChanged);
        assert_eq!(report.issues[0].current_price, Some(Decimal::new(120, 0)));
        assert_eq!(report.valid_items[0].price, Decimal::new(120, 0));
        assert_eq!(report.total_amount, Decimal::new(240, 0));

        // Dry run: stored snapshot untouched
        let stored = store.load_cart(user).await.unwrap().unwrap();
        assert_eq!(stored.items[0].price, Decimal::new(100, 0));
    }

    #[tokio::test]
    async fn validation_flags_unavailable_and_short_lines() {
        let store = MemoryStore::new();
        let gone = stocked(&store, 10, 0, Decimal::ONE);
        let short = stocked(&store, 10, 0, Decimal::ONE);
        let carts = service(&store);
        let user = Uuid::new_v4();
        carts.add_item(user, add(gone.id, 1)).await.unwrap();
        carts.add_item(user, add(short.id, 4)).await.unwrap();

        store.update_product(gone.id, |p| p.is_active = false).unwrap();
        store.update_product(short.id, |p| p.sold_quantity = 8).unwrap();

        let report = carts.validate(user).await.unwrap();
        let kinds: Vec<_> = report.issues.iter().map(|issue| issue.kind).collect();
        assert_eq!(
            kinds,
            vec![CartIssueKind::Unavailable, CartIssueKind::InsufficientStock]
        );
        assert_eq!(report.issues[1].available, Some(2));
        assert!(report.valid_items.is_empty());
        assert_eq!(report.total_amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn checkout_charges_current_price_and_clears_cart() {
        let store = MemoryStore::new();
        let p = stocked(&store, 10, 0, Decimal::new(100, 0));
        let carts = service(&store);
        let notifier: Arc<dyn Notifier> = recording();
        let coordinator = OrderCoordinator::new(Arc::new(store.clone()), notifier);
        let user = Uuid::new_v4();
        carts.add_item(user, add(p.id, 2)).await.unwrap();
        store.update_product(p.id, |p| p.price = Decimal::new(120, 0)).unwrap();

        let order = carts
            .checkout(
                user,
                CheckoutRequest {
                    shipping_address: Some(address()),
                    payment_method: Some(payment()),
                },
                &coordinator,
            )
            .await
            .unwrap();

        assert_eq!(order.total_amount, Decimal::new(240, 0));
        assert!(store.load_cart(user).await.unwrap().unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn missing_cart_is_not_found() {
        let store = MemoryStore::new();
        let carts = service(&store);
        assert!(matches!(
            carts.clear(Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            carts.update_item(Uuid::new_v4(), Uuid::new_v4(), 1).await,
            Err(AppError::NotFound(_))
        ));
    }
}
