// =============================================================================
// FLASH SALE SERVICE
// =============================================================================
// Admin CRUD plus the public listing. Every response is built with
// `FlashSaleView::at(sale, now)` so the window state is always fresh; the
// cache only ever holds stored records.
//
// Writes bump a generation counter before dropping the cached listing. A read
// that loaded the listing before a write started drops its own cache entry
// again, so within this process a listing never outlives the write that
// replaced it. Writes made by other replicas are seen after at most
// FLASH_SALE_CACHE_TTL_SECS.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::window::{self, FlashSaleView, SaleStatus};
use crate::auth::CurrentUser;
use crate::cache::FlashSaleCache;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    CreateFlashSaleRequest, FlashSale, FlashSaleProduct, FlashSaleProductInput,
    UpdateFlashSaleRequest,
};
use crate::notify::{self, Notification, Notifier};
use crate::store::Store;

pub struct FlashSaleService {
    store: Arc<dyn Store>,
    cache: FlashSaleCache,
    notifier: Arc<dyn Notifier>,
    generation: WriteGeneration,
}

/// Counts flash sale writes seen by this process.
#[derive(Debug, Default)]
struct WriteGeneration(AtomicU64);

impl WriteGeneration {
    fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn moved_since(&self, seen: u64) -> bool {
        self.current() != seen
    }
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Flash sale {id} not found"))
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::InvalidInput(message.into())
}

fn check_window(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<()> {
    if start >= end {
        return Err(invalid("start_date must be before end_date"));
    }
    Ok(())
}

fn check_entry(entry: &FlashSaleProductInput) -> AppResult<()> {
    let id = entry.product_id;
    if entry.original_price <= Decimal::ZERO || entry.sale_price <= Decimal::ZERO {
        return Err(invalid(format!("Prices for product {id} must be positive")));
    }
    if entry.sale_price >= entry.original_price {
        return Err(invalid(format!(
            "Sale price for product {id} must be below the original price"
        )));
    }
    if entry.stock_quantity < 0 {
        return Err(invalid(format!("Stock for product {id} cannot be negative")));
    }
    if entry.max_quantity_per_user < 1 {
        return Err(invalid(format!(
            "max_quantity_per_user for product {id} must be at least 1"
        )));
    }
    Ok(())
}

impl FlashSaleService {
    pub fn new(store: Arc<dyn Store>, cache: FlashSaleCache, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            cache,
            notifier,
            generation: WriteGeneration::default(),
        }
    }

    // -------------------------------------------------------------------------
    // READS
    // -------------------------------------------------------------------------

    async fn all_sales(&self) -> AppResult<Vec<FlashSale>> {
        if let Some(sales) = self.cache.get_listing().await {
            return Ok(sales);
        }
        let seen = self.generation.current();
        let sales = self.store.list_flash_sales().await?;
        self.cache.put_listing(&sales).await;
        if self.generation.moved_since(seen) {
            self.cache.invalidate().await;
        }
        Ok(sales)
    }

    /// Public listing. Expired sales are never shown; `status` narrows further.
    pub async fn list_public(
        &self,
        now: DateTime<Utc>,
        status: Option<SaleStatus>,
    ) -> AppResult<Vec<FlashSaleView>> {
        let mut views: Vec<FlashSaleView> = self
            .all_sales()
            .await?
            .into_iter()
            .map(|sale| FlashSaleView::at(sale, now))
            .filter(|view| view.status != SaleStatus::Expired)
            .filter(|view| status.map_or(true, |wanted| view.status == wanted))
            .collect();
        views.sort_by_key(|view| view.start_date);
        Ok(views)
    }

    /// Every sale, expired included. Admin only.
    pub async fn list_all(&self, actor: &CurrentUser, now: DateTime<Utc>) -> AppResult<Vec<FlashSaleView>> {
        actor.require_admin()?;
        let mut views: Vec<FlashSaleView> = self
            .all_sales()
            .await?
            .into_iter()
            .map(|sale| FlashSaleView::at(sale, now))
            .collect();
        views.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        Ok(views)
    }

    /// Fetch one sale and count the view.
    pub async fn get(&self, id: Uuid, include_expired: bool, now: DateTime<Utc>) -> AppResult<FlashSaleView> {
        let sale = self.store.get_flash_sale(id).await?.ok_or_else(|| not_found(id))?;
        if !include_expired && window::is_expired(&sale, now) {
            return Err(not_found(id));
        }

        let sale = self.store.record_flash_sale_view(id).await?.unwrap_or(sale);
        metrics::record_flash_sale_view();
        Ok(FlashSaleView::at(sale, now))
    }

    // -------------------------------------------------------------------------
    // ADMIN WRITES
    // -------------------------------------------------------------------------

    /// Validate entries against the catalog and build the stored form.
    /// `sold` carries over units already sold per product on update.
    async fn build_products(
        &self,
        entries: &[FlashSaleProductInput],
        sold: &HashMap<Uuid, i32>,
    ) -> AppResult<Vec<FlashSaleProduct>> {
        if entries.is_empty() {
            return Err(invalid("A flash sale needs at least one product"));
        }

        let mut products = Vec::with_capacity(entries.len());
        for entry in entries {
            check_entry(entry)?;
            if self.store.get_product(entry.product_id).await?.is_none() {
                return Err(invalid(format!(
                    "Product {} does not exist",
                    entry.product_id
                )));
            }
            products.push(FlashSaleProduct {
                product_id: entry.product_id,
                original_price: entry.original_price,
                sale_price: entry.sale_price,
                discount_percentage: window::discount_percentage(
                    entry.original_price,
                    entry.sale_price,
                ),
                stock_quantity: entry.stock_quantity,
                sold_quantity: sold.get(&entry.product_id).copied().unwrap_or(0),
                max_quantity_per_user: entry.max_quantity_per_user,
            });
        }
        Ok(products)
    }

    async fn changed(&self, id: Uuid, change: &'static str) {
        self.generation.bump();
        self.cache.invalidate().await;
        notify::dispatch(
            &self.notifier,
            Notification::FlashSaleChanged {
                flash_sale_id: id,
                change,
            },
        );
    }

    pub async fn create(
        &self,
        actor: &CurrentUser,
        request: CreateFlashSaleRequest,
        now: DateTime<Utc>,
    ) -> AppResult<FlashSaleView> {
        actor.require_admin()?;

        let title = request.title.trim();
        if title.is_empty() {
            return Err(invalid("Title is required"));
        }
        check_window(request.start_date, request.end_date)?;
        if request.start_date < now {
            return Err(invalid("start_date cannot be in the past"));
        }
        let products = self.build_products(&request.products, &HashMap::new()).await?;

        let sale = FlashSale {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: request.description,
            start_date: request.start_date,
            end_date: request.end_date,
            is_active: request.is_active,
            products,
            view_count: 0,
            created_by: actor.user_id,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_flash_sale(&sale).await?;

        tracing::info!(flash_sale_id = %sale.id, title = %sale.title, "Flash sale created");
        self.changed(sale.id, "created").await;
        Ok(FlashSaleView::at(sale, now))
    }

    pub async fn update(
        &self,
        actor: &CurrentUser,
        id: Uuid,
        request: UpdateFlashSaleRequest,
        now: DateTime<Utc>,
    ) -> AppResult<FlashSaleView> {
        actor.require_admin()?;

        let mut sale = self.store.get_flash_sale(id).await?.ok_or_else(|| not_found(id))?;

        if let Some(title) = request.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(invalid("Title cannot be empty"));
            }
            sale.title = title.to_string();
        }
        if let Some(description) = request.description {
            sale.description = Some(description);
        }
        if let Some(start) = request.start_date {
            sale.start_date = start;
        }
        if let Some(end) = request.end_date {
            sale.end_date = end;
        }
        if let Some(is_active) = request.is_active {
            sale.is_active = is_active;
        }
        check_window(sale.start_date, sale.end_date)?;

        if let Some(entries) = request.products {
            let sold: HashMap<Uuid, i32> = sale
                .products
                .iter()
                .map(|p| (p.product_id, p.sold_quantity))
                .collect();
            sale.products = self.build_products(&entries, &sold).await?;
        }
        sale.updated_at = now;

        if !self.store.update_flash_sale(&sale).await? {
            return Err(not_found(id));
        }

        tracing::info!(flash_sale_id = %id, "Flash sale updated");
        self.changed(id, "updated").await;
        Ok(FlashSaleView::at(sale, now))
    }

    /// Delete a sale. A sale that is running right now cannot be removed.
    pub async fn delete(&self, actor: &CurrentUser, id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        actor.require_admin()?;

        let sale = self.store.get_flash_sale(id).await?.ok_or_else(|| not_found(id))?;
        if window::is_currently_active(&sale, now) {
            return Err(AppError::SaleActive(id));
        }
        if !self.store.delete_flash_sale(id).await? {
            return Err(not_found(id));
        }

        tracing::info!(flash_sale_id = %id, "Flash sale deleted");
        self.changed(id, "deleted").await;
        Ok(())
    }
}
