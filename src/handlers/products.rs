//! Read-only catalog endpoints. Stock is only ever changed by the ledger.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::error::{AppError, AppResult};
use crate::models::Product;
use crate::store::ProductFilter;

/// Query parameters for GET /api/v1/products
#[derive(Debug, Default, Deserialize)]
pub struct ListProductsQuery {
    pub search: Option<String>,
    pub merchant_id: Option<Uuid>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,

    /// Honored for admins only
    #[serde(default)]
    pub include_inactive: bool,

    #[serde(default = "default_limit")]
    pub limit: i64,

    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

fn is_admin(user: &Option<CurrentUser>) -> bool {
    user.as_ref().is_some_and(CurrentUser::is_admin)
}

/// GET /api/v1/products
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    user: Option<CurrentUser>,
    Query(query): Query<ListProductsQuery>,
) -> AppResult<Json<Vec<Product>>> {
    if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
        if min > max {
            return Err(AppError::InvalidInput(
                "min_price cannot exceed max_price".to_string(),
            ));
        }
    }

    let mut filter = ProductFilter::new()
        .price_between(query.min_price, query.max_price)
        .include_inactive(query.include_inactive && is_admin(&user))
        .page(query.limit, query.offset);
    if let Some(term) = query.search {
        filter = filter.search(term);
    }
    if let Some(merchant_id) = query.merchant_id {
        filter = filter.merchant(merchant_id);
    }

    Ok(Json(state.store.list_products(&filter).await?))
}

/// GET /api/v1/products/:id
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    user: Option<CurrentUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    match state.store.get_product(id).await? {
        Some(product) if product.is_active || is_admin(&user) => Ok(Json(product)),
        _ => Err(AppError::NotFound(format!("Product {id} not found"))),
    }
}
