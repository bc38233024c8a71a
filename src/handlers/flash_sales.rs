// =============================================================================
// FLASH SALE ENDPOINTS
// =============================================================================
// Public reads need no identity. `now` is taken once per request so every
// sale in a response is judged against the same instant.
// =============================================================================

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::error::{ApiJson, AppError, AppResult};
use crate::flash_sales::{FlashSaleView, SaleStatus};
use crate::models::{CreateFlashSaleRequest, UpdateFlashSaleRequest};

#[derive(Debug, Deserialize)]
pub struct ListFlashSalesQuery {
    /// active | scheduled | inactive
    pub status: Option<String>,
}

/// GET /api/v1/flash-sales
pub async fn list_flash_sales(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListFlashSalesQuery>,
) -> AppResult<Json<Vec<FlashSaleView>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<SaleStatus>)
        .transpose()
        .map_err(AppError::InvalidInput)?;

    Ok(Json(state.flash_sales.list_public(Utc::now(), status).await?))
}

/// GET /api/v1/flash-sales/:id
///
/// Counts a view. Expired sales are hidden from everyone but admins.
pub async fn get_flash_sale(
    State(state): State<Arc<AppState>>,
    user: Option<CurrentUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<FlashSaleView>> {
    let include_expired = user.as_ref().is_some_and(CurrentUser::is_admin);
    let view = state
        .flash_sales
        .get(id, include_expired, Utc::now())
        .await?;
    Ok(Json(view))
}

/// GET /api/v1/admin/flash-sales
pub async fn list_all_flash_sales(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> AppResult<Json<Vec<FlashSaleView>>> {
    Ok(Json(state.flash_sales.list_all(&user, Utc::now()).await?))
}

/// POST /api/v1/flash-sales
pub async fn create_flash_sale(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiJson(request): ApiJson<CreateFlashSaleRequest>,
) -> AppResult<(StatusCode, Json<FlashSaleView>)> {
    let view = state
        .flash_sales
        .create(&user, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// PUT /api/v1/flash-sales/:id
pub async fn update_flash_sale(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(request): ApiJson<UpdateFlashSaleRequest>,
) -> AppResult<Json<FlashSaleView>> {
    let view = state
        .flash_sales
        .update(&user, id, request, Utc::now())
        .await?;
    Ok(Json(view))
}

/// DELETE /api/v1/flash-sales/:id
pub async fn delete_flash_sale(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.flash_sales.delete(&user, id, Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}
