// =============================================================================
// ORDER ENDPOINTS
// =============================================================================
// Customers see and act on their own orders; admins on all of them. An order
// that belongs to somebody else is a 404, never a 403.
// =============================================================================

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::error::{ApiJson, AppError, AppResult};
use crate::models::{CreateOrderRequest, Order, OrderStatus, UpdateStatusRequest};
use crate::store::OrderFilter;

/// Query parameters for GET /api/v1/orders
#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,

    /// Admins only; ignored for everyone else
    pub user_id: Option<Uuid>,

    #[serde(default = "default_limit")]
    pub limit: i64,

    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<ListOrdersQuery>,
) -> AppResult<Json<Vec<Order>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(|err| AppError::InvalidInput(err.to_string()))?;

    let filter = OrderFilter {
        user_id: query.user_id,
        ..OrderFilter::default()
    }
    .status(status)
    .page(query.limit, query.offset);

    Ok(Json(state.lifecycle.list_orders(&user, filter).await?))
}

/// POST /api/v1/orders
///
/// # Response
/// - 201 Created: stock reserved and order committed
/// - 400 Bad Request: invalid body, or a line could not be reserved (nothing
///   is reserved in that case)
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiJson(request): ApiJson<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<Order>)> {
    let order = state.orders.create_order(user.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.lifecycle.get_order(&user, id).await?))
}

/// PUT /api/v1/orders/:id/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(request): ApiJson<UpdateStatusRequest>,
) -> AppResult<Json<Order>> {
    let order = state
        .lifecycle
        .update_status(&user, id, request.status.trim())
        .await?;
    Ok(Json(order))
}

/// PUT /api/v1/orders/:id/cancel
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.lifecycle.cancel(&user, id).await?))
}
