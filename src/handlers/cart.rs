//! Cart endpoints. Every route acts on the caller's own cart.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::error::{ApiJson, AppResult};
use crate::models::{
    AddCartItemRequest, Cart, CartValidation, CheckoutRequest, Order, UpdateCartItemRequest,
};

/// GET /api/v1/cart
///
/// Unavailable lines are dropped and prices refreshed before returning.
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> AppResult<Json<Cart>> {
    Ok(Json(state.cart.view(user.user_id).await?))
}

/// POST /api/v1/cart/items
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiJson(request): ApiJson<AddCartItemRequest>,
) -> AppResult<(StatusCode, Json<Cart>)> {
    let cart = state.cart.add_item(user.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(cart)))
}

/// PUT /api/v1/cart/items/:id
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(item_id): Path<Uuid>,
    ApiJson(request): ApiJson<UpdateCartItemRequest>,
) -> AppResult<Json<Cart>> {
    let cart = state
        .cart
        .update_item(user.user_id, item_id, request.quantity)
        .await?;
    Ok(Json(cart))
}

/// DELETE /api/v1/cart/items/:id
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(item_id): Path<Uuid>,
) -> AppResult<Json<Cart>> {
    Ok(Json(state.cart.remove_item(user.user_id, item_id).await?))
}

/// DELETE /api/v1/cart
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> AppResult<Json<Cart>> {
    Ok(Json(state.cart.clear(user.user_id).await?))
}

/// POST /api/v1/cart/validate
pub async fn validate_cart(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> AppResult<Json<CartValidation>> {
    Ok(Json(state.cart.validate(user.user_id).await?))
}

/// POST /api/v1/cart/checkout
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiJson(request): ApiJson<CheckoutRequest>,
) -> AppResult<(StatusCode, Json<Order>)> {
    let order = state
        .cart
        .checkout(user.user_id, request, &state.orders)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}
