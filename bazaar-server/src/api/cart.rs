//! Cart endpoints

use axum::extract::{Path, State};
use axum::{Extension, Json};
use shared::error::ApiResponse;
use shared::models::{CartItem, CartView};
use shared::request::{AddCartItemRequest, UpdateCartItemRequest};
use shared::response::CartValidationReport;

use super::ApiResult;
use crate::auth::Identity;
use crate::state::AppState;

/// GET /api/cart
pub async fn get_cart(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<CartView> {
    Ok(ApiResponse::success(
        state.carts.get_cart(identity.user_id).await?,
    ))
}

/// POST /api/cart/items
pub async fn add_item(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<AddCartItemRequest>,
) -> ApiResult<CartItem> {
    let item = state
        .carts
        .add_item(identity.user_id, req.variant_id, req.quantity)
        .await?;
    Ok(ApiResponse::success(item))
}

/// PUT /api/cart/items/{item_id}
pub async fn update_item(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(item_id): Path<i64>,
    Json(req): Json<UpdateCartItemRequest>,
) -> ApiResult<CartItem> {
    let item = state
        .carts
        .set_item_quantity(identity.user_id, item_id, req.quantity)
        .await?;
    Ok(ApiResponse::success(item))
}

/// DELETE /api/cart/items/{item_id}
pub async fn remove_item(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(item_id): Path<i64>,
) -> ApiResult<()> {
    state.carts.remove_item(identity.user_id, item_id).await?;
    Ok(ApiResponse::ok())
}

/// GET /api/cart/validate
pub async fn validate(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<CartValidationReport> {
    let report = state
        .carts
        .validate_cart_for_checkout(identity.user_id)
        .await?;
    Ok(ApiResponse::success(report))
}
