//! Seller order endpoints

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use shared::error::ApiResponse;
use shared::models::{Order, UserRole};
use shared::request::{PaginationQuery, SellerOrderUpdate};

use super::ApiResult;
use crate::auth::Identity;
use crate::state::AppState;

/// GET /api/seller/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(page): Query<PaginationQuery>,
) -> ApiResult<Vec<Order>> {
    identity.require(UserRole::Seller)?;
    let orders = state
        .orders
        .list_seller_orders(identity.user_id, &page)
        .await?;
    Ok(ApiResponse::success(orders))
}

/// PATCH /api/seller/orders/{id}
pub async fn update_order(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(req): Json<SellerOrderUpdate>,
) -> ApiResult<Order> {
    identity.require(UserRole::Seller)?;
    let order = state
        .orders
        .seller_update(identity.user_id, id, &req)
        .await?;
    Ok(ApiResponse::success(order))
}
