//! Customer order endpoints

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use shared::error::ApiResponse;
use shared::models::{Order, OrderDetail};
use shared::request::{CheckoutRequest, PaginationQuery, PayOrderRequest};
use shared::response::PaymentSelection;

use super::ApiResult;
use crate::auth::Identity;
use crate::state::AppState;

/// POST /api/orders/checkout
pub async fn checkout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<OrderDetail> {
    let order = state.orders.checkout(identity.user_id, &req).await?;
    Ok(ApiResponse::success(order))
}

/// GET /api/orders
pub async fn list(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(page): Query<PaginationQuery>,
) -> ApiResult<Vec<Order>> {
    let orders = state
        .orders
        .list_customer_orders(identity.user_id, &page)
        .await?;
    Ok(ApiResponse::success(orders))
}

/// GET /api/orders/{id}
pub async fn get(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> ApiResult<OrderDetail> {
    let order = state
        .orders
        .get_order(identity.user_id, identity.role, id)
        .await?;
    Ok(ApiResponse::success(order))
}

/// POST /api/orders/{id}/pay
pub async fn pay(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(req): Json<PayOrderRequest>,
) -> ApiResult<PaymentSelection> {
    let selection = state
        .payments
        .select_payment(identity.user_id, id, &req)
        .await?;
    Ok(ApiResponse::success(selection))
}

/// POST /api/orders/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> ApiResult<Order> {
    let order = state.orders.customer_cancel(identity.user_id, id).await?;
    Ok(ApiResponse::success(order))
}
