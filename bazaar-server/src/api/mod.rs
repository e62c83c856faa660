//! HTTP API
//!
//! Every body is an [`ApiResponse`]; errors render through
//! [`ServiceError`]'s `IntoResponse`.

pub mod accounts;
pub mod cart;
pub mod health;
pub mod orders;
pub mod payments;
pub mod seller;
pub mod wallet;

use axum::routing::{get, patch, post, put};
use axum::{Router, middleware};
use shared::error::ApiResponse;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::gateway_ip::gateway_allowlist_middleware;
use crate::auth::identity_middleware;
use crate::error::ServiceError;
use crate::state::AppState;

pub type ApiResult<T> = Result<ApiResponse<T>, ServiceError>;

/// In-flight request cap
const MAX_CONCURRENT_REQUESTS: usize = 256;

/// Create the combined router
pub fn create_router(state: AppState) -> Router {
    // Bearer-token routes
    let authenticated = Router::new()
        .route("/api/accounts/provision", post(accounts::provision))
        .route("/api/accounts/addresses", post(accounts::add_address))
        .route("/api/accounts/bank-cards", post(accounts::add_bank_card))
        .route(
            "/api/accounts/{user_id}/seller-status",
            put(accounts::set_seller_status),
        )
        .route("/api/cart", get(cart::get_cart))
        .route("/api/cart/items", post(cart::add_item))
        .route(
            "/api/cart/items/{item_id}",
            put(cart::update_item).delete(cart::remove_item),
        )
        .route("/api/cart/validate", get(cart::validate))
        .route("/api/orders", get(orders::list))
        .route("/api/orders/checkout", post(orders::checkout))
        .route("/api/orders/{id}", get(orders::get))
        .route("/api/orders/{id}/pay", post(orders::pay))
        .route("/api/orders/{id}/cancel", post(orders::cancel))
        .route("/api/seller/orders", get(seller::list_orders))
        .route("/api/seller/orders/{id}", patch(seller::update_order))
        .route("/api/wallet", get(wallet::balance))
        .route("/api/wallet/records", get(wallet::records))
        .route("/api/wallet/charge", post(wallet::charge))
        .route(
            "/api/wallet/withdrawals",
            post(wallet::request_withdrawal).put(wallet::update_withdrawal),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ));

    // Gateway redirect (source IP checked)
    let callback = Router::new()
        .route("/api/payments/callback", get(payments::callback))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gateway_allowlist_middleware,
        ));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/payments/gateways", get(payments::list_gateways))
        .merge(authenticated)
        .merge(callback)
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
