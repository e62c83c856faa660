//! Account provisioning endpoints

use axum::extract::{Path, State};
use axum::{Extension, Json};
use shared::error::ApiResponse;
use shared::models::{Account, BankCard, CustomerAddress, SellerProfile, UserRole};
use shared::request::{
    AddressCreateRequest, BankCardCreateRequest, ProvisionAccountRequest, SellerStatusUpdate,
};

use super::ApiResult;
use crate::auth::Identity;
use crate::state::AppState;

/// POST /api/accounts/provision
pub async fn provision(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ProvisionAccountRequest>,
) -> ApiResult<Account> {
    identity.require(UserRole::Admin)?;
    let account = state.accounts.provision_account(req.user_id, req.role).await?;
    Ok(ApiResponse::success(account))
}

/// PUT /api/accounts/{user_id}/seller-status
pub async fn set_seller_status(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(user_id): Path<i64>,
    Json(req): Json<SellerStatusUpdate>,
) -> ApiResult<SellerProfile> {
    identity.require(UserRole::Admin)?;
    let profile = state.accounts.set_seller_active(user_id, req.is_active).await?;
    Ok(ApiResponse::success(profile))
}

/// POST /api/accounts/addresses
pub async fn add_address(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<AddressCreateRequest>,
) -> ApiResult<CustomerAddress> {
    let address = state
        .accounts
        .add_address(identity.user_id, &req.address, req.postal_code.as_deref())
        .await?;
    Ok(ApiResponse::success(address))
}

/// POST /api/accounts/bank-cards
pub async fn add_bank_card(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<BankCardCreateRequest>,
) -> ApiResult<BankCard> {
    let card = state
        .accounts
        .add_bank_card(identity.user_id, &req.card_number)
        .await?;
    Ok(ApiResponse::success(card))
}
