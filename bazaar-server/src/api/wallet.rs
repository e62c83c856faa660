//! Wallet endpoints

use axum::extract::{Query, State};
use axum::{Extension, Json};
use shared::error::ApiResponse;
use shared::models::{FinancialRecord, WithdrawalRequest};
use shared::request::{
    PaginationQuery, WalletChargeRequest, WithdrawalCreateRequest, WithdrawalUpdateRequest,
};
use shared::response::{PaymentSelection, WalletBalance};

use super::ApiResult;
use crate::auth::Identity;
use crate::payments::PaymentTarget;
use crate::state::AppState;

/// GET /api/wallet
pub async fn balance(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<WalletBalance> {
    Ok(ApiResponse::success(
        state.wallet.balance(identity.user_id).await?,
    ))
}

/// GET /api/wallet/records
pub async fn records(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(page): Query<PaginationQuery>,
) -> ApiResult<Vec<FinancialRecord>> {
    let records = state.wallet.list_records(identity.user_id, &page).await?;
    Ok(ApiResponse::success(records))
}

/// POST /api/wallet/charge
pub async fn charge(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<WalletChargeRequest>,
) -> ApiResult<PaymentSelection> {
    let checkout = state
        .payments
        .initiate_gateway_payment(
            identity.user_id,
            PaymentTarget::WalletCharge { amount: req.amount },
            req.gateway_id,
        )
        .await?;
    Ok(ApiResponse::success(PaymentSelection::Gateway {
        payment_link: checkout.payment_link,
        amount: checkout.amount,
        gateway_id: checkout.gateway_id,
    }))
}

/// POST /api/wallet/withdrawals
pub async fn request_withdrawal(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<WithdrawalCreateRequest>,
) -> ApiResult<WithdrawalRequest> {
    let request = state
        .wallet
        .request_withdrawal(identity.user_id, req.bank_card_id, req.amount)
        .await?;
    Ok(ApiResponse::success(request))
}

/// PUT /api/wallet/withdrawals
pub async fn update_withdrawal(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<WithdrawalUpdateRequest>,
) -> ApiResult<WithdrawalRequest> {
    let request = state
        .wallet
        .update_withdrawal_request(identity.user_id, req.amount)
        .await?;
    Ok(ApiResponse::success(request))
}
