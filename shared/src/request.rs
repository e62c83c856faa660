//! Request types for the HTTP API

use crate::models::{GatewayId, OrderStatus, PaymentMethod, UserRole};
use serde::{Deserialize, Serialize};

/// Pagination query parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationQuery {
    /// Page number (1-based, default: 1)
    #[serde(default = "default_page")]
    pub page: u32,

    /// Items per page (default: 20, max: 100)
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

impl PaginationQuery {
    /// Get the offset for database queries
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit())
    }

    /// Get the limit (clamped to 1..=100)
    pub fn limit(&self) -> u32 {
        self.per_page.clamp(1, 100)
    }
}

/// `POST /api/accounts/provision`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionAccountRequest {
    pub user_id: i64,
    pub role: UserRole,
}

/// `POST /api/accounts/addresses`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressCreateRequest {
    pub address: String,
    #[serde(default)]
    pub postal_code: Option<String>,
}

/// `POST /api/accounts/bank-cards`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankCardCreateRequest {
    pub card_number: String,
}

/// `PUT /api/accounts/{userId}/seller-status`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerStatusUpdate {
    pub is_active: bool,
}

/// `POST /api/cart/items`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCartItemRequest {
    pub variant_id: i64,
    pub quantity: i32,
}

/// `PUT /api/cart/items/{itemId}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
}

/// `POST /api/orders/checkout`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub customer_address_id: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

/// `POST /api/orders/{id}/pay`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayOrderRequest {
    pub method: PaymentMethod,
    #[serde(default)]
    pub gateway_id: Option<GatewayId>,
}

/// `PATCH /api/seller/orders/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerOrderUpdate {
    pub status: OrderStatus,
    #[serde(default)]
    pub tracking_code: Option<String>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
}

/// `POST /api/wallet/charge`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletChargeRequest {
    pub amount: i64,
    pub gateway_id: GatewayId,
}

/// `POST /api/wallet/withdrawals`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalCreateRequest {
    pub bank_card_id: i64,
    pub amount: i64,
}

/// `PUT /api/wallet/withdrawals`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalUpdateRequest {
    pub amount: i64,
}

/// Query string a gateway sends to the callback endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCallbackQuery {
    /// 1 on success, 0 otherwise
    pub success: u8,
    pub track_id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub status: i32,
}
