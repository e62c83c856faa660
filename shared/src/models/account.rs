//! Account Model

use serde::{Deserialize, Serialize};

/// Role carried by an authenticated identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(type_name = "text", rename_all = "lowercase"))]
pub enum UserRole {
    Customer,
    Seller,
    Admin,
}

/// Provisioned account (identity itself lives in the auth service)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Account {
    pub user_id: i64,
    pub role: UserRole,
    pub created_at: i64,
}

/// Seller profile
///
/// Sellers start inactive; only active sellers can receive orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct SellerProfile {
    pub user_id: i64,
    pub is_active: bool,
    /// Minimum order total; `None` falls back to the platform default
    pub minimum_order_amount: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct CustomerAddress {
    pub id: i64,
    pub user_id: i64,
    pub address: String,
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct BankCard {
    pub id: i64,
    pub user_id: i64,
    pub card_number: String,
}
