//! Wallet and financial ledger models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Financial record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(
    feature = "db",
    sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    OrderRevenue,
    DirectPayment,
    WalletPayment,
    WalletRefund,
    DirectRefund,
    Cancellation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    /// Never negative
    pub balance: i64,
    pub updated_at: i64,
}

/// Append-only ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct FinancialRecord {
    pub id: i64,
    pub record_type: TransactionType,
    pub amount: i64,
    pub wallet_id: Option<i64>,
    pub order_id: Option<i64>,
    pub payment_id: Option<i64>,
    pub commission_rate: Option<Decimal>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(
    feature = "db",
    sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum WithdrawalStatus {
    Pending,
    Paid,
    Refused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct WithdrawalRequest {
    pub id: i64,
    pub user_id: i64,
    pub bank_card_id: i64,
    pub amount: i64,
    pub status: WithdrawalStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Manual transfer support has to pay out (refunds of gateway payments)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct MoneyTransferRequest {
    pub id: i64,
    /// User the money goes to
    pub requested_by: i64,
    pub order_id: Option<i64>,
    pub amount: i64,
    pub is_verified: bool,
    pub is_paid: bool,
    pub tracking_code: Option<String>,
    pub created_at: i64,
}
