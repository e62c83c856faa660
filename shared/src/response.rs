//! Response payloads of the HTTP API
//!
//! Wrapped in [`crate::error::ApiResponse`] on the wire.

use crate::error::ErrorCode;
use crate::models::{FinancialRecord, GatewayId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of choosing how to pay an order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentSelection {
    /// Paid synchronously from the wallet
    Wallet { record: FinancialRecord },
    /// Customer must follow the link to the gateway
    #[serde(rename_all = "camelCase")]
    Gateway {
        payment_link: String,
        amount: i64,
        gateway_id: GatewayId,
    },
}

/// Cart items that fail checkout validation, keyed by cart item id
pub type CartValidationReport = BTreeMap<i64, Vec<ErrorCode>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletBalance {
    pub wallet_id: i64,
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInfo {
    pub id: GatewayId,
    pub name: String,
}
