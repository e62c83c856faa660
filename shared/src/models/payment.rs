//! Payment Model

use serde::{Deserialize, Serialize};

/// Payment attempt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(
    feature = "db",
    sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum PaymentStatus {
    Unpaid,
    Paying,
    Paid,
    Cancelled,
}

/// Supported payment gateways (IPG)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(
    feature = "db",
    sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum GatewayId {
    Zibal,
    ZarinPal,
    AsanPardakht,
}

impl GatewayId {
    pub const ALL: [GatewayId; 3] = [GatewayId::Zibal, GatewayId::ZarinPal, GatewayId::AsanPardakht];

    pub const fn as_str(&self) -> &'static str {
        match self {
            GatewayId::Zibal => "ZIBAL",
            GatewayId::ZarinPal => "ZARIN_PAL",
            GatewayId::AsanPardakht => "ASAN_PARDAKHT",
        }
    }

    pub const fn display_name(&self) -> &'static str {
        match self {
            GatewayId::Zibal => "Zibal",
            GatewayId::ZarinPal => "ZarinPal",
            GatewayId::AsanPardakht => "Asan Pardakht",
        }
    }
}

impl std::fmt::Display for GatewayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a payment pays for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(
    feature = "db",
    sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum PaymentPurpose {
    Order,
    WalletCharge,
}

/// Gateway payment attempt
///
/// At most one `PAYING` row exists per order; `is_used` flips exactly once,
/// when the money of a paid attempt is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Payment {
    pub id: i64,
    pub purpose: PaymentPurpose,
    pub order_id: Option<i64>,
    /// Payer (order customer or wallet owner)
    pub user_id: i64,
    pub amount: i64,
    pub gateway: GatewayId,
    pub track_id: Option<String>,
    pub status: PaymentStatus,
    pub is_used: bool,
    pub track_id_submitted_at: Option<i64>,
    pub paid_amount: Option<i64>,
    pub ref_number: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Transaction status reported by a gateway on verify/inquiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum GatewayStatus {
    /// -1: waiting for payment
    Waiting,
    /// -2: gateway internal error
    InternalError,
    /// 1: paid and verified
    PaidVerified,
    /// 2: paid, not yet verified
    PaidUnverified,
    /// 3: cancelled by the user
    CancelledByUser,
    /// 4..=12 and anything unknown: failed
    Failed(i32),
}

impl GatewayStatus {
    pub fn code(&self) -> i32 {
        match self {
            GatewayStatus::Waiting => -1,
            GatewayStatus::InternalError => -2,
            GatewayStatus::PaidVerified => 1,
            GatewayStatus::PaidUnverified => 2,
            GatewayStatus::CancelledByUser => 3,
            GatewayStatus::Failed(code) => *code,
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, GatewayStatus::PaidVerified | GatewayStatus::PaidUnverified)
    }

    /// Final answer that the money will never arrive
    pub fn is_definitely_unpaid(&self) -> bool {
        matches!(
            self,
            GatewayStatus::CancelledByUser | GatewayStatus::Failed(_)
        )
    }

    pub fn meaning(&self) -> &'static str {
        match self.code() {
            -1 => "Waiting for payment",
            -2 => "Gateway internal error",
            1 => "Paid and verified",
            2 => "Paid and unverified",
            3 => "Cancelled by user",
            4 => "Invalid card number",
            5 => "Insufficient account balance",
            6 => "Wrong PIN",
            7 => "Too many requests",
            8 => "Daily internet payment count exceeded",
            9 => "Daily internet payment amount exceeded",
            10 => "Invalid card issuer",
            11 => "Switch error",
            12 => "Card is not available",
            _ => "Unknown status",
        }
    }
}

impl From<i32> for GatewayStatus {
    fn from(code: i32) -> Self {
        match code {
            -1 => GatewayStatus::Waiting,
            -2 => GatewayStatus::InternalError,
            1 => GatewayStatus::PaidVerified,
            2 => GatewayStatus::PaidUnverified,
            3 => GatewayStatus::CancelledByUser,
            other => GatewayStatus::Failed(other),
        }
    }
}

impl From<GatewayStatus> for i32 {
    fn from(status: GatewayStatus) -> Self {
        status.code()
    }
}
