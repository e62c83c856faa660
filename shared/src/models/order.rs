//! Order Model
//!
//! # State machine
//!
//! ```text
//! ON_HOLD ──► UNPAID ◄──► PAYING
//!    │          │            │
//!    └──────────┴─► PAID ◄───┘
//!                    │
//!                    ├─► PROCESSING ─► SHIPPED ─► DELIVERED ─► COMPLETED
//!                    └──────────────► SHIPPED
//!
//! ON_HOLD / UNPAID / PAYING / PAID / PROCESSING ─► CANCELLED
//! ```
//!
//! `COMPLETED`, `CANCELLED` and `REFUNDED` are terminal.

use crate::error::{AppError, AppResult, ErrorCode};
use serde::{Deserialize, Serialize};

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(
    feature = "db",
    sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum OrderStatus {
    /// Created while every payment gateway was down
    OnHold,
    Unpaid,
    /// A gateway payment attempt is in flight
    Paying,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Targets a seller may request
    pub const SELLER_TARGETS: [OrderStatus; 3] = [
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Cancelled,
    ];

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// The order still waits for money
    pub const fn is_awaiting_payment(self) -> bool {
        matches!(
            self,
            OrderStatus::OnHold | OrderStatus::Unpaid | OrderStatus::Paying
        )
    }

    pub fn is_seller_target(self) -> bool {
        Self::SELLER_TARGETS.contains(&self)
    }

    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (OnHold, Unpaid | Paid | Cancelled)
                | (Unpaid, Paying | Paid | Cancelled)
                | (Paying, Unpaid | Paid | Cancelled)
                | (Paid, Processing | Shipped | Cancelled)
                | (Processing, Shipped | Cancelled)
                | (Shipped, Delivered)
                | (Delivered, Completed)
        )
    }

    /// Check a transition, producing the client-facing error when illegal
    pub fn ensure_transition(self, next: OrderStatus) -> AppResult<()> {
        if self.is_terminal() {
            return Err(AppError::new(ErrorCode::OrderFinished)
                .with_detail("status", self.as_str()));
        }
        if !self.can_transition_to(next) {
            return Err(AppError::conflict(format!(
                "Order cannot move from {} to {}",
                self.as_str(),
                next.as_str()
            ))
            .with_detail("from", self.as_str())
            .with_detail("to", next.as_str()));
        }
        Ok(())
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::OnHold => "ON_HOLD",
            OrderStatus::Unpaid => "UNPAID",
            OrderStatus::Paying => "PAYING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }
}

/// Who cancelled an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(
    feature = "db",
    sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum CancelledBy {
    Customer,
    Seller,
    Server,
}

/// How an order was paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(
    feature = "db",
    sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum PaymentMethod {
    Wallet,
    Gateway,
}

/// Order entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub seller_id: i64,
    pub customer_address_id: i64,
    pub status: OrderStatus,
    /// Frozen at creation, equals the sum of the item line totals
    pub total_price: i64,
    pub payment_method: Option<PaymentMethod>,
    pub customer_notes: Option<String>,
    pub tracking_code: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub created_at: i64,
    pub updated_at: i64,
    pub paid_at: Option<i64>,
    pub shipped_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Order item (immutable once created)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub variant_id: i64,
    /// Unit price at the time the order was created
    pub submitted_price: i64,
    pub quantity: i32,
}

impl OrderItem {
    pub fn line_total(&self) -> i64 {
        self.submitted_price * i64::from(self.quantity)
    }
}

/// Order with its items
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

impl OrderDetail {
    /// Σ(submitted_price × quantity)
    pub fn total_price(&self) -> i64 {
        self.items.iter().map(OrderItem::line_total).sum()
    }
}
