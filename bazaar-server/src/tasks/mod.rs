//! Durable deferred tasks
//!
//! Timers (order auto-cancel, delivery confirmation, payment verification)
//! are rows in `deferred_tasks`, not in-memory sleeps, so they survive
//! restarts. Each task carries an idempotency key: scheduling the same key
//! twice is a no-op, and every handler is safe to run more than once.

pub mod background;
pub mod worker;

pub use background::{BackgroundTasks, TaskKind};
pub use worker::{CommerceTaskRunner, TaskRunner, TaskWorker};

use serde::{Deserialize, Serialize};

/// What a deferred task does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPayload {
    /// Cancel the order if it is still unpaid
    #[serde(rename_all = "camelCase")]
    AutoCancelOrder { order_id: i64 },
    /// Move a shipped order to delivered and completed, crediting the seller
    #[serde(rename_all = "camelCase")]
    ConfirmDelivery { order_id: i64 },
    /// Poll the gateway for an attempt the callback never settled
    #[serde(rename_all = "camelCase")]
    VerifyPayment { payment_id: i64, track_id: String },
}

impl TaskPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskPayload::AutoCancelOrder { .. } => "AUTO_CANCEL_ORDER",
            TaskPayload::ConfirmDelivery { .. } => "CONFIRM_DELIVERY",
            TaskPayload::VerifyPayment { .. } => "VERIFY_PAYMENT",
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            TaskPayload::AutoCancelOrder { order_id } => format!("order:{order_id}:auto-cancel"),
            TaskPayload::ConfirmDelivery { order_id } => {
                format!("order:{order_id}:confirm-delivery")
            }
            TaskPayload::VerifyPayment {
                payment_id,
                track_id,
            } => format!("payment:{payment_id}:track:{track_id}:verify"),
        }
    }

    /// Build the row that schedules this task at `run_at`
    pub fn at(self, run_at: i64) -> NewTask {
        NewTask {
            idempotency_key: self.idempotency_key(),
            payload: self,
            run_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[derive(sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Done,
    /// Retries exhausted or permanently failed; needs an operator
    Dead,
}

/// A scheduled task row
#[derive(Debug, Clone)]
pub struct DeferredTask {
    pub id: i64,
    pub payload: TaskPayload,
    pub idempotency_key: String,
    pub run_at: i64,
    pub attempts: i32,
    pub status: TaskStatus,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A task to schedule
#[derive(Debug, Clone)]
pub struct NewTask {
    pub payload: TaskPayload,
    pub idempotency_key: String,
    pub run_at: i64,
}

/// How a handler left its task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    /// Not decidable yet; run again at the given time without counting an attempt
    RecheckAt(i64),
}
