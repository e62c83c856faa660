//! Deferred task worker
//!
//! Polls `deferred_tasks` for due rows, leases a batch, and runs each task
//! through a [`TaskRunner`]. Outcomes:
//!
//! - `Done`: the row is closed
//! - `RecheckAt(t)`: the row runs again at `t`; no attempt is counted
//! - transient error: retried with exponential backoff, up to
//!   [`MAX_TASK_ATTEMPTS`], then dead-lettered
//! - permanent error: dead-lettered at once
//!
//! Dead tasks are logged with `alert = true` for an operator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shared::util::now_millis;
use tokio_util::sync::CancellationToken;

use super::{DeferredTask, TaskOutcome, TaskPayload};
use crate::error::{ServiceError, ServiceResult};
use crate::orders::OrderLifecycle;
use crate::payments::PaymentCoordinator;
use crate::store::Store;

pub const MAX_TASK_ATTEMPTS: i32 = 6;
const RETRY_BASE_DELAY_SECS: i64 = 15;
const RETRY_MAX_DELAY_SECS: i64 = 600;
const CLAIM_BATCH_SIZE: i64 = 32;
/// A claimed task is invisible to other workers for this long
const LEASE_SECS: i64 = 300;

#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, payload: &TaskPayload) -> ServiceResult<TaskOutcome>;
}

/// Dispatches commerce timers to their handlers
pub struct CommerceTaskRunner {
    orders: OrderLifecycle,
    payments: PaymentCoordinator,
}

impl CommerceTaskRunner {
    pub fn new(orders: OrderLifecycle, payments: PaymentCoordinator) -> Self {
        Self { orders, payments }
    }
}

#[async_trait]
impl TaskRunner for CommerceTaskRunner {
    async fn run(&self, payload: &TaskPayload) -> ServiceResult<TaskOutcome> {
        match payload {
            TaskPayload::AutoCancelOrder { order_id } => self.orders.auto_cancel(*order_id).await,
            TaskPayload::ConfirmDelivery { order_id } => {
                self.orders.confirm_delivery(*order_id).await
            }
            TaskPayload::VerifyPayment {
                payment_id,
                track_id,
            } => self.payments.poll_and_reconcile(*payment_id, track_id).await,
        }
    }
}

/// Exponential backoff: base * 2^(attempts - 1), capped
fn retry_delay_millis(attempts: i32) -> i64 {
    let exp = attempts.saturating_sub(1).clamp(0, 16) as u32;
    RETRY_BASE_DELAY_SECS
        .saturating_mul(2_i64.pow(exp))
        .min(RETRY_MAX_DELAY_SECS)
        * 1000
}

pub struct TaskWorker {
    store: Arc<dyn Store>,
    runner: Arc<dyn TaskRunner>,
    poll_interval: Duration,
}

impl TaskWorker {
    pub fn new(store: Arc<dyn Store>, runner: Arc<dyn TaskRunner>, poll_interval: Duration) -> Self {
        Self {
            store,
            runner,
            poll_interval,
        }
    }

    /// Poll until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Task worker started"
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Task worker stopping");
                    break;
                }
                _ = interval.tick() => {
                    // Drain full batches before sleeping again
                    loop {
                        match self.process_due().await {
                            Ok(n) if n as i64 >= CLAIM_BATCH_SIZE && !shutdown.is_cancelled() => continue,
                            Ok(_) => break,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to claim due tasks");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    pub async fn process_due(&self) -> ServiceResult<usize> {
        self.process_due_at(now_millis()).await
    }

    /// Run every task due at `now`; returns how many were claimed
    pub async fn process_due_at(&self, now: i64) -> ServiceResult<usize> {
        let claimed = {
            let mut tx = self.store.begin().await?;
            let tasks = tx
                .claim_due_tasks(now, now + LEASE_SECS * 1000, CLAIM_BATCH_SIZE)
                .await?;
            tx.commit().await?;
            tasks
        };
        if claimed.is_empty() {
            return Ok(0);
        }
        tracing::debug!(count = claimed.len(), "Claimed due tasks");

        for task in &claimed {
            let result = self.runner.run(&task.payload).await;
            if let Err(e) = self.record(task, result, now).await {
                // The lease expires and the task is picked up again
                tracing::error!(task_id = task.id, error = %e, "Failed to record task outcome");
            }
        }
        Ok(claimed.len())
    }

    async fn record(
        &self,
        task: &DeferredTask,
        result: ServiceResult<TaskOutcome>,
        now: i64,
    ) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        match result {
            Ok(TaskOutcome::Done) => {
                tx.complete_task(task.id, now).await?;
                tracing::debug!(task_id = task.id, kind = task.payload.kind(), "Task done");
            }
            Ok(TaskOutcome::RecheckAt(run_at)) => {
                tx.reschedule_task(task.id, run_at, task.attempts, None, now)
                    .await?;
                tracing::debug!(task_id = task.id, kind = task.payload.kind(), run_at, "Task rechecks later");
            }
            Err(e) => self.record_failure(tx.as_mut(), task, &e, now).await?,
        }
        tx.commit().await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        tx: &mut dyn crate::store::StoreTx,
        task: &DeferredTask,
        error: &ServiceError,
        now: i64,
    ) -> ServiceResult<()> {
        let attempts = task.attempts + 1;
        let message = error.to_string();

        if error.is_transient() && attempts < MAX_TASK_ATTEMPTS {
            let run_at = now + retry_delay_millis(attempts);
            tracing::warn!(
                task_id = task.id,
                kind = task.payload.kind(),
                attempts,
                run_at,
                error = %message,
                "Task failed, will retry"
            );
            tx.reschedule_task(task.id, run_at, attempts, Some(&message), now)
                .await?;
        } else {
            tracing::error!(
                alert = true,
                task_id = task.id,
                kind = task.payload.kind(),
                key = %task.idempotency_key,
                attempts,
                error = %message,
                "Task dead-lettered"
            );
            tx.dead_letter_task(task.id, attempts, &message, now).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::gateway::GatewayError;
    use crate::store::MemoryStore;
    use crate::tasks::TaskStatus;
    use shared::error::{AppError, ErrorCode};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedRunner {
        script: Mutex<VecDeque<ServiceResult<TaskOutcome>>>,
        calls: Mutex<Vec<TaskPayload>>,
    }

    impl ScriptedRunner {
        fn push(&self, result: ServiceResult<TaskOutcome>) {
            self.script.lock().unwrap().push_back(result);
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TaskRunner for ScriptedRunner {
        async fn run(&self, payload: &TaskPayload) -> ServiceResult<TaskOutcome> {
            self.calls.lock().unwrap().push(payload.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(TaskOutcome::Done))
        }
    }

    async fn setup() -> (MemoryStore, Arc<ScriptedRunner>, TaskWorker) {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.schedule_task(&TaskPayload::AutoCancelOrder { order_id: 1 }.at(1_000))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let runner = Arc::new(ScriptedRunner::default());
        let worker = TaskWorker::new(
            Arc::new(store.clone()),
            runner.clone(),
            Duration::from_secs(1),
        );
        (store, runner, worker)
    }

    #[test]
    fn test_retry_delay_backoff() {
        assert_eq!(retry_delay_millis(1), 15_000);
        assert_eq!(retry_delay_millis(2), 30_000);
        assert_eq!(retry_delay_millis(5), 240_000);
        assert_eq!(retry_delay_millis(9), 600_000);
    }

    #[tokio::test]
    async fn test_not_due_task_is_left_alone() {
        let (_, runner, worker) = setup().await;
        assert_eq!(worker.process_due_at(999).await.unwrap(), 0);
        assert_eq!(runner.calls(), 0);
    }

    #[tokio::test]
    async fn test_done_closes_task() {
        let (store, runner, worker) = setup().await;
        assert_eq!(worker.process_due_at(1_000).await.unwrap(), 1);
        assert_eq!(runner.calls(), 1);
        assert_eq!(store.tasks().await[0].status, TaskStatus::Done);
        assert_eq!(worker.process_due_at(1_000_000).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recheck_does_not_count_attempt() {
        let (store, runner, worker) = setup().await;
        runner.push(Ok(TaskOutcome::RecheckAt(50_000)));
        worker.process_due_at(1_000).await.unwrap();

        let task = &store.tasks().await[0];
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.run_at, 50_000);
        assert_eq!(task.attempts, 0);

        assert_eq!(worker.process_due_at(49_999).await.unwrap(), 0);
        assert_eq!(worker.process_due_at(50_000).await.unwrap(), 1);
        assert_eq!(store.tasks().await[0].status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_into_dead_letter() {
        let (store, runner, worker) = setup().await;
        for _ in 0..MAX_TASK_ATTEMPTS {
            runner.push(Err(GatewayError::Timeout.into()));
        }

        let mut now = 1_000;
        for attempt in 1..=MAX_TASK_ATTEMPTS {
            assert_eq!(worker.process_due_at(now).await.unwrap(), 1);
            let task = store.tasks().await[0].clone();
            assert_eq!(task.attempts, attempt);
            if attempt < MAX_TASK_ATTEMPTS {
                assert_eq!(task.status, TaskStatus::Pending);
                assert_eq!(task.run_at, now + retry_delay_millis(attempt));
                now = task.run_at;
            } else {
                assert_eq!(task.status, TaskStatus::Dead);
                assert!(task.last_error.unwrap().contains("timed out"));
            }
        }
        assert_eq!(runner.calls(), MAX_TASK_ATTEMPTS as usize);
        assert_eq!(worker.process_due_at(i64::MAX / 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters_at_once() {
        let (store, runner, worker) = setup().await;
        runner.push(Err(AppError::new(ErrorCode::PaymentAmountMismatch).into()));
        worker.process_due_at(1_000).await.unwrap();

        let task = &store.tasks().await[0];
        assert_eq!(task.status, TaskStatus::Dead);
        assert_eq!(task.attempts, 1);
    }
}
