//! Payment coordinator
//!
//! Drives gateway payments for orders and wallet charges:
//!
//! 1. `initiate_gateway_payment`: check, call the gateway with no locks
//!    held, then register the attempt (payment PAYING, order PAYING) and
//!    schedule a verification poll.
//! 2. `handle_callback`: the customer comes back through the gateway;
//!    verify server-to-server and settle.
//! 3. `poll_and_reconcile`: the deferred poll for attempts the callback
//!    never settled.
//!
//! `finalize_payment` applies money at most once per payment (`is_used`
//! flips under the payment row lock).

pub mod gateway;
pub mod zibal;

use std::sync::Arc;

use shared::error::{AppError, ErrorCode};
use shared::models::{
    GatewayId, GatewayStatus, Order, Payment, PaymentMethod, PaymentPurpose, PaymentStatus,
    TransactionType,
};
use shared::request::{GatewayCallbackQuery, PayOrderRequest};
use shared::response::PaymentSelection;
use shared::util::now_millis;

use crate::config::CommerceSettings;
use crate::error::{ServiceError, ServiceResult};
use crate::ledger::{LedgerEntry, WalletLedger};
use crate::orders::OrderLifecycle;
use crate::store::{NewPayment, Store, StoreTx};
use crate::tasks::{TaskOutcome, TaskPayload};
use gateway::{GatewayError, GatewayRegistry, TransactionStatus};

/// Earliest re-poll for a gateway that has not decided yet
const POLL_RECHECK_MILLIS: i64 = 60_000;

/// What a gateway payment pays for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTarget {
    Order { order_id: i64 },
    WalletCharge { amount: i64 },
}

/// A registered gateway attempt the customer can now pay
#[derive(Debug, Clone)]
pub struct GatewayCheckout {
    pub payment_id: i64,
    pub track_id: String,
    pub payment_link: String,
    pub amount: i64,
    pub gateway_id: GatewayId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Applied,
    /// The payment had been applied before; nothing changed
    AlreadyApplied,
}

/// Where a gateway answer left a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Paid(FinalizeOutcome),
    Failed(GatewayStatus),
    Pending(GatewayStatus),
}

#[derive(Clone)]
pub struct PaymentCoordinator {
    store: Arc<dyn Store>,
    gateways: GatewayRegistry,
    orders: OrderLifecycle,
    wallet: WalletLedger,
    settings: Arc<CommerceSettings>,
}

fn payment_failed(status: GatewayStatus) -> ServiceError {
    AppError::new(ErrorCode::PaymentFailed)
        .with_detail("gatewayStatus", status.code())
        .with_detail("reason", status.meaning())
        .into()
}

/// Lock the rows of a payment in the global lock order: order first, then payment
async fn lock_payment_context(
    tx: &mut dyn StoreTx,
    payment_id: i64,
) -> ServiceResult<Option<(Payment, Option<Order>)>> {
    let Some(snapshot) = tx.payment(payment_id).await? else {
        return Ok(None);
    };
    let order = match snapshot.order_id {
        Some(order_id) => Some(tx.lock_order(order_id).await?.ok_or_else(|| {
            ServiceError::invariant(format!("payment {payment_id} points at missing order {order_id}"))
        })?),
        None => None,
    };
    let payment = tx
        .lock_payment(payment_id)
        .await?
        .ok_or_else(|| ServiceError::invariant(format!("payment {payment_id} vanished")))?;
    Ok(Some((payment, order)))
}

impl PaymentCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        gateways: GatewayRegistry,
        orders: OrderLifecycle,
        wallet: WalletLedger,
        settings: Arc<CommerceSettings>,
    ) -> Self {
        Self {
            store,
            gateways,
            orders,
            wallet,
            settings,
        }
    }

    /// Pay an order from the wallet or open a gateway attempt for it
    pub async fn select_payment(
        &self,
        customer_id: i64,
        order_id: i64,
        req: &PayOrderRequest,
    ) -> ServiceResult<PaymentSelection> {
        match req.method {
            PaymentMethod::Wallet => {
                let record = self.orders.pay_with_wallet(customer_id, order_id).await?;
                Ok(PaymentSelection::Wallet { record })
            }
            PaymentMethod::Gateway => {
                let gateway_id = req.gateway_id.ok_or_else(|| {
                    AppError::with_message(
                        ErrorCode::PaymentMethodInvalid,
                        "gatewayId is required for gateway payments",
                    )
                })?;
                let checkout = self
                    .initiate_gateway_payment(
                        customer_id,
                        PaymentTarget::Order { order_id },
                        gateway_id,
                    )
                    .await?;
                Ok(PaymentSelection::Gateway {
                    payment_link: checkout.payment_link,
                    amount: checkout.amount,
                    gateway_id: checkout.gateway_id,
                })
            }
        }
    }

    /// Check the target can be paid and return the amount to charge
    async fn precheck(&self, user_id: i64, target: PaymentTarget) -> ServiceResult<i64> {
        let mut tx = self.store.begin().await?;
        match target {
            PaymentTarget::Order { order_id } => {
                let order = match tx.order(order_id).await? {
                    Some(order) if order.customer_id == user_id => order,
                    _ => {
                        return Err(AppError::new(ErrorCode::OrderNotFound)
                            .with_detail("orderId", order_id)
                            .into());
                    }
                };
                self.orders.ensure_gateway_payable(&order)?;
                Ok(order.total_price)
            }
            PaymentTarget::WalletCharge { amount } => {
                if amount <= 0 {
                    return Err(AppError::with_message(
                        ErrorCode::ValueOutOfRange,
                        "Amount must be positive",
                    )
                    .into());
                }
                if tx.wallet(user_id).await?.is_none() {
                    return Err(AppError::new(ErrorCode::WalletNotFound).into());
                }
                if tx.paying_charge(user_id).await?.is_some() {
                    return Err(AppError::new(ErrorCode::PaymentInProgress).into());
                }
                Ok(amount)
            }
        }
    }

    /// Open a gateway transaction and register it as the in-flight attempt
    ///
    /// The gateway call happens between two transactions so no row lock is
    /// held across the network.
    pub async fn initiate_gateway_payment(
        &self,
        user_id: i64,
        target: PaymentTarget,
        gateway_id: GatewayId,
    ) -> ServiceResult<GatewayCheckout> {
        let client = self.gateways.get(gateway_id)?;
        if !self.gateways.is_available(gateway_id) {
            return Err(GatewayError::Unavailable(format!("{gateway_id} failed its health check")).into());
        }

        let amount = self.precheck(user_id, target).await?;
        let request = client
            .request_transaction(amount, &self.settings.payment_callback_url)
            .await?;

        let payment = match self
            .register_attempt(user_id, target, gateway_id, amount, &request.track_id)
            .await
        {
            Ok(payment) => payment,
            Err(e) => {
                tracing::warn!(
                    user_id,
                    track_id = %request.track_id,
                    error = %e,
                    "Gateway transaction opened but not registered"
                );
                return Err(e);
            }
        };

        tracing::info!(
            payment_id = payment.id,
            user_id,
            amount,
            gateway = %gateway_id,
            track_id = %request.track_id,
            "Gateway payment initiated"
        );
        Ok(GatewayCheckout {
            payment_id: payment.id,
            payment_link: client.payment_link(&request.track_id),
            track_id: request.track_id,
            amount,
            gateway_id,
        })
    }

    async fn register_attempt(
        &self,
        user_id: i64,
        target: PaymentTarget,
        gateway_id: GatewayId,
        amount: i64,
        track_id: &str,
    ) -> ServiceResult<Payment> {
        let mut tx = self.store.begin().await?;
        let now = now_millis();
        let payment = match target {
            PaymentTarget::Order { order_id } => {
                let mut order = match tx.lock_order(order_id).await? {
                    Some(order) if order.customer_id == user_id => order,
                    _ => {
                        return Err(AppError::new(ErrorCode::OrderNotFound)
                            .with_detail("orderId", order_id)
                            .into());
                    }
                };
                self.orders
                    .begin_gateway_attempt(tx.as_mut(), &mut order)
                    .await?;

                match tx.order_payment(order_id).await? {
                    Some(mut payment) => {
                        if payment.is_used {
                            return Err(ServiceError::invariant(format!(
                                "order {order_id} is payable but payment {} was already applied",
                                payment.id
                            )));
                        }
                        payment.amount = order.total_price;
                        payment.gateway = gateway_id;
                        payment.track_id = Some(track_id.to_string());
                        payment.status = PaymentStatus::Paying;
                        payment.track_id_submitted_at = Some(now);
                        payment.paid_amount = None;
                        payment.ref_number = None;
                        payment.updated_at = now;
                        tx.update_payment(&payment).await?;
                        payment
                    }
                    None => {
                        tx.insert_payment(&NewPayment {
                            purpose: PaymentPurpose::Order,
                            order_id: Some(order_id),
                            user_id,
                            amount: order.total_price,
                            gateway: gateway_id,
                            track_id,
                            status: PaymentStatus::Paying,
                            now,
                        })
                        .await?
                    }
                }
            }
            PaymentTarget::WalletCharge { .. } => {
                if tx.lock_wallet(user_id).await?.is_none() {
                    return Err(AppError::new(ErrorCode::WalletNotFound).into());
                }
                if tx.paying_charge(user_id).await?.is_some() {
                    return Err(AppError::new(ErrorCode::PaymentInProgress).into());
                }
                tx.insert_payment(&NewPayment {
                    purpose: PaymentPurpose::WalletCharge,
                    order_id: None,
                    user_id,
                    amount,
                    gateway: gateway_id,
                    track_id,
                    status: PaymentStatus::Paying,
                    now,
                })
                .await?
            }
        };

        let poll = TaskPayload::VerifyPayment {
            payment_id: payment.id,
            track_id: track_id.to_string(),
        }
        .at(now + self.settings.payment_verify_delay_millis());
        tx.schedule_task(&poll).await?;
        tx.commit().await?;
        Ok(payment)
    }

    /// Gateway redirect callback
    ///
    /// The query string is only a hint. `success = 1` is verified with the
    /// gateway before any money is applied; anything else is confirmed with
    /// an inquiry before the attempt is closed, so a forged failure cannot
    /// cancel someone else's payment.
    pub async fn handle_callback(
        &self,
        query: &GatewayCallbackQuery,
    ) -> ServiceResult<FinalizeOutcome> {
        let payment = {
            let mut tx = self.store.begin().await?;
            tx.payment_by_track_id(&query.track_id)
                .await?
                .ok_or_else(|| {
                    AppError::new(ErrorCode::PaymentNotFound).with_detail("trackId", query.track_id.clone())
                })?
        };

        let client = self.gateways.get(payment.gateway)?;
        let answer = if query.success == 1 {
            client.verify_transaction(&query.track_id).await?
        } else {
            tracing::info!(
                payment_id = payment.id,
                track_id = %query.track_id,
                status = query.status,
                "Callback reported an unsuccessful payment, asking the gateway"
            );
            let inquiry = client.inquiry_transaction(&query.track_id).await?;
            match inquiry.status {
                GatewayStatus::PaidUnverified => client.verify_transaction(&query.track_id).await?,
                _ => inquiry,
            }
        };

        match self.settle(&payment, &query.track_id, answer).await? {
            Settlement::Paid(outcome) => Ok(outcome),
            Settlement::Failed(status) => Err(payment_failed(status)),
            Settlement::Pending(status) => Err(AppError::new(ErrorCode::PaymentInProgress)
                .with_detail("gatewayStatus", status.code())
                .into()),
        }
    }

    /// Deferred poll for an attempt nobody settled
    ///
    /// Transient gateway failures surface as errors so the task worker
    /// retries with backoff; they never cancel the order.
    pub async fn poll_and_reconcile(
        &self,
        payment_id: i64,
        track_id: &str,
    ) -> ServiceResult<TaskOutcome> {
        let payment = {
            let mut tx = self.store.begin().await?;
            tx.payment(payment_id).await?
        };
        let Some(payment) = payment else {
            tracing::warn!(payment_id, "Verification poll for unknown payment");
            return Ok(TaskOutcome::Done);
        };
        if payment.is_used
            || payment.status != PaymentStatus::Paying
            || payment.track_id.as_deref() != Some(track_id)
        {
            return Ok(TaskOutcome::Done);
        }

        let client = self.gateways.get(payment.gateway)?;
        let inquiry = client.inquiry_transaction(track_id).await?;
        let now = now_millis();
        let link_expires_at = payment.track_id_submitted_at.unwrap_or(payment.created_at)
            + self.settings.payment_link_expiry_millis();

        let answer = match inquiry.status {
            GatewayStatus::PaidUnverified => client.verify_transaction(track_id).await?,
            GatewayStatus::InternalError => {
                return Err(GatewayError::Unavailable(format!(
                    "gateway reported an internal error for track {track_id}"
                ))
                .into());
            }
            GatewayStatus::Waiting if now < link_expires_at => {
                return Ok(TaskOutcome::RecheckAt(link_expires_at));
            }
            GatewayStatus::Waiting => {
                tracing::info!(payment_id, track_id, "Payment link expired unpaid");
                self.cancel_attempt(payment_id, track_id).await?;
                return Ok(TaskOutcome::Done);
            }
            _ => inquiry,
        };

        match self.settle(&payment, track_id, answer).await? {
            Settlement::Paid(_) | Settlement::Failed(_) => Ok(TaskOutcome::Done),
            Settlement::Pending(_) => Ok(TaskOutcome::RecheckAt(
                link_expires_at.max(now + POLL_RECHECK_MILLIS),
            )),
        }
    }

    /// Act on a verify/inquiry answer
    async fn settle(
        &self,
        payment: &Payment,
        track_id: &str,
        answer: TransactionStatus,
    ) -> ServiceResult<Settlement> {
        if answer.status.is_paid() {
            if answer.amount != payment.amount {
                tracing::error!(
                    alert = true,
                    payment_id = payment.id,
                    expected = payment.amount,
                    reported = answer.amount,
                    "Gateway reported a different amount than requested"
                );
                return Err(AppError::new(ErrorCode::PaymentAmountMismatch)
                    .with_detail("expected", payment.amount)
                    .with_detail("reported", answer.amount)
                    .into());
            }
            let outcome = self
                .finalize_payment(payment.id, track_id, answer.amount, answer.ref_number)
                .await?;
            return Ok(Settlement::Paid(outcome));
        }
        if answer.status.is_definitely_unpaid() {
            self.cancel_attempt(payment.id, track_id).await?;
            return Ok(Settlement::Failed(answer.status));
        }
        Ok(Settlement::Pending(answer.status))
    }

    /// Apply the money of a verified payment exactly once
    pub async fn finalize_payment(
        &self,
        payment_id: i64,
        track_id: &str,
        paid_amount: i64,
        ref_number: Option<String>,
    ) -> ServiceResult<FinalizeOutcome> {
        let mut tx = self.store.begin().await?;
        let Some((mut payment, order)) = lock_payment_context(tx.as_mut(), payment_id).await?
        else {
            return Err(AppError::new(ErrorCode::PaymentNotFound).into());
        };

        if payment.is_used {
            tracing::debug!(payment_id, "Payment already applied");
            return Ok(FinalizeOutcome::AlreadyApplied);
        }
        if payment.track_id.as_deref() != Some(track_id) {
            tracing::error!(
                alert = true,
                payment_id,
                track_id,
                current_track_id = ?payment.track_id,
                "Verified money for a replaced gateway attempt"
            );
            return Err(AppError::new(ErrorCode::PaymentNotFound)
                .with_detail("trackId", track_id)
                .into());
        }

        let now = now_millis();
        payment.status = PaymentStatus::Paid;
        payment.is_used = true;
        payment.paid_amount = Some(paid_amount);
        payment.ref_number = ref_number;
        payment.updated_at = now;
        tx.update_payment(&payment).await?;

        match (payment.purpose, order) {
            (PaymentPurpose::Order, Some(mut order)) => {
                self.orders
                    .settle_gateway_payment(tx.as_mut(), &mut order, &payment, paid_amount)
                    .await?;
            }
            (PaymentPurpose::WalletCharge, None) => {
                self.wallet
                    .credit(
                        tx.as_mut(),
                        payment.user_id,
                        paid_amount,
                        LedgerEntry::new(TransactionType::Deposit).payment(payment.id),
                    )
                    .await?;
            }
            (purpose, _) => {
                return Err(ServiceError::invariant(format!(
                    "payment {payment_id} with purpose {purpose:?} has inconsistent order link"
                )));
            }
        }
        tx.commit().await?;

        tracing::info!(payment_id, paid_amount, "Payment finalized");
        Ok(FinalizeOutcome::Applied)
    }

    /// Close an attempt the gateway reported as not paid
    async fn cancel_attempt(&self, payment_id: i64, track_id: &str) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        let Some((mut payment, order)) = lock_payment_context(tx.as_mut(), payment_id).await?
        else {
            return Ok(());
        };
        if payment.is_used
            || payment.status != PaymentStatus::Paying
            || payment.track_id.as_deref() != Some(track_id)
        {
            return Ok(());
        }

        payment.status = PaymentStatus::Cancelled;
        payment.updated_at = now_millis();
        tx.update_payment(&payment).await?;
        if let Some(mut order) = order {
            self.orders
                .abandon_gateway_attempt(tx.as_mut(), &mut order)
                .await?;
        }
        tx.commit().await?;

        tracing::info!(payment_id, track_id, "Gateway attempt cancelled");
        Ok(())
    }
}
