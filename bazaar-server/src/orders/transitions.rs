//! Order status transitions after checkout

use shared::error::{AppError, ErrorCode};
use shared::models::{
    CancelledBy, FinancialRecord, Order, OrderStatus, Payment, PaymentMethod, TransactionType,
};
use shared::request::SellerOrderUpdate;
use shared::util::{add_business_days, now_millis};

use super::{OrderLifecycle, order_not_found, quantities, seller_share};
use crate::error::{ServiceError, ServiceResult};
use crate::ledger::LedgerEntry;
use crate::store::{NewMoneyTransfer, StoreTx};
use crate::tasks::{TaskOutcome, TaskPayload, TaskStatus};

/// How many held orders one promotion pass moves
const PROMOTION_BATCH: i64 = 100;

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn has_record(records: &[FinancialRecord], record_type: TransactionType) -> bool {
    records.iter().any(|r| r.record_type == record_type)
}

impl OrderLifecycle {
    /// Pay an unpaid order from the customer's wallet
    ///
    /// On insufficient balance nothing changes and the order stays payable.
    pub async fn pay_with_wallet(
        &self,
        customer_id: i64,
        order_id: i64,
    ) -> ServiceResult<FinancialRecord> {
        let mut tx = self.store.begin().await?;
        let mut order = Self::lock_customer_order(tx.as_mut(), customer_id, order_id).await?;
        match order.status {
            OrderStatus::OnHold | OrderStatus::Unpaid => {}
            OrderStatus::Paying => return Err(AppError::new(ErrorCode::PaymentInProgress).into()),
            status if status.is_terminal() => {
                return Err(AppError::new(ErrorCode::OrderFinished)
                    .with_detail("status", status.as_str())
                    .into());
            }
            status => {
                return Err(AppError::new(ErrorCode::OrderNotPayable)
                    .with_detail("status", status.as_str())
                    .into());
            }
        }
        order.status.ensure_transition(OrderStatus::Paid)?;

        let record = self
            .wallet
            .debit(
                tx.as_mut(),
                customer_id,
                order.total_price,
                LedgerEntry::new(TransactionType::WalletPayment).order(order.id),
            )
            .await?;

        let now = now_millis();
        order.status = OrderStatus::Paid;
        order.payment_method = Some(PaymentMethod::Wallet);
        order.paid_at = Some(now);
        order.updated_at = now;
        tx.update_order(&order).await?;
        tx.commit().await?;

        tracing::info!(order_id, customer_id, amount = order.total_price, "Order paid from wallet");
        Ok(record)
    }

    /// Customer cancels an order that is still unpaid
    pub async fn customer_cancel(&self, customer_id: i64, order_id: i64) -> ServiceResult<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = Self::lock_customer_order(tx.as_mut(), customer_id, order_id).await?;
        match order.status {
            OrderStatus::OnHold | OrderStatus::Unpaid => {}
            status if status.is_terminal() => {
                return Err(AppError::new(ErrorCode::OrderFinished)
                    .with_detail("status", status.as_str())
                    .into());
            }
            status => {
                return Err(AppError::new(ErrorCode::OrderNotCancellable)
                    .with_detail("status", status.as_str())
                    .into());
            }
        }
        self.cancel_locked(tx.as_mut(), &mut order, CancelledBy::Customer, None)
            .await?;
        tx.commit().await?;

        tracing::info!(order_id, customer_id, "Order cancelled by customer");
        Ok(order)
    }

    /// Seller moves an order to PROCESSING, SHIPPED or CANCELLED
    ///
    /// Shipping an already shipped order only replaces the tracking code.
    pub async fn seller_update(
        &self,
        seller_id: i64,
        order_id: i64,
        update: &SellerOrderUpdate,
    ) -> ServiceResult<Order> {
        let target = update.status;
        if !target.is_seller_target() {
            return Err(AppError::new(ErrorCode::OrderInvalidSellerStatus)
                .with_detail("status", target.as_str())
                .into());
        }
        let tracking_code = non_empty(update.tracking_code.as_deref());
        let cancel_reason = non_empty(update.cancel_reason.as_deref());
        if target == OrderStatus::Shipped && tracking_code.is_none() {
            return Err(AppError::new(ErrorCode::TrackingCodeRequired).into());
        }
        if target == OrderStatus::Cancelled && cancel_reason.is_none() {
            return Err(AppError::new(ErrorCode::CancelReasonRequired).into());
        }

        let mut tx = self.store.begin().await?;
        let mut order = match tx.lock_order(order_id).await? {
            Some(order) if order.seller_id == seller_id => order,
            _ => return Err(order_not_found(order_id)),
        };

        if order.status.is_terminal() {
            return Err(AppError::new(ErrorCode::OrderFinished)
                .with_detail("status", order.status.as_str())
                .into());
        }

        let now = now_millis();
        match target {
            OrderStatus::Shipped if order.status == OrderStatus::Shipped => {
                order.tracking_code = tracking_code;
            }
            OrderStatus::Shipped => {
                order.status.ensure_transition(OrderStatus::Shipped)?;
                let items = tx.order_items(order.id).await?;
                self.stock.consume(tx.as_mut(), &quantities(&items)).await?;
                order.status = OrderStatus::Shipped;
                order.tracking_code = tracking_code;
                order.shipped_at = Some(now);

                let confirm_at = add_business_days(now, self.settings.delivery_business_days);
                tx.schedule_task(&TaskPayload::ConfirmDelivery { order_id }.at(confirm_at))
                    .await?;
            }
            OrderStatus::Processing => {
                order.status.ensure_transition(OrderStatus::Processing)?;
                order.status = OrderStatus::Processing;
            }
            OrderStatus::Cancelled => {
                if !matches!(order.status, OrderStatus::Paid | OrderStatus::Processing) {
                    return Err(AppError::conflict(format!(
                        "Seller cannot cancel an order in {}",
                        order.status.as_str()
                    ))
                    .with_detail("from", order.status.as_str())
                    .with_detail("to", target.as_str())
                    .into());
                }
                self.cancel_locked(tx.as_mut(), &mut order, CancelledBy::Seller, cancel_reason)
                    .await?;
                self.refund_paid_order(tx.as_mut(), &order).await?;
            }
            other => {
                return Err(AppError::new(ErrorCode::OrderInvalidSellerStatus)
                    .with_detail("status", other.as_str())
                    .into());
            }
        }
        order.updated_at = now;
        tx.update_order(&order).await?;
        tx.commit().await?;

        tracing::info!(
            order_id,
            seller_id,
            status = order.status.as_str(),
            "Order updated by seller"
        );
        Ok(order)
    }

    /// Release the order's stock and mark it cancelled (caller holds the order lock)
    async fn cancel_locked(
        &self,
        tx: &mut dyn StoreTx,
        order: &mut Order,
        by: CancelledBy,
        reason: Option<String>,
    ) -> ServiceResult<()> {
        order.status.ensure_transition(OrderStatus::Cancelled)?;
        let items = tx.order_items(order.id).await?;
        self.stock.release(tx, &quantities(&items)).await?;

        order.status = OrderStatus::Cancelled;
        order.cancelled_by = Some(by);
        order.cancel_reason = reason;
        order.updated_at = now_millis();
        tx.update_order(order).await?;
        Ok(())
    }

    /// Give the customer their money back for a paid order
    async fn refund_paid_order(&self, tx: &mut dyn StoreTx, order: &Order) -> ServiceResult<()> {
        let records = tx.order_records(order.id).await?;
        match order.payment_method {
            Some(PaymentMethod::Wallet) => {
                if !has_record(&records, TransactionType::WalletPayment) {
                    return Err(ServiceError::invariant(format!(
                        "order {} paid from wallet has no WALLET_PAYMENT record",
                        order.id
                    )));
                }
                self.wallet
                    .credit(
                        tx,
                        order.customer_id,
                        order.total_price,
                        LedgerEntry::new(TransactionType::WalletRefund).order(order.id),
                    )
                    .await?;
            }
            Some(PaymentMethod::Gateway) => {
                if !has_record(&records, TransactionType::DirectPayment) {
                    return Err(ServiceError::invariant(format!(
                        "order {} paid by gateway has no DIRECT_PAYMENT record",
                        order.id
                    )));
                }
                self.refund_by_transfer(tx, order, None).await?;
            }
            None => {
                return Err(ServiceError::invariant(format!(
                    "paid order {} has no payment method",
                    order.id
                )));
            }
        }
        Ok(())
    }

    /// Queue a manual payout of the order total to the customer
    async fn refund_by_transfer(
        &self,
        tx: &mut dyn StoreTx,
        order: &Order,
        payment_id: Option<i64>,
    ) -> ServiceResult<()> {
        let transfer = tx
            .insert_money_transfer(&NewMoneyTransfer {
                requested_by: order.customer_id,
                order_id: Some(order.id),
                amount: order.total_price,
                now: now_millis(),
            })
            .await?;
        let mut entry = LedgerEntry::new(TransactionType::DirectRefund).order(order.id);
        if let Some(id) = payment_id {
            entry = entry.payment(id);
        }
        self.wallet
            .record_external(tx, order.total_price, entry)
            .await?;
        tracing::info!(
            order_id = order.id,
            transfer_id = transfer.id,
            amount = order.total_price,
            "Refund queued for manual transfer"
        );
        Ok(())
    }

    // ========== Timers ==========

    /// Auto-cancel timer: cancel the order if it is still unpaid
    ///
    /// An order with a gateway attempt in flight is checked again later;
    /// paid or finished orders are left alone.
    pub async fn auto_cancel(&self, order_id: i64) -> ServiceResult<TaskOutcome> {
        let mut tx = self.store.begin().await?;
        let Some(mut order) = tx.lock_order(order_id).await? else {
            tracing::warn!(order_id, "Auto-cancel for unknown order");
            return Ok(TaskOutcome::Done);
        };
        match order.status {
            OrderStatus::OnHold | OrderStatus::Unpaid => {
                self.cancel_locked(tx.as_mut(), &mut order, CancelledBy::Server, None)
                    .await?;
                tx.commit().await?;
                tracing::info!(order_id, "Unpaid order cancelled after timeout");
                Ok(TaskOutcome::Done)
            }
            OrderStatus::Paying => {
                let now = now_millis();
                let expiry = self.settings.payment_link_expiry_millis();
                let payment = tx.order_payment(order_id).await?;

                // Verification gave up: the order waits on an operator now
                if let Some(p) = &payment
                    && let Some(track_id) = &p.track_id
                {
                    let key = TaskPayload::VerifyPayment {
                        payment_id: p.id,
                        track_id: track_id.clone(),
                    }
                    .idempotency_key();
                    if tx.task_status(&key).await? == Some(TaskStatus::Dead) {
                        tracing::error!(
                            alert = true,
                            order_id,
                            payment_id = p.id,
                            track_id = %track_id,
                            "Order stuck in PAYING after verification was dead-lettered"
                        );
                        return Ok(TaskOutcome::Done);
                    }
                }

                // Wait until the attempt's payment link has expired
                let link_expires_at = payment
                    .and_then(|p| p.track_id_submitted_at)
                    .map_or(now + expiry, |submitted| submitted + expiry);
                let recheck_at = if link_expires_at > now {
                    link_expires_at
                } else {
                    now + expiry
                };
                tracing::debug!(order_id, recheck_at, "Auto-cancel deferred, payment in flight");
                Ok(TaskOutcome::RecheckAt(recheck_at))
            }
            _ => Ok(TaskOutcome::Done),
        }
    }

    /// Delivery timer: SHIPPED → DELIVERED → COMPLETED, crediting the seller
    pub async fn confirm_delivery(&self, order_id: i64) -> ServiceResult<TaskOutcome> {
        let mut tx = self.store.begin().await?;
        let Some(mut order) = tx.lock_order(order_id).await? else {
            tracing::warn!(order_id, "Delivery confirmation for unknown order");
            return Ok(TaskOutcome::Done);
        };
        if order.status != OrderStatus::Shipped {
            return Ok(TaskOutcome::Done);
        }
        order.status.ensure_transition(OrderStatus::Delivered)?;
        order.status = OrderStatus::Delivered;
        order.status.ensure_transition(OrderStatus::Completed)?;

        let rate = self.settings.commission_rate;
        let credit = seller_share(order.total_price, rate).ok_or_else(|| {
            ServiceError::invariant(format!("seller share of order {order_id} overflows"))
        })?;
        if credit > 0 {
            self.wallet
                .credit(
                    tx.as_mut(),
                    order.seller_id,
                    credit,
                    LedgerEntry::new(TransactionType::OrderRevenue)
                        .order(order.id)
                        .commission(rate),
                )
                .await?;
        }

        let now = now_millis();
        order.status = OrderStatus::Completed;
        order.completed_at = Some(now);
        order.updated_at = now;
        tx.update_order(&order).await?;
        tx.commit().await?;

        tracing::info!(order_id, seller_id = order.seller_id, credit, "Order completed");
        Ok(TaskOutcome::Done)
    }

    /// Move held orders to UNPAID once a gateway is available again
    pub async fn promote_held_orders(&self) -> ServiceResult<usize> {
        if !self.gateways.any_available() {
            return Ok(0);
        }
        let mut tx = self.store.begin().await?;
        let held = tx
            .orders_with_status(OrderStatus::OnHold, PROMOTION_BATCH)
            .await?;
        drop(tx);

        let mut promoted = 0;
        for candidate in held {
            let mut tx = self.store.begin().await?;
            let Some(mut order) = tx.lock_order(candidate.id).await? else {
                continue;
            };
            if order.status != OrderStatus::OnHold {
                continue;
            }
            order.status.ensure_transition(OrderStatus::Unpaid)?;
            order.status = OrderStatus::Unpaid;
            order.updated_at = now_millis();
            tx.update_order(&order).await?;
            tx.commit().await?;
            promoted += 1;
        }
        if promoted > 0 {
            tracing::info!(promoted, "Held orders released for payment");
        }
        Ok(promoted)
    }

    // ========== Gateway payment hooks ==========

    /// Check that a gateway attempt may start for this order
    pub(crate) fn ensure_gateway_payable(&self, order: &Order) -> ServiceResult<()> {
        match order.status {
            OrderStatus::Unpaid => Ok(()),
            OrderStatus::OnHold => Err(AppError::with_message(
                ErrorCode::GatewayUnavailable,
                "Gateway payments are on hold for this order",
            )
            .into()),
            OrderStatus::Paying => Err(AppError::new(ErrorCode::PaymentInProgress).into()),
            status if status.is_terminal() => Err(AppError::new(ErrorCode::OrderFinished)
                .with_detail("status", status.as_str())
                .into()),
            status => Err(AppError::new(ErrorCode::OrderNotPayable)
                .with_detail("status", status.as_str())
                .into()),
        }
    }

    /// UNPAID → PAYING when a gateway attempt is registered
    pub(crate) async fn begin_gateway_attempt(
        &self,
        tx: &mut dyn StoreTx,
        order: &mut Order,
    ) -> ServiceResult<()> {
        self.ensure_gateway_payable(order)?;
        order.status.ensure_transition(OrderStatus::Paying)?;
        order.status = OrderStatus::Paying;
        order.updated_at = now_millis();
        tx.update_order(order).await?;
        Ok(())
    }

    /// Apply verified gateway money to the order
    ///
    /// An order that is no longer waiting for money (cancelled meanwhile)
    /// gets the payment recorded and immediately queued for refund.
    pub(crate) async fn settle_gateway_payment(
        &self,
        tx: &mut dyn StoreTx,
        order: &mut Order,
        payment: &Payment,
        amount: i64,
    ) -> ServiceResult<FinancialRecord> {
        let record = self
            .wallet
            .record_external(
                tx,
                amount,
                LedgerEntry::new(TransactionType::DirectPayment)
                    .order(order.id)
                    .payment(payment.id),
            )
            .await?;

        if !order.status.is_awaiting_payment() {
            tracing::error!(
                alert = true,
                order_id = order.id,
                payment_id = payment.id,
                status = order.status.as_str(),
                amount,
                "Gateway payment arrived for an order no longer awaiting payment, refunding"
            );
            self.refund_by_transfer(tx, order, Some(payment.id)).await?;
            return Ok(record);
        }

        let now = now_millis();
        order.status.ensure_transition(OrderStatus::Paid)?;
        order.status = OrderStatus::Paid;
        order.payment_method = Some(PaymentMethod::Gateway);
        order.paid_at = Some(now);
        order.updated_at = now;
        tx.update_order(order).await?;

        tracing::info!(order_id = order.id, payment_id = payment.id, amount, "Order paid by gateway");
        Ok(record)
    }

    /// A gateway attempt definitely failed: reopen the order, or cancel it past its deadline
    pub(crate) async fn abandon_gateway_attempt(
        &self,
        tx: &mut dyn StoreTx,
        order: &mut Order,
    ) -> ServiceResult<()> {
        if order.status != OrderStatus::Paying {
            return Ok(());
        }
        if now_millis() >= self.payment_deadline(order) {
            self.cancel_locked(tx, order, CancelledBy::Server, None)
                .await?;
            tracing::info!(order_id = order.id, "Order cancelled after failed payment past deadline");
            return Ok(());
        }
        order.status.ensure_transition(OrderStatus::Unpaid)?;
        order.status = OrderStatus::Unpaid;
        order.updated_at = now_millis();
        tx.update_order(order).await?;
        Ok(())
    }
}
