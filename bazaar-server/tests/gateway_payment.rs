//! Gateway payments: initiation, callback, polling and late money

mod common;

use bazaar_server::config::CommerceSettings;
use bazaar_server::payments::gateway::GatewayError;
use bazaar_server::payments::{FinalizeOutcome, PaymentTarget};
use bazaar_server::tasks::{TaskPayload, TaskStatus};
use common::{CUSTOMER, DAY, Harness};
use shared::error::ErrorCode;
use shared::models::{
    GatewayId, GatewayStatus, OrderStatus, PaymentMethod, PaymentPurpose, PaymentStatus,
    TransactionType,
};
use shared::request::{GatewayCallbackQuery, PayOrderRequest};
use shared::response::PaymentSelection;
use shared::util::now_millis;

fn by_gateway() -> PayOrderRequest {
    PayOrderRequest {
        method: PaymentMethod::Gateway,
        gateway_id: Some(GatewayId::Zibal),
    }
}

fn callback(success: u8, track_id: &str, status: GatewayStatus) -> GatewayCallbackQuery {
    GatewayCallbackQuery {
        success,
        track_id: track_id.to_string(),
        order_id: None,
        status: status.code(),
    }
}

/// Scenario order with a gateway attempt in flight; returns (order id, track id)
async fn paying_order(h: &Harness) -> (i64, String) {
    let (order, _, _) = h.scenario_order().await;
    let selection = h
        .state
        .payments
        .select_payment(CUSTOMER, order.order.id, &by_gateway())
        .await
        .unwrap();
    let PaymentSelection::Gateway { payment_link, .. } = selection else {
        panic!("expected a gateway link");
    };
    let track_id = payment_link.rsplit('/').next().unwrap().to_string();
    (order.order.id, track_id)
}

fn count_records(records: &[shared::models::FinancialRecord], kind: TransactionType) -> usize {
    records.iter().filter(|r| r.record_type == kind).count()
}

#[tokio::test]
async fn test_initiation_registers_one_attempt() {
    let h = Harness::new().await;
    let (order, _, _) = h.scenario_order().await;

    let selection = h
        .state
        .payments
        .select_payment(CUSTOMER, order.order.id, &by_gateway())
        .await
        .unwrap();
    match selection {
        PaymentSelection::Gateway {
            payment_link,
            amount,
            gateway_id,
        } => {
            assert_eq!(payment_link, "https://gateway.test/start/5000");
            assert_eq!(amount, 3950);
            assert_eq!(gateway_id, GatewayId::Zibal);
        }
        other => panic!("unexpected selection: {other:?}"),
    }
    assert_eq!(h.order(order.order.id).await.status, OrderStatus::Paying);

    let payments = h.store.payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Paying);
    assert_eq!(payments[0].track_id.as_deref(), Some("5000"));
    assert_eq!(payments[0].amount, 3950);
    assert!(!payments[0].is_used);

    let polls = h
        .store
        .tasks()
        .await
        .into_iter()
        .filter(|t| matches!(t.payload, TaskPayload::VerifyPayment { .. }))
        .count();
    assert_eq!(polls, 1);

    // A second attempt is refused while the first is in flight
    let err = h
        .state
        .payments
        .select_payment(CUSTOMER, order.order.id, &by_gateway())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PaymentInProgress);
    assert_eq!(h.store.payments().await.len(), 1);

    // Wallet payment is refused as well
    h.fund(CUSTOMER, 5000).await;
    let err = h
        .state
        .orders
        .pay_with_wallet(CUSTOMER, order.order.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PaymentInProgress);
    assert_eq!(h.balance(CUSTOMER).await, 5000);
}

#[tokio::test]
async fn test_unimplemented_gateway_is_rejected() {
    let h = Harness::new().await;
    let (order, _, _) = h.scenario_order().await;

    let err = h
        .state
        .payments
        .select_payment(
            CUSTOMER,
            order.order.id,
            &PayOrderRequest {
                method: PaymentMethod::Gateway,
                gateway_id: Some(GatewayId::ZarinPal),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::GatewayNotImplemented);
    assert_eq!(h.order(order.order.id).await.status, OrderStatus::Unpaid);
}

#[tokio::test]
async fn test_successful_callback_pays_order_once() {
    let h = Harness::new().await;
    let (order_id, track_id) = paying_order(&h).await;
    h.gateway.answer(&track_id, GatewayStatus::PaidVerified, 3950);

    let outcome = h
        .state
        .payments
        .handle_callback(&callback(1, &track_id, GatewayStatus::PaidVerified))
        .await
        .unwrap();
    assert_eq!(outcome, FinalizeOutcome::Applied);

    let order = h.order(order_id).await;
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_method, Some(PaymentMethod::Gateway));

    let payment = h.store.payments().await.remove(0);
    assert_eq!(payment.status, PaymentStatus::Paid);
    assert!(payment.is_used);
    assert_eq!(payment.paid_amount, Some(3950));
    assert_eq!(payment.ref_number.as_deref(), Some("ref-5000"));

    // Replayed callback and a direct second finalize are both no-ops
    let replay = h
        .state
        .payments
        .handle_callback(&callback(1, &track_id, GatewayStatus::PaidVerified))
        .await
        .unwrap();
    assert_eq!(replay, FinalizeOutcome::AlreadyApplied);
    let again = h
        .state
        .payments
        .finalize_payment(payment.id, &track_id, 3950, None)
        .await
        .unwrap();
    assert_eq!(again, FinalizeOutcome::AlreadyApplied);

    let records = h.store.financial_records().await;
    assert_eq!(count_records(&records, TransactionType::DirectPayment), 1);
}

#[tokio::test]
async fn test_concurrent_finalize_applies_once() {
    let h = Harness::new().await;
    let (order_id, track_id) = paying_order(&h).await;
    let payment_id = h.store.payments().await[0].id;

    let (first, second) = tokio::join!(
        h.state.payments.finalize_payment(payment_id, &track_id, 3950, None),
        h.state.payments.finalize_payment(payment_id, &track_id, 3950, None),
    );
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|o| *o == FinalizeOutcome::AlreadyApplied);
    assert_eq!(
        outcomes,
        vec![FinalizeOutcome::Applied, FinalizeOutcome::AlreadyApplied]
    );

    assert_eq!(h.order(order_id).await.status, OrderStatus::Paid);
    let records = h.store.financial_records().await;
    assert_eq!(count_records(&records, TransactionType::DirectPayment), 1);
}

#[tokio::test]
async fn test_failed_callback_reopens_order() {
    let h = Harness::new().await;
    let (order_id, track_id) = paying_order(&h).await;
    h.gateway.answer(&track_id, GatewayStatus::CancelledByUser, 0);

    let err = h
        .state
        .payments
        .handle_callback(&callback(0, &track_id, GatewayStatus::CancelledByUser))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PaymentFailed);

    assert_eq!(h.order(order_id).await.status, OrderStatus::Unpaid);
    let payment = h.store.payments().await.remove(0);
    assert_eq!(payment.status, PaymentStatus::Cancelled);
    assert!(!payment.is_used);

    // A fresh attempt reuses the order's payment row with a new track id
    h.state
        .payments
        .select_payment(CUSTOMER, order_id, &by_gateway())
        .await
        .unwrap();
    let payments = h.store.payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].id, payment.id);
    assert_eq!(payments[0].status, PaymentStatus::Paying);
    assert_eq!(payments[0].track_id.as_deref(), Some("5001"));
    assert_eq!(h.order(order_id).await.status, OrderStatus::Paying);
}

#[tokio::test]
async fn test_failure_callback_is_checked_with_gateway() {
    let h = Harness::new().await;
    let (order_id, track_id) = paying_order(&h).await;

    // The gateway still shows the customer on the payment page
    let err = h
        .state
        .payments
        .handle_callback(&callback(0, &track_id, GatewayStatus::CancelledByUser))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PaymentInProgress);
    assert_eq!(
        h.gateway.inquiries.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert_eq!(h.order(order_id).await.status, OrderStatus::Paying);
    let payment = h.store.payments().await.remove(0);
    assert_eq!(payment.status, PaymentStatus::Paying);
    assert_eq!(payment.track_id.as_deref(), Some(track_id.as_str()));

    // A failure report for a payment that actually went through settles it
    h.gateway.answer(&track_id, GatewayStatus::PaidUnverified, 3950);
    let outcome = h
        .state
        .payments
        .handle_callback(&callback(0, &track_id, GatewayStatus::Failed(4)))
        .await
        .unwrap();
    assert_eq!(outcome, FinalizeOutcome::Applied);
    assert_eq!(h.order(order_id).await.status, OrderStatus::Paid);
}

#[tokio::test]
async fn test_callback_for_unknown_track() {
    let h = Harness::new().await;
    let err = h
        .state
        .payments
        .handle_callback(&callback(1, "424242", GatewayStatus::PaidVerified))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PaymentNotFound);
}

#[tokio::test]
async fn test_amount_mismatch_is_not_applied() {
    let h = Harness::new().await;
    let (order_id, track_id) = paying_order(&h).await;
    h.gateway.answer(&track_id, GatewayStatus::PaidVerified, 100);

    let err = h
        .state
        .payments
        .handle_callback(&callback(1, &track_id, GatewayStatus::PaidVerified))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PaymentAmountMismatch);

    assert_eq!(h.order(order_id).await.status, OrderStatus::Paying);
    assert!(!h.store.payments().await[0].is_used);
}

#[tokio::test]
async fn test_poll_settles_unreported_payment() {
    let h = Harness::new().await;
    let (order_id, track_id) = paying_order(&h).await;
    h.gateway.answer(&track_id, GatewayStatus::PaidVerified, 3950);

    h.worker().process_due_at(now_millis() + DAY).await.unwrap();

    assert_eq!(h.order(order_id).await.status, OrderStatus::Paid);
    let poll = h
        .store
        .tasks()
        .await
        .into_iter()
        .find(|t| matches!(t.payload, TaskPayload::VerifyPayment { .. }))
        .unwrap();
    assert_eq!(poll.status, TaskStatus::Done);
}

#[tokio::test]
async fn test_poll_waits_for_link_to_expire() {
    let h = Harness::new().await;
    let (order_id, track_id) = paying_order(&h).await;

    let outcome = h
        .state
        .payments
        .poll_and_reconcile(h.store.payments().await[0].id, &track_id)
        .await
        .unwrap();
    assert!(matches!(outcome, bazaar_server::tasks::TaskOutcome::RecheckAt(_)));
    assert_eq!(h.order(order_id).await.status, OrderStatus::Paying);
}

#[tokio::test]
async fn test_expired_link_reopens_order() {
    let settings = CommerceSettings {
        payment_link_expiry_minutes: 0,
        ..CommerceSettings::default()
    };
    let h = Harness::build(settings, Vec::new()).await;
    let (order_id, track_id) = paying_order(&h).await;

    let outcome = h
        .state
        .payments
        .poll_and_reconcile(h.store.payments().await[0].id, &track_id)
        .await
        .unwrap();
    assert_eq!(outcome, bazaar_server::tasks::TaskOutcome::Done);
    assert_eq!(h.order(order_id).await.status, OrderStatus::Unpaid);
    assert_eq!(h.store.payments().await[0].status, PaymentStatus::Cancelled);
}

#[tokio::test]
async fn test_unreachable_gateway_never_cancels() {
    let h = Harness::new().await;
    let (order_id, track_id) = paying_order(&h).await;
    h.gateway.fail(&track_id, GatewayError::Timeout);
    let worker = h.worker();

    let base = now_millis() + DAY;
    for round in 0..8 {
        worker.process_due_at(base + round * DAY).await.unwrap();
    }

    let poll = h
        .store
        .tasks()
        .await
        .into_iter()
        .find(|t| matches!(t.payload, TaskPayload::VerifyPayment { .. }))
        .unwrap();
    assert_eq!(poll.status, TaskStatus::Dead);
    assert_eq!(poll.attempts, 6);
    assert!(poll.last_error.unwrap().contains("timed out"));

    // Money may still arrive: nothing was cancelled
    assert_eq!(h.order(order_id).await.status, OrderStatus::Paying);
    let payment = h.store.payments().await.remove(0);
    assert_eq!(payment.status, PaymentStatus::Paying);
    assert_eq!(
        h.gateway.inquiries.load(std::sync::atomic::Ordering::SeqCst),
        6
    );

    // The auto-cancel timer stops rescheduling once an operator owns the order
    worker.process_due_at(base + 9 * DAY).await.unwrap();
    let timer = h
        .store
        .tasks()
        .await
        .into_iter()
        .find(|t| t.payload == TaskPayload::AutoCancelOrder { order_id })
        .unwrap();
    assert_eq!(timer.status, TaskStatus::Done);
    assert_eq!(
        h.state.orders.auto_cancel(order_id).await.unwrap(),
        bazaar_server::tasks::TaskOutcome::Done
    );
    assert_eq!(h.order(order_id).await.status, OrderStatus::Paying);
}

#[tokio::test]
async fn test_late_payment_on_cancelled_order_is_refunded() {
    let h = Harness::new().await;
    let (order_id, track_id) = paying_order(&h).await;

    // The customer abandons the gateway and cancels the order
    h.gateway.answer(&track_id, GatewayStatus::Failed(4), 0);
    h.state
        .payments
        .handle_callback(&callback(0, &track_id, GatewayStatus::Failed(4)))
        .await
        .unwrap_err();
    h.state
        .orders
        .customer_cancel(CUSTOMER, order_id)
        .await
        .unwrap();

    // ...but the gateway later confirms the money arrived
    h.gateway.answer(&track_id, GatewayStatus::PaidVerified, 3950);
    let outcome = h
        .state
        .payments
        .handle_callback(&callback(1, &track_id, GatewayStatus::PaidVerified))
        .await
        .unwrap();
    assert_eq!(outcome, FinalizeOutcome::Applied);

    assert_eq!(h.order(order_id).await.status, OrderStatus::Cancelled);
    let transfers = h.store.money_transfers().await;
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].amount, 3950);
    assert_eq!(transfers[0].order_id, Some(order_id));
    assert_eq!(transfers[0].requested_by, CUSTOMER);
    assert!(!transfers[0].is_paid);

    let records = h.store.financial_records().await;
    assert_eq!(count_records(&records, TransactionType::DirectPayment), 1);
    assert_eq!(count_records(&records, TransactionType::DirectRefund), 1);
}

#[tokio::test]
async fn test_wallet_charge_deposits_once() {
    let h = Harness::new().await;
    h.customer(CUSTOMER).await;

    let checkout = h
        .state
        .payments
        .initiate_gateway_payment(
            CUSTOMER,
            PaymentTarget::WalletCharge { amount: 50_000 },
            GatewayId::Zibal,
        )
        .await
        .unwrap();
    assert_eq!(checkout.amount, 50_000);

    // One charge at a time
    let err = h
        .state
        .payments
        .initiate_gateway_payment(
            CUSTOMER,
            PaymentTarget::WalletCharge { amount: 10_000 },
            GatewayId::Zibal,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PaymentInProgress);

    h.gateway
        .answer(&checkout.track_id, GatewayStatus::PaidVerified, 50_000);
    for _ in 0..2 {
        h.state
            .payments
            .handle_callback(&callback(1, &checkout.track_id, GatewayStatus::PaidVerified))
            .await
            .unwrap();
    }

    assert_eq!(h.balance(CUSTOMER).await, 50_000);
    let payment = h.store.payments().await.remove(0);
    assert_eq!(payment.purpose, PaymentPurpose::WalletCharge);
    let deposits: Vec<_> = h
        .store
        .financial_records()
        .await
        .into_iter()
        .filter(|r| r.record_type == TransactionType::Deposit)
        .collect();
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].payment_id, Some(payment.id));
}

#[tokio::test]
async fn test_initiation_refused_while_gateway_down() {
    let h = Harness::new().await;
    let (order, _, _) = h.scenario_order().await;
    h.state.gateways.set_available(GatewayId::Zibal, false);

    let err = h
        .state
        .payments
        .select_payment(CUSTOMER, order.order.id, &by_gateway())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::GatewayUnavailable);
    assert_eq!(h.order(order.order.id).await.status, OrderStatus::Unpaid);
    assert!(h.store.payments().await.is_empty());
}
