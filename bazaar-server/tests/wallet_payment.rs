//! Paying orders from the wallet and refunding them

mod common;

use common::{CUSTOMER, Harness, SELLER};
use shared::error::ErrorCode;
use shared::models::{
    CancelledBy, GatewayId, GatewayStatus, OrderStatus, PaymentMethod, TransactionType,
};
use shared::request::{GatewayCallbackQuery, PayOrderRequest, SellerOrderUpdate};
use shared::response::PaymentSelection;

#[tokio::test]
async fn test_insufficient_balance_changes_nothing() {
    let h = Harness::new().await;
    let (order, _, _) = h.scenario_order().await;
    h.fund(CUSTOMER, 1000).await;
    let records_before = h.store.financial_records().await.len();

    let err = h
        .state
        .orders
        .pay_with_wallet(CUSTOMER, order.order.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InsufficientFunds);

    assert_eq!(h.balance(CUSTOMER).await, 1000);
    assert_eq!(h.store.financial_records().await.len(), records_before);
    assert_eq!(h.order(order.order.id).await.status, OrderStatus::Unpaid);
}

#[tokio::test]
async fn test_wallet_payment_marks_order_paid() {
    let h = Harness::new().await;
    let (order, _, _) = h.scenario_order().await;
    h.fund(CUSTOMER, 5000).await;

    let selection = h
        .state
        .payments
        .select_payment(
            CUSTOMER,
            order.order.id,
            &PayOrderRequest {
                method: PaymentMethod::Wallet,
                gateway_id: None,
            },
        )
        .await
        .unwrap();
    let PaymentSelection::Wallet { record } = selection else {
        panic!("expected a wallet payment");
    };
    assert_eq!(record.record_type, TransactionType::WalletPayment);
    assert_eq!(record.amount, 3950);
    assert_eq!(record.order_id, Some(order.order.id));

    assert_eq!(h.balance(CUSTOMER).await, 1050);
    let paid = h.order(order.order.id).await;
    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(paid.payment_method, Some(PaymentMethod::Wallet));
    assert!(paid.paid_at.is_some());

    // Paying twice is refused
    let err = h
        .state
        .orders
        .pay_with_wallet(CUSTOMER, order.order.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OrderNotPayable);
    assert_eq!(h.balance(CUSTOMER).await, 1050);
}

#[tokio::test]
async fn test_gateway_choice_needs_a_gateway_id() {
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
                gateway_id: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PaymentMethodInvalid);
}

#[tokio::test]
async fn test_seller_cancel_refunds_wallet_payment() {
    let h = Harness::new().await;
    let (order, a, b) = h.scenario_order().await;
    h.fund(CUSTOMER, 3950).await;
    h.state
        .orders
        .pay_with_wallet(CUSTOMER, order.order.id)
        .await
        .unwrap();
    assert_eq!(h.balance(CUSTOMER).await, 0);

    // A reason is mandatory
    let err = h
        .state
        .orders
        .seller_update(
            SELLER,
            order.order.id,
            &SellerOrderUpdate {
                status: OrderStatus::Cancelled,
                tracking_code: None,
                cancel_reason: Some("  ".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CancelReasonRequired);

    let cancelled = h
        .state
        .orders
        .seller_update(
            SELLER,
            order.order.id,
            &SellerOrderUpdate {
                status: OrderStatus::Cancelled,
                tracking_code: None,
                cancel_reason: Some("Out of stock in the warehouse".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Seller));

    assert_eq!(h.balance(CUSTOMER).await, 3950);
    assert_eq!(h.variant_row(a.id).await.reserved_stock, 0);
    assert_eq!(h.variant_row(b.id).await.reserved_stock, 0);

    let refunds: Vec<_> = h
        .store
        .financial_records()
        .await
        .into_iter()
        .filter(|r| r.record_type == TransactionType::WalletRefund)
        .collect();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].order_id, Some(order.order.id));
}

#[tokio::test]
async fn test_seller_cancel_of_gateway_order_queues_transfer() {
    let h = Harness::new().await;
    let (order, a, _) = h.scenario_order().await;
    h.state
        .payments
        .select_payment(
            CUSTOMER,
            order.order.id,
            &PayOrderRequest {
                method: PaymentMethod::Gateway,
                gateway_id: Some(GatewayId::Zibal),
            },
        )
        .await
        .unwrap();
    h.gateway.answer("5000", GatewayStatus::PaidVerified, 3950);
    h.state
        .payments
        .handle_callback(&GatewayCallbackQuery {
            success: 1,
            track_id: "5000".to_string(),
            order_id: None,
            status: GatewayStatus::PaidVerified.code(),
        })
        .await
        .unwrap();
    assert_eq!(h.order(order.order.id).await.status, OrderStatus::Paid);

    let cancelled = h
        .state
        .orders
        .seller_update(
            SELLER,
            order.order.id,
            &SellerOrderUpdate {
                status: OrderStatus::Cancelled,
                tracking_code: None,
                cancel_reason: Some("Damaged in storage".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Seller));
    assert_eq!(h.variant_row(a.id).await.reserved_stock, 0);

    // Card money goes back by manual transfer, not into the wallet
    assert_eq!(h.balance(CUSTOMER).await, 0);
    let transfers = h.store.money_transfers().await;
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].requested_by, CUSTOMER);
    assert_eq!(transfers[0].order_id, Some(order.order.id));
    assert_eq!(transfers[0].amount, 3950);
    assert!(!transfers[0].is_paid);

    let refunds: Vec<_> = h
        .store
        .financial_records()
        .await
        .into_iter()
        .filter(|r| r.record_type == TransactionType::DirectRefund)
        .collect();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, 3950);
    assert_eq!(refunds[0].order_id, Some(order.order.id));
    assert_eq!(refunds[0].wallet_id, None);
}

#[tokio::test]
async fn test_seller_cannot_cancel_unpaid_order() {
    let h = Harness::new().await;
    let (order, _, _) = h.scenario_order().await;

    let err = h
        .state
        .orders
        .seller_update(
            SELLER,
            order.order.id,
            &SellerOrderUpdate {
                status: OrderStatus::Cancelled,
                tracking_code: None,
                cancel_reason: Some("changed my mind".to_string()),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStatusTransition);
    assert_eq!(h.order(order.order.id).await.status, OrderStatus::Unpaid);
}

#[tokio::test]
async fn test_withdrawal_request_lifecycle() {
    let h = Harness::new().await;
    h.customer(CUSTOMER).await;
    let card = h
        .state
        .accounts
        .add_bank_card(CUSTOMER, "6037-9911-2233-4455")
        .await
        .unwrap();
    h.fund(CUSTOMER, 250_000).await;

    let err = h
        .state
        .wallet
        .request_withdrawal(CUSTOMER, card.id, 50_000)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::WithdrawalBelowMinimum);

    let request = h
        .state
        .wallet
        .request_withdrawal(CUSTOMER, card.id, 200_000)
        .await
        .unwrap();
    assert_eq!(request.amount, 200_000);

    let err = h
        .state
        .wallet
        .request_withdrawal(CUSTOMER, card.id, 150_000)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::WithdrawalPending);

    let updated = h
        .state
        .wallet
        .update_withdrawal_request(CUSTOMER, 120_000)
        .await
        .unwrap();
    assert_eq!(updated.id, request.id);
    assert_eq!(updated.amount, 120_000);

    // Requests do not move money
    assert_eq!(h.balance(CUSTOMER).await, 250_000);
}
