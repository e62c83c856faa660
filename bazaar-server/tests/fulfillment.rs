//! Seller fulfilment and delivery confirmation

mod common;

use std::str::FromStr;

use common::{CUSTOMER, DAY, Harness, SELLER};
use rust_decimal::Decimal;
use shared::error::ErrorCode;
use shared::models::{OrderStatus, TransactionType};
use shared::request::SellerOrderUpdate;
use shared::util::now_millis;

fn ship(tracking: Option<&str>) -> SellerOrderUpdate {
    SellerOrderUpdate {
        status: OrderStatus::Shipped,
        tracking_code: tracking.map(str::to_string),
        cancel_reason: None,
    }
}

/// Scenario order, paid from the wallet
async fn paid_order(h: &Harness) -> (i64, i64, i64) {
    let (order, a, b) = h.scenario_order().await;
    h.fund(CUSTOMER, 3950).await;
    h.state
        .orders
        .pay_with_wallet(CUSTOMER, order.order.id)
        .await
        .unwrap();
    (order.order.id, a.id, b.id)
}

#[tokio::test]
async fn test_ship_requires_tracking_code() {
    let h = Harness::new().await;
    let (order_id, _, _) = paid_order(&h).await;

    let err = h
        .state
        .orders
        .seller_update(SELLER, order_id, &ship(None))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TrackingCodeRequired);
    assert_eq!(h.order(order_id).await.status, OrderStatus::Paid);
}

#[tokio::test]
async fn test_other_seller_cannot_touch_order() {
    let h = Harness::new().await;
    let (order_id, _, _) = paid_order(&h).await;

    let err = h
        .state
        .orders
        .seller_update(SELLER + 1, order_id, &ship(Some("TRK-1")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OrderNotFound);
}

#[tokio::test]
async fn test_shipping_consumes_stock_once() {
    let h = Harness::new().await;
    let (order_id, a, b) = paid_order(&h).await;

    h.state
        .orders
        .seller_update(
            SELLER,
            order_id,
            &SellerOrderUpdate {
                status: OrderStatus::Processing,
                tracking_code: None,
                cancel_reason: None,
            },
        )
        .await
        .unwrap();

    let shipped = h
        .state
        .orders
        .seller_update(SELLER, order_id, &ship(Some("TRK-1")))
        .await
        .unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);
    assert_eq!(shipped.tracking_code.as_deref(), Some("TRK-1"));
    assert!(shipped.shipped_at.is_some());

    let a_row = h.variant_row(a).await;
    let b_row = h.variant_row(b).await;
    assert_eq!((a_row.on_hand_stock, a_row.reserved_stock), (5, 0));
    assert_eq!((b_row.on_hand_stock, b_row.reserved_stock), (40, 0));

    // Shipping again only corrects the tracking code
    let corrected = h
        .state
        .orders
        .seller_update(SELLER, order_id, &ship(Some("TRK-2")))
        .await
        .unwrap();
    assert_eq!(corrected.tracking_code.as_deref(), Some("TRK-2"));
    assert_eq!(corrected.shipped_at, shipped.shipped_at);
    let a_row = h.variant_row(a).await;
    assert_eq!((a_row.on_hand_stock, a_row.reserved_stock), (5, 0));
}

#[tokio::test]
async fn test_delivery_timer_completes_order_and_pays_seller() {
    let h = Harness::new().await;
    let (order_id, _, _) = paid_order(&h).await;
    h.state
        .orders
        .seller_update(SELLER, order_id, &ship(Some("TRK-1")))
        .await
        .unwrap();
    let worker = h.worker();

    // Still in transit two days later
    worker.process_due_at(now_millis() + 2 * DAY).await.unwrap();
    assert_eq!(h.order(order_id).await.status, OrderStatus::Shipped);
    assert_eq!(h.balance(SELLER).await, 0);

    worker.process_due_at(now_millis() + 14 * DAY).await.unwrap();
    let completed = h.order(order_id).await;
    assert_eq!(completed.status, OrderStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert_eq!(h.balance(SELLER).await, 3851);

    let revenue: Vec<_> = h
        .store
        .financial_records()
        .await
        .into_iter()
        .filter(|r| r.record_type == TransactionType::OrderRevenue)
        .collect();
    assert_eq!(revenue.len(), 1);
    assert_eq!(revenue[0].amount, 3851);
    assert_eq!(revenue[0].order_id, Some(order_id));
    assert_eq!(
        revenue[0].commission_rate,
        Some(Decimal::from_str("0.025").unwrap())
    );

    // The seller is credited exactly once
    h.state.orders.confirm_delivery(order_id).await.unwrap();
    assert_eq!(h.balance(SELLER).await, 3851);
}

#[tokio::test]
async fn test_completed_order_rejects_seller_updates() {
    let h = Harness::new().await;
    let (order_id, _, _) = paid_order(&h).await;
    h.state
        .orders
        .seller_update(SELLER, order_id, &ship(Some("TRK-1")))
        .await
        .unwrap();
    h.state.orders.confirm_delivery(order_id).await.unwrap();

    let err = h
        .state
        .orders
        .seller_update(SELLER, order_id, &ship(Some("TRK-9")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OrderFinished);
}
