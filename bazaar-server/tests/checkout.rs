//! Checkout, reservation and unpaid-order cancellation

mod common;

use bazaar_server::config::CommerceSettings;
use bazaar_server::tasks::TaskPayload;
use common::{CUSTOMER, Harness, MINUTE, SELLER};
use shared::error::ErrorCode;
use shared::models::{CancelledBy, OrderStatus, UserRole};
use shared::util::now_millis;

#[tokio::test]
async fn test_checkout_reserves_stock_and_empties_cart() {
    let h = Harness::new().await;
    let (order, a, b) = h.scenario_order().await;

    assert_eq!(order.order.total_price, 3950);
    assert_eq!(order.total_price(), 3950);
    assert_eq!(order.order.status, OrderStatus::Unpaid);
    assert_eq!(order.items.len(), 2);

    let a = h.variant_row(a.id).await;
    let b = h.variant_row(b.id).await;
    assert_eq!((a.on_hand_stock, a.reserved_stock), (15, 10));
    assert_eq!((b.on_hand_stock, b.reserved_stock), (50, 10));

    let cart = h.state.carts.get_cart(CUSTOMER).await.unwrap();
    assert!(cart.items.is_empty());

    // Exactly one auto-cancel timer for the new order
    let timers: Vec<_> = h
        .store
        .tasks()
        .await
        .into_iter()
        .filter(|t| t.payload == TaskPayload::AutoCancelOrder { order_id: order.order.id })
        .collect();
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].run_at, order.order.created_at + 30 * MINUTE);
}

#[tokio::test]
async fn test_concurrent_checkout_of_last_unit() {
    let h = Harness::new().await;
    let first = h.customer(201).await;
    let second = h.customer(202).await;
    let last = h.variant(500, 1).await;
    h.state.carts.add_item(201, last.id, 1).await.unwrap();
    h.state.carts.add_item(202, last.id, 1).await.unwrap();

    let (r1, r2) = tokio::join!(h.checkout(201, first), h.checkout(202, second));

    let results = [r1, r2];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(loser.code(), ErrorCode::InsufficientStock);

    let row = h.variant_row(last.id).await;
    assert_eq!(row.reserved_stock, 1);
    assert!(row.reserved_stock <= row.on_hand_stock);
}

#[tokio::test]
async fn test_second_order_with_same_seller_is_rejected() {
    let h = Harness::new().await;
    let (_, a, _) = h.scenario_order().await;
    let address = h.customer(CUSTOMER).await;

    h.state.carts.add_item(CUSTOMER, a.id, 1).await.unwrap();
    let err = h.checkout(CUSTOMER, address).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::OrderOngoingExists);

    // Rejected without touching the cart or stock
    let cart = h.state.carts.get_cart(CUSTOMER).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(h.variant_row(a.id).await.reserved_stock, 10);
}

#[tokio::test]
async fn test_checkout_rejects_foreign_address() {
    let h = Harness::new().await;
    h.customer(CUSTOMER).await;
    let other_address = h.customer(300).await;
    let v = h.variant(100, 5).await;
    h.state.carts.add_item(CUSTOMER, v.id, 1).await.unwrap();

    let err = h.checkout(CUSTOMER, other_address).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::OrderInvalidAddress);
    assert_eq!(h.variant_row(v.id).await.reserved_stock, 0);
}

#[tokio::test]
async fn test_customer_cancel_releases_reservation() {
    let h = Harness::new().await;
    let (order, a, b) = h.scenario_order().await;

    let cancelled = h
        .state
        .orders
        .customer_cancel(CUSTOMER, order.order.id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Customer));
    assert_eq!(h.variant_row(a.id).await.reserved_stock, 0);
    assert_eq!(h.variant_row(b.id).await.reserved_stock, 0);

    // A cancelled order is terminal
    let err = h
        .state
        .orders
        .customer_cancel(CUSTOMER, order.order.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OrderFinished);
}

#[tokio::test]
async fn test_unpaid_order_is_cancelled_by_timer() {
    let h = Harness::new().await;
    let (order, a, b) = h.scenario_order().await;
    let worker = h.worker();

    // Not due yet
    assert_eq!(worker.process_due_at(now_millis() + 10 * MINUTE).await.unwrap(), 0);
    assert_eq!(h.order(order.order.id).await.status, OrderStatus::Unpaid);

    assert_eq!(worker.process_due_at(now_millis() + 31 * MINUTE).await.unwrap(), 1);
    let cancelled = h.order(order.order.id).await;
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Server));
    assert_eq!(h.variant_row(a.id).await.reserved_stock, 0);
    assert_eq!(h.variant_row(b.id).await.reserved_stock, 0);

    // Running the worker again changes nothing
    assert_eq!(worker.process_due_at(now_millis() + 40 * MINUTE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_order_is_held_while_no_gateway_is_up() {
    let h = Harness::new().await;
    h.gateway.set_healthy(false);
    h.state.refresh_gateways().await;
    assert!(h.state.gateways.available_gateways().is_empty());

    let (order, _, _) = h.scenario_order().await;
    assert_eq!(order.order.status, OrderStatus::OnHold);

    h.gateway.set_healthy(true);
    h.state.refresh_gateways().await;
    assert_eq!(h.order(order.order.id).await.status, OrderStatus::Unpaid);
}

#[tokio::test]
async fn test_add_item_reports_first_broken_rule() {
    let h = Harness::new().await;
    h.customer(CUSTOMER).await;
    let ours = h.variant(100, 5).await;

    // A second seller, not verified yet
    h.state
        .accounts
        .provision_account(101, UserRole::Seller)
        .await
        .unwrap();
    let theirs = h.store.insert_variant(101, "Other", 100, 5).await;

    h.state.carts.add_item(CUSTOMER, ours.id, 1).await.unwrap();
    // Mixed sellers wins over the inactive seller
    let err = h.state.carts.add_item(CUSTOMER, theirs.id, 1).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CartMixedSellers);

    h.state.carts.clear_cart(CUSTOMER).await.unwrap();
    // Stock wins over the inactive seller
    let err = h.state.carts.add_item(CUSTOMER, theirs.id, 6).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InsufficientStock);
    let err = h.state.carts.add_item(CUSTOMER, theirs.id, 1).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::SellerInactive);

    // The seller shopping in their own catalog
    h.store.set_variant_flags(ours.id, false, true).await;
    let err = h.state.carts.add_item(SELLER, ours.id, 1).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProductDisabled);
    h.store.set_variant_flags(ours.id, true, true).await;
    let err = h.state.carts.add_item(SELLER, ours.id, 1).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CartOwnProduct);

    let cart = h.state.carts.get_cart(CUSTOMER).await.unwrap();
    assert!(cart.items.is_empty());
}

#[tokio::test]
async fn test_add_item_merges_lines_without_overflow() {
    let h = Harness::new().await;
    h.customer(CUSTOMER).await;
    let v = h.variant(100, 5).await;

    let first = h.state.carts.add_item(CUSTOMER, v.id, 1).await.unwrap();
    let merged = h.state.carts.add_item(CUSTOMER, v.id, 2).await.unwrap();
    assert_eq!(merged.id, first.id);
    assert_eq!(merged.quantity, 3);

    let err = h
        .state
        .carts
        .add_item(CUSTOMER, v.id, i32::MAX)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CartQuantityInvalid);

    let cart = h.state.carts.get_cart(CUSTOMER).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 3);
}

#[tokio::test]
async fn test_validation_report_after_stock_drops() {
    let h = Harness::new().await;
    h.customer(CUSTOMER).await;
    let rival = h.customer(201).await;
    let v = h.variant(100, 12).await;
    let other = h.variant(50, 100).await;

    let short = h.state.carts.add_item(CUSTOMER, v.id, 10).await.unwrap();
    h.state.carts.add_item(CUSTOMER, other.id, 1).await.unwrap();
    assert!(
        h.state
            .carts
            .validate_cart_for_checkout(CUSTOMER)
            .await
            .unwrap()
            .is_empty()
    );

    // Someone else reserves five units first
    h.state.carts.add_item(201, v.id, 5).await.unwrap();
    h.checkout(201, rival).await.unwrap();

    let report = h
        .state
        .carts
        .validate_cart_for_checkout(CUSTOMER)
        .await
        .unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report.get(&short.id), Some(&vec![ErrorCode::InsufficientStock]));
}

#[tokio::test]
async fn test_checkout_of_empty_cart() {
    let h = Harness::new().await;
    let address = h.customer(CUSTOMER).await;

    let err = h.checkout(CUSTOMER, address).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CartEmpty);
    let err = h
        .state
        .carts
        .validate_cart_for_checkout(CUSTOMER)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CartEmpty);
}

#[tokio::test]
async fn test_checkout_below_seller_minimum() {
    let settings = CommerceSettings {
        default_order_minimum: 5000,
        ..CommerceSettings::default()
    };
    let h = Harness::build(settings, Vec::new()).await;
    let address = h.customer(CUSTOMER).await;
    let v = h.variant(195, 15).await;
    h.state.carts.add_item(CUSTOMER, v.id, 10).await.unwrap();

    let err = h.checkout(CUSTOMER, address).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::OrderBelowMinimum);

    // Nothing reserved, cart kept
    assert_eq!(h.variant_row(v.id).await.reserved_stock, 0);
    let cart = h.state.carts.get_cart(CUSTOMER).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert!(h.store.tasks().await.is_empty());
}
