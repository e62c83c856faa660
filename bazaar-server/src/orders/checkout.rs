//! Checkout: turn the customer's cart into an order

use serde_json::json;
use shared::error::{AppError, ErrorCode};
use shared::models::{OrderDetail, OrderStatus};
use shared::request::CheckoutRequest;
use shared::response::CartValidationReport;
use shared::util::now_millis;

use super::OrderLifecycle;
use crate::cart::check_items;
use crate::error::ServiceResult;
use crate::ledger::StockQuantities;
use crate::store::{NewOrder, NewOrderItem};
use crate::tasks::TaskPayload;

impl OrderLifecycle {
    /// Create an order from the whole cart
    ///
    /// Rejected without side effects when the cart is empty or invalid, the
    /// address is not the customer's, an ongoing order with the same seller
    /// exists, the total is below the seller minimum, or stock is short.
    /// The order starts `ON_HOLD` when no payment gateway is available.
    pub async fn checkout(
        &self,
        customer_id: i64,
        req: &CheckoutRequest,
    ) -> ServiceResult<OrderDetail> {
        let mut tx = self.store.begin().await?;
        let cart = tx
            .lock_cart(customer_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::AccountNotFound))?;
        let items = tx.cart_items(cart.id).await?;
        if items.is_empty() {
            return Err(AppError::new(ErrorCode::CartEmpty).into());
        }

        match tx.address(req.customer_address_id).await? {
            Some(address) if address.user_id == customer_id => {}
            _ => {
                return Err(AppError::new(ErrorCode::OrderInvalidAddress)
                    .with_detail("customerAddressId", req.customer_address_id)
                    .into());
            }
        }

        let check = check_items(tx.as_mut(), customer_id, &items).await?;
        // Stock is decided by the reservation below, under row locks
        let blocking: CartValidationReport = check
            .report
            .into_iter()
            .filter_map(|(item_id, codes)| {
                let codes: Vec<ErrorCode> = codes
                    .into_iter()
                    .filter(|c| *c != ErrorCode::InsufficientStock)
                    .collect();
                (!codes.is_empty()).then_some((item_id, codes))
            })
            .collect();
        if !blocking.is_empty() {
            return Err(AppError::with_message(
                ErrorCode::ValidationFailed,
                "Some cart items cannot be ordered",
            )
            .with_detail("items", json!(blocking))
            .into());
        }
        let Some(seller_id) = check.seller_id else {
            return Err(AppError::new(ErrorCode::CartEmpty).into());
        };

        if tx.has_ongoing_order(customer_id, seller_id).await? {
            return Err(AppError::new(ErrorCode::OrderOngoingExists)
                .with_detail("sellerId", seller_id)
                .into());
        }

        let mut wanted = StockQuantities::new();
        for item in &items {
            *wanted.entry(item.variant_id).or_insert(0) += item.quantity;
        }
        let locked = self.stock.reserve(tx.as_mut(), &wanted).await?;

        // Prices are frozen from the locked rows
        let lines: Vec<NewOrderItem> = items
            .iter()
            .filter_map(|item| {
                locked
                    .iter()
                    .find(|v| v.id == item.variant_id)
                    .map(|v| NewOrderItem {
                        variant_id: v.id,
                        submitted_price: v.price,
                        quantity: item.quantity,
                    })
            })
            .collect();
        let total_price: i64 = lines
            .iter()
            .map(|l| l.submitted_price * i64::from(l.quantity))
            .sum();

        let minimum = tx
            .seller_profile(seller_id)
            .await?
            .and_then(|p| p.minimum_order_amount)
            .unwrap_or(self.settings.default_order_minimum);
        if total_price < minimum {
            return Err(AppError::new(ErrorCode::OrderBelowMinimum)
                .with_detail("minimum", minimum)
                .with_detail("total", total_price)
                .into());
        }

        let status = if self.gateways.any_available() {
            OrderStatus::Unpaid
        } else {
            OrderStatus::OnHold
        };
        let now = now_millis();
        let order = tx
            .insert_order(&NewOrder {
                customer_id,
                seller_id,
                customer_address_id: req.customer_address_id,
                status,
                total_price,
                customer_notes: req.notes.as_deref(),
                now,
            })
            .await?;
        let order_items = tx.insert_order_items(order.id, &lines).await?;
        tx.clear_cart(cart.id).await?;

        let timer = TaskPayload::AutoCancelOrder { order_id: order.id }
            .at(self.payment_deadline(&order));
        tx.schedule_task(&timer).await?;

        tx.commit().await?;

        tracing::info!(
            order_id = order.id,
            customer_id,
            seller_id,
            total_price,
            status = order.status.as_str(),
            "Order created"
        );
        Ok(OrderDetail {
            order,
            items: order_items,
        })
    }
}
