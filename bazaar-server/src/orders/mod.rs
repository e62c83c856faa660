//! Order lifecycle
//!
//! Owns every order status change. Each transition runs in one storage
//! transaction together with its stock, wallet and task side effects:
//!
//! - `checkout`: cart → order, stock reserved, auto-cancel scheduled
//! - wallet payment, customer cancel, seller updates
//! - timer handlers (auto-cancel, delivery confirmation)
//! - hooks used by the payment coordinator for gateway attempts
//!
//! See [`shared::models::OrderStatus`] for the state machine.

mod checkout;
mod transitions;

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::RoundingStrategy;
use shared::error::{AppError, ErrorCode};
use shared::models::{Order, OrderDetail, OrderItem, UserRole};
use shared::request::PaginationQuery;

use crate::config::CommerceSettings;
use crate::error::{ServiceError, ServiceResult};
use crate::ledger::{StockLedger, StockQuantities, WalletLedger};
use crate::payments::gateway::GatewayRegistry;
use crate::store::{OrderFilter, Store, StoreTx};

#[derive(Clone)]
pub struct OrderLifecycle {
    store: Arc<dyn Store>,
    stock: StockLedger,
    wallet: WalletLedger,
    gateways: GatewayRegistry,
    settings: Arc<CommerceSettings>,
}

/// Seller's part of an order total after the platform commission
///
/// The commission is rounded half away from zero to whole units.
pub fn seller_share(total: i64, commission_rate: Decimal) -> Option<i64> {
    let fee = (Decimal::from(total) * commission_rate)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()?;
    Some(total - fee)
}

fn quantities(items: &[OrderItem]) -> StockQuantities {
    let mut q = StockQuantities::new();
    for item in items {
        *q.entry(item.variant_id).or_insert(0) += item.quantity;
    }
    q
}

fn order_not_found(order_id: i64) -> ServiceError {
    AppError::new(ErrorCode::OrderNotFound)
        .with_detail("orderId", order_id)
        .into()
}

impl OrderLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        stock: StockLedger,
        wallet: WalletLedger,
        gateways: GatewayRegistry,
        settings: Arc<CommerceSettings>,
    ) -> Self {
        Self {
            store,
            stock,
            wallet,
            gateways,
            settings,
        }
    }

    /// Deadline after which an unpaid order is cancelled
    pub(crate) fn payment_deadline(&self, order: &Order) -> i64 {
        order.created_at + self.settings.order_timeout_millis()
    }

    /// Lock an order that must belong to `customer_id`
    async fn lock_customer_order(
        tx: &mut dyn StoreTx,
        customer_id: i64,
        order_id: i64,
    ) -> ServiceResult<Order> {
        match tx.lock_order(order_id).await? {
            Some(order) if order.customer_id == customer_id => Ok(order),
            _ => Err(order_not_found(order_id)),
        }
    }

    /// Order with items, visible to its customer, its seller and admins
    pub async fn get_order(
        &self,
        viewer_id: i64,
        role: UserRole,
        order_id: i64,
    ) -> ServiceResult<OrderDetail> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .order(order_id)
            .await?
            .filter(|o| {
                role == UserRole::Admin || o.customer_id == viewer_id || o.seller_id == viewer_id
            })
            .ok_or_else(|| order_not_found(order_id))?;
        let items = tx.order_items(order.id).await?;
        Ok(OrderDetail { order, items })
    }

    pub async fn list_customer_orders(
        &self,
        customer_id: i64,
        page: &PaginationQuery,
    ) -> ServiceResult<Vec<Order>> {
        self.list(OrderFilter::Customer(customer_id), page).await
    }

    pub async fn list_seller_orders(
        &self,
        seller_id: i64,
        page: &PaginationQuery,
    ) -> ServiceResult<Vec<Order>> {
        self.list(OrderFilter::Seller(seller_id), page).await
    }

    async fn list(&self, filter: OrderFilter, page: &PaginationQuery) -> ServiceResult<Vec<Order>> {
        let mut tx = self.store.begin().await?;
        let orders = tx
            .list_orders(filter, i64::from(page.limit()), page.offset())
            .await?;
        Ok(orders)
    }
}
