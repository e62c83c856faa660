//! In-process store
//!
//! One transaction at a time: `begin` takes the state mutex and works on a
//! copy that replaces the shared state on commit. Used by tests and local
//! development; the database constraints of the migrations are mirrored
//! as [`StoreError::Conflict`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use shared::models::{
    Account, BankCard, Cart, CartItem, CustomerAddress, FinancialRecord, MoneyTransferRequest,
    Order, OrderItem, OrderStatus, Payment, PaymentPurpose, PaymentStatus, ProductVariant,
    SellerProfile, UserRole, Wallet, WithdrawalRequest, WithdrawalStatus,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    NewFinancialRecord, NewMoneyTransfer, NewOrder, NewOrderItem, NewPayment, NewWithdrawal,
    OrderFilter, Store, StoreError, StoreResult, StoreTx,
};
use crate::tasks::{DeferredTask, NewTask, TaskStatus};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: i64,
    accounts: BTreeMap<i64, Account>,
    seller_profiles: BTreeMap<i64, SellerProfile>,
    addresses: BTreeMap<i64, CustomerAddress>,
    bank_cards: BTreeMap<i64, BankCard>,
    variants: BTreeMap<i64, ProductVariant>,
    carts: BTreeMap<i64, Cart>,
    cart_items: BTreeMap<i64, CartItem>,
    orders: BTreeMap<i64, Order>,
    order_items: BTreeMap<i64, OrderItem>,
    payments: BTreeMap<i64, Payment>,
    wallets: BTreeMap<i64, Wallet>,
    records: BTreeMap<i64, FinancialRecord>,
    withdrawals: BTreeMap<i64, WithdrawalRequest>,
    transfers: BTreeMap<i64, MoneyTransferRequest>,
    tasks: BTreeMap<i64, DeferredTask>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a catalog variant (the catalog service owns these rows in production)
    pub async fn insert_variant(
        &self,
        seller_id: i64,
        name: &str,
        price: i64,
        on_hand_stock: i32,
    ) -> ProductVariant {
        let mut state = self.state.lock().await;
        let variant = ProductVariant {
            id: state.next_id(),
            seller_id,
            name: name.to_string(),
            price,
            on_hand_stock,
            reserved_stock: 0,
            is_enabled: true,
            is_available: true,
        };
        state.variants.insert(variant.id, variant.clone());
        variant
    }

    /// Toggle catalog flags of a variant
    pub async fn set_variant_flags(&self, id: i64, is_enabled: bool, is_available: bool) {
        let mut state = self.state.lock().await;
        if let Some(v) = state.variants.get_mut(&id) {
            v.is_enabled = is_enabled;
            v.is_available = is_available;
        }
    }

    pub async fn tasks(&self) -> Vec<DeferredTask> {
        self.state.lock().await.tasks.values().cloned().collect()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.values().cloned().collect()
    }

    pub async fn money_transfers(&self) -> Vec<MoneyTransferRequest> {
        self.state.lock().await.transfers.values().cloned().collect()
    }

    pub async fn financial_records(&self) -> Vec<FinancialRecord> {
        self.state.lock().await.records.values().cloned().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

fn conflict(constraint: &str) -> StoreError {
    StoreError::Conflict(constraint.to_string())
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }

    // ========== Accounts ==========

    async fn account(&mut self, user_id: i64) -> StoreResult<Option<Account>> {
        Ok(self.work.accounts.get(&user_id).cloned())
    }

    async fn insert_account(
        &mut self,
        user_id: i64,
        role: UserRole,
        now: i64,
    ) -> StoreResult<Option<Account>> {
        if self.work.accounts.contains_key(&user_id) {
            return Ok(None);
        }
        let account = Account {
            user_id,
            role,
            created_at: now,
        };
        self.work.accounts.insert(user_id, account.clone());
        Ok(Some(account))
    }

    async fn seller_profile(&mut self, user_id: i64) -> StoreResult<Option<SellerProfile>> {
        Ok(self.work.seller_profiles.get(&user_id).cloned())
    }

    async fn upsert_seller_profile(&mut self, profile: &SellerProfile) -> StoreResult<()> {
        self.work
            .seller_profiles
            .insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn address(&mut self, id: i64) -> StoreResult<Option<CustomerAddress>> {
        Ok(self.work.addresses.get(&id).cloned())
    }

    async fn insert_address(
        &mut self,
        user_id: i64,
        address: &str,
        postal_code: Option<&str>,
    ) -> StoreResult<CustomerAddress> {
        let row = CustomerAddress {
            id: self.work.next_id(),
            user_id,
            address: address.to_string(),
            postal_code: postal_code.map(str::to_string),
        };
        self.work.addresses.insert(row.id, row.clone());
        Ok(row)
    }

    async fn bank_card(&mut self, id: i64) -> StoreResult<Option<BankCard>> {
        Ok(self.work.bank_cards.get(&id).cloned())
    }

    async fn insert_bank_card(&mut self, user_id: i64, card_number: &str) -> StoreResult<BankCard> {
        let row = BankCard {
            id: self.work.next_id(),
            user_id,
            card_number: card_number.to_string(),
        };
        self.work.bank_cards.insert(row.id, row.clone());
        Ok(row)
    }

    // ========== Stock ==========

    async fn variant(&mut self, id: i64) -> StoreResult<Option<ProductVariant>> {
        Ok(self.work.variants.get(&id).cloned())
    }

    async fn variants(&mut self, ids: &[i64]) -> StoreResult<Vec<ProductVariant>> {
        Ok(self
            .work
            .variants
            .values()
            .filter(|v| ids.contains(&v.id))
            .cloned()
            .collect())
    }

    async fn lock_variants(&mut self, ids: &[i64]) -> StoreResult<Vec<ProductVariant>> {
        self.variants(ids).await
    }

    async fn update_variant_stock(
        &mut self,
        id: i64,
        on_hand_stock: i32,
        reserved_stock: i32,
    ) -> StoreResult<()> {
        if on_hand_stock < 0 || reserved_stock < 0 || reserved_stock > on_hand_stock {
            return Err(conflict("reserved_within_on_hand"));
        }
        if let Some(v) = self.work.variants.get_mut(&id) {
            v.on_hand_stock = on_hand_stock;
            v.reserved_stock = reserved_stock;
        }
        Ok(())
    }

    // ========== Carts ==========

    async fn insert_cart(&mut self, user_id: i64) -> StoreResult<Cart> {
        if let Some(cart) = self.work.carts.values().find(|c| c.user_id == user_id) {
            return Ok(cart.clone());
        }
        let cart = Cart {
            id: self.work.next_id(),
            user_id,
        };
        self.work.carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn cart(&mut self, user_id: i64) -> StoreResult<Option<Cart>> {
        Ok(self
            .work
            .carts
            .values()
            .find(|c| c.user_id == user_id)
            .cloned())
    }

    async fn lock_cart(&mut self, user_id: i64) -> StoreResult<Option<Cart>> {
        self.cart(user_id).await
    }

    async fn cart_items(&mut self, cart_id: i64) -> StoreResult<Vec<CartItem>> {
        Ok(self
            .work
            .cart_items
            .values()
            .filter(|i| i.cart_id == cart_id)
            .cloned()
            .collect())
    }

    async fn upsert_cart_item(
        &mut self,
        cart_id: i64,
        variant_id: i64,
        quantity: i32,
    ) -> StoreResult<CartItem> {
        if quantity <= 0 {
            return Err(conflict("cart_items_quantity_check"));
        }
        if let Some(item) = self
            .work
            .cart_items
            .values_mut()
            .find(|i| i.cart_id == cart_id && i.variant_id == variant_id)
        {
            item.quantity = quantity;
            return Ok(item.clone());
        }
        let item = CartItem {
            id: self.work.next_id(),
            cart_id,
            variant_id,
            quantity,
        };
        self.work.cart_items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn delete_cart_item(&mut self, cart_id: i64, item_id: i64) -> StoreResult<bool> {
        match self.work.cart_items.get(&item_id) {
            Some(item) if item.cart_id == cart_id => {
                self.work.cart_items.remove(&item_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_cart(&mut self, cart_id: i64) -> StoreResult<u64> {
        let before = self.work.cart_items.len();
        self.work.cart_items.retain(|_, i| i.cart_id != cart_id);
        Ok((before - self.work.cart_items.len()) as u64)
    }

    // ========== Orders ==========

    async fn insert_order(&mut self, order: &NewOrder<'_>) -> StoreResult<Order> {
        let row = Order {
            id: self.work.next_id(),
            customer_id: order.customer_id,
            seller_id: order.seller_id,
            customer_address_id: order.customer_address_id,
            status: order.status,
            total_price: order.total_price,
            payment_method: None,
            customer_notes: order.customer_notes.map(str::to_string),
            tracking_code: None,
            cancel_reason: None,
            cancelled_by: None,
            created_at: order.now,
            updated_at: order.now,
            paid_at: None,
            shipped_at: None,
            completed_at: None,
        };
        self.work.orders.insert(row.id, row.clone());
        Ok(row)
    }

    async fn insert_order_items(
        &mut self,
        order_id: i64,
        items: &[NewOrderItem],
    ) -> StoreResult<Vec<OrderItem>> {
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let row = OrderItem {
                id: self.work.next_id(),
                order_id,
                variant_id: item.variant_id,
                submitted_price: item.submitted_price,
                quantity: item.quantity,
            };
            self.work.order_items.insert(row.id, row.clone());
            created.push(row);
        }
        Ok(created)
    }

    async fn order(&mut self, id: i64) -> StoreResult<Option<Order>> {
        Ok(self.work.orders.get(&id).cloned())
    }

    async fn lock_order(&mut self, id: i64) -> StoreResult<Option<Order>> {
        self.order(id).await
    }

    async fn order_items(&mut self, order_id: i64) -> StoreResult<Vec<OrderItem>> {
        Ok(self
            .work
            .order_items
            .values()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        self.work.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn has_ongoing_order(&mut self, customer_id: i64, seller_id: i64) -> StoreResult<bool> {
        Ok(self.work.orders.values().any(|o| {
            o.customer_id == customer_id && o.seller_id == seller_id && !o.status.is_terminal()
        }))
    }

    async fn list_orders(
        &mut self,
        filter: OrderFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Order>> {
        Ok(self
            .work
            .orders
            .values()
            .rev()
            .filter(|o| match filter {
                OrderFilter::Customer(id) => o.customer_id == id,
                OrderFilter::Seller(id) => o.seller_id == id,
            })
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn orders_with_status(
        &mut self,
        status: OrderStatus,
        limit: i64,
    ) -> StoreResult<Vec<Order>> {
        Ok(self
            .work
            .orders
            .values()
            .filter(|o| o.status == status)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    // ========== Payments ==========

    async fn payment(&mut self, id: i64) -> StoreResult<Option<Payment>> {
        Ok(self.work.payments.get(&id).cloned())
    }

    async fn lock_payment(&mut self, id: i64) -> StoreResult<Option<Payment>> {
        self.payment(id).await
    }

    async fn payment_by_track_id(&mut self, track_id: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .work
            .payments
            .values()
            .find(|p| p.track_id.as_deref() == Some(track_id))
            .cloned())
    }

    async fn order_payment(&mut self, order_id: i64) -> StoreResult<Option<Payment>> {
        Ok(self
            .work
            .payments
            .values()
            .find(|p| p.purpose == PaymentPurpose::Order && p.order_id == Some(order_id))
            .cloned())
    }

    async fn paying_charge(&mut self, user_id: i64) -> StoreResult<Option<Payment>> {
        Ok(self
            .work
            .payments
            .values()
            .find(|p| {
                p.purpose == PaymentPurpose::WalletCharge
                    && p.user_id == user_id
                    && p.status == PaymentStatus::Paying
            })
            .cloned())
    }

    async fn insert_payment(&mut self, payment: &NewPayment<'_>) -> StoreResult<Payment> {
        if self
            .payment_by_track_id(payment.track_id)
            .await?
            .is_some()
        {
            return Err(conflict("payments_track_id_key"));
        }
        if let Some(order_id) = payment.order_id {
            if self.order_payment(order_id).await?.is_some() {
                return Err(conflict("uq_payments_one_order_row"));
            }
        }
        if payment.purpose == PaymentPurpose::WalletCharge
            && payment.status == PaymentStatus::Paying
            && self.paying_charge(payment.user_id).await?.is_some()
        {
            return Err(conflict("uq_payments_one_paying_charge"));
        }
        let row = Payment {
            id: self.work.next_id(),
            purpose: payment.purpose,
            order_id: payment.order_id,
            user_id: payment.user_id,
            amount: payment.amount,
            gateway: payment.gateway,
            track_id: Some(payment.track_id.to_string()),
            status: payment.status,
            is_used: false,
            track_id_submitted_at: Some(payment.now),
            paid_amount: None,
            ref_number: None,
            created_at: payment.now,
            updated_at: payment.now,
        };
        self.work.payments.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        let track_taken = self.work.payments.values().any(|p| {
            p.id != payment.id && p.track_id.is_some() && p.track_id == payment.track_id
        });
        if track_taken {
            return Err(conflict("payments_track_id_key"));
        }
        self.work.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    // ========== Wallets ==========

    async fn insert_wallet(&mut self, user_id: i64, now: i64) -> StoreResult<Wallet> {
        if let Some(wallet) = self.work.wallets.values().find(|w| w.user_id == user_id) {
            return Ok(wallet.clone());
        }
        let wallet = Wallet {
            id: self.work.next_id(),
            user_id,
            balance: 0,
            updated_at: now,
        };
        self.work.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn wallet(&mut self, user_id: i64) -> StoreResult<Option<Wallet>> {
        Ok(self
            .work
            .wallets
            .values()
            .find(|w| w.user_id == user_id)
            .cloned())
    }

    async fn lock_wallet(&mut self, user_id: i64) -> StoreResult<Option<Wallet>> {
        self.wallet(user_id).await
    }

    async fn update_wallet_balance(
        &mut self,
        wallet_id: i64,
        balance: i64,
        now: i64,
    ) -> StoreResult<()> {
        if balance < 0 {
            return Err(conflict("wallets_balance_check"));
        }
        if let Some(w) = self.work.wallets.get_mut(&wallet_id) {
            w.balance = balance;
            w.updated_at = now;
        }
        Ok(())
    }

    async fn insert_financial_record(
        &mut self,
        record: &NewFinancialRecord,
    ) -> StoreResult<FinancialRecord> {
        if record.amount <= 0 {
            return Err(conflict("financial_records_amount_check"));
        }
        let row = FinancialRecord {
            id: self.work.next_id(),
            record_type: record.record_type,
            amount: record.amount,
            wallet_id: record.wallet_id,
            order_id: record.order_id,
            payment_id: record.payment_id,
            commission_rate: record.commission_rate,
            created_at: record.now,
        };
        self.work.records.insert(row.id, row.clone());
        Ok(row)
    }

    async fn wallet_records(
        &mut self,
        wallet_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<FinancialRecord>> {
        Ok(self
            .work
            .records
            .values()
            .rev()
            .filter(|r| r.wallet_id == Some(wallet_id))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn order_records(&mut self, order_id: i64) -> StoreResult<Vec<FinancialRecord>> {
        Ok(self
            .work
            .records
            .values()
            .filter(|r| r.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    // ========== Withdrawals and transfers ==========

    async fn pending_withdrawal(&mut self, user_id: i64) -> StoreResult<Option<WithdrawalRequest>> {
        Ok(self
            .work
            .withdrawals
            .values()
            .find(|w| w.user_id == user_id && w.status == WithdrawalStatus::Pending)
            .cloned())
    }

    async fn insert_withdrawal(&mut self, request: &NewWithdrawal) -> StoreResult<WithdrawalRequest> {
        if self.pending_withdrawal(request.user_id).await?.is_some() {
            return Err(conflict("uq_withdrawal_one_pending"));
        }
        let row = WithdrawalRequest {
            id: self.work.next_id(),
            user_id: request.user_id,
            bank_card_id: request.bank_card_id,
            amount: request.amount,
            status: WithdrawalStatus::Pending,
            created_at: request.now,
            updated_at: request.now,
        };
        self.work.withdrawals.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_withdrawal_amount(&mut self, id: i64, amount: i64, now: i64) -> StoreResult<()> {
        if let Some(w) = self.work.withdrawals.get_mut(&id) {
            w.amount = amount;
            w.updated_at = now;
        }
        Ok(())
    }

    async fn insert_money_transfer(
        &mut self,
        request: &NewMoneyTransfer,
    ) -> StoreResult<MoneyTransferRequest> {
        let row = MoneyTransferRequest {
            id: self.work.next_id(),
            requested_by: request.requested_by,
            order_id: request.order_id,
            amount: request.amount,
            is_verified: false,
            is_paid: false,
            tracking_code: None,
            created_at: request.now,
        };
        self.work.transfers.insert(row.id, row.clone());
        Ok(row)
    }

    // ========== Deferred tasks ==========

    async fn schedule_task(&mut self, task: &NewTask) -> StoreResult<bool> {
        if self
            .work
            .tasks
            .values()
            .any(|t| t.idempotency_key == task.idempotency_key)
        {
            return Ok(false);
        }
        let now = shared::util::now_millis();
        let row = DeferredTask {
            id: self.work.next_id(),
            payload: task.payload.clone(),
            idempotency_key: task.idempotency_key.clone(),
            run_at: task.run_at,
            attempts: 0,
            status: TaskStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.work.tasks.insert(row.id, row);
        Ok(true)
    }

    async fn claim_due_tasks(
        &mut self,
        now: i64,
        lease_until: i64,
        limit: i64,
    ) -> StoreResult<Vec<DeferredTask>> {
        let mut due: Vec<&mut DeferredTask> = self
            .work
            .tasks
            .values_mut()
            .filter(|t| t.status == TaskStatus::Pending && t.run_at <= now)
            .collect();
        due.sort_by_key(|t| (t.run_at, t.id));
        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|t| {
                t.run_at = lease_until;
                t.updated_at = now;
                t.clone()
            })
            .collect())
    }

    async fn complete_task(&mut self, id: i64, now: i64) -> StoreResult<()> {
        if let Some(t) = self.work.tasks.get_mut(&id) {
            t.status = TaskStatus::Done;
            t.updated_at = now;
        }
        Ok(())
    }

    async fn reschedule_task(
        &mut self,
        id: i64,
        run_at: i64,
        attempts: i32,
        last_error: Option<&str>,
        now: i64,
    ) -> StoreResult<()> {
        if let Some(t) = self.work.tasks.get_mut(&id) {
            t.run_at = run_at;
            t.attempts = attempts;
            if let Some(err) = last_error {
                t.last_error = Some(err.to_string());
            }
            t.updated_at = now;
        }
        Ok(())
    }

    async fn dead_letter_task(
        &mut self,
        id: i64,
        attempts: i32,
        last_error: &str,
        now: i64,
    ) -> StoreResult<()> {
        if let Some(t) = self.work.tasks.get_mut(&id) {
            t.status = TaskStatus::Dead;
            t.attempts = attempts;
            t.last_error = Some(last_error.to_string());
            t.updated_at = now;
        }
        Ok(())
    }

    async fn task_status(&mut self, idempotency_key: &str) -> StoreResult<Option<TaskStatus>> {
        Ok(self
            .work
            .tasks
            .values()
            .find(|t| t.idempotency_key == idempotency_key)
            .map(|t| t.status))
    }
}
