//! Transactional storage seam
//!
//! Every service mutation runs inside one [`StoreTx`]. Locking reads
//! (`lock_*`) hold their rows until the transaction commits or is dropped;
//! dropping a transaction without [`StoreTx::commit`] rolls it back.
//!
//! Lock order used by every service: order row, then payment row, then
//! variant rows (ascending id), then wallet row.
//!
//! - [`PgStore`]: PostgreSQL (`SELECT ... FOR UPDATE`)
//! - [`MemoryStore`]: in-process store with fully serialized transactions

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use shared::models::{
    Account, BankCard, Cart, CartItem, CustomerAddress, FinancialRecord, GatewayId,
    MoneyTransferRequest, Order, OrderItem, OrderStatus, Payment, PaymentPurpose, PaymentStatus,
    ProductVariant, SellerProfile, TransactionType, UserRole, Wallet, WithdrawalRequest,
};
use thiserror::Error;

use crate::tasks::{DeferredTask, NewTask, TaskStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A uniqueness or check constraint rejected the write
    #[error("Constraint violated: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub struct NewOrder<'a> {
    pub customer_id: i64,
    pub seller_id: i64,
    pub customer_address_id: i64,
    pub status: OrderStatus,
    pub total_price: i64,
    pub customer_notes: Option<&'a str>,
    pub now: i64,
}

pub struct NewOrderItem {
    pub variant_id: i64,
    pub submitted_price: i64,
    pub quantity: i32,
}

pub struct NewPayment<'a> {
    pub purpose: PaymentPurpose,
    pub order_id: Option<i64>,
    pub user_id: i64,
    pub amount: i64,
    pub gateway: GatewayId,
    pub track_id: &'a str,
    pub status: PaymentStatus,
    pub now: i64,
}

pub struct NewFinancialRecord {
    pub record_type: TransactionType,
    pub amount: i64,
    pub wallet_id: Option<i64>,
    pub order_id: Option<i64>,
    pub payment_id: Option<i64>,
    pub commission_rate: Option<Decimal>,
    pub now: i64,
}

pub struct NewWithdrawal {
    pub user_id: i64,
    pub bank_card_id: i64,
    pub amount: i64,
    pub now: i64,
}

pub struct NewMoneyTransfer {
    pub requested_by: i64,
    pub order_id: Option<i64>,
    pub amount: i64,
    pub now: i64,
}

/// Which side of an order a listing is for
#[derive(Debug, Clone, Copy)]
pub enum OrderFilter {
    Customer(i64),
    Seller(i64),
}

/// Storage backend: hands out transactions
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

/// One storage transaction
#[async_trait]
pub trait StoreTx: Send {
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    // ========== Accounts ==========

    async fn account(&mut self, user_id: i64) -> StoreResult<Option<Account>>;
    /// Returns `None` when the account already exists
    async fn insert_account(
        &mut self,
        user_id: i64,
        role: UserRole,
        now: i64,
    ) -> StoreResult<Option<Account>>;
    async fn seller_profile(&mut self, user_id: i64) -> StoreResult<Option<SellerProfile>>;
    async fn upsert_seller_profile(&mut self, profile: &SellerProfile) -> StoreResult<()>;
    async fn address(&mut self, id: i64) -> StoreResult<Option<CustomerAddress>>;
    async fn insert_address(
        &mut self,
        user_id: i64,
        address: &str,
        postal_code: Option<&str>,
    ) -> StoreResult<CustomerAddress>;
    async fn bank_card(&mut self, id: i64) -> StoreResult<Option<BankCard>>;
    async fn insert_bank_card(&mut self, user_id: i64, card_number: &str)
    -> StoreResult<BankCard>;

    // ========== Stock ==========

    async fn variant(&mut self, id: i64) -> StoreResult<Option<ProductVariant>>;
    async fn variants(&mut self, ids: &[i64]) -> StoreResult<Vec<ProductVariant>>;
    /// Lock variant rows in ascending id order
    async fn lock_variants(&mut self, ids: &[i64]) -> StoreResult<Vec<ProductVariant>>;
    async fn update_variant_stock(
        &mut self,
        id: i64,
        on_hand_stock: i32,
        reserved_stock: i32,
    ) -> StoreResult<()>;

    // ========== Carts ==========

    /// Returns the existing cart when there is one
    async fn insert_cart(&mut self, user_id: i64) -> StoreResult<Cart>;
    async fn cart(&mut self, user_id: i64) -> StoreResult<Option<Cart>>;
    async fn lock_cart(&mut self, user_id: i64) -> StoreResult<Option<Cart>>;
    /// Items in insertion order
    async fn cart_items(&mut self, cart_id: i64) -> StoreResult<Vec<CartItem>>;
    /// Create the item or overwrite its quantity
    async fn upsert_cart_item(
        &mut self,
        cart_id: i64,
        variant_id: i64,
        quantity: i32,
    ) -> StoreResult<CartItem>;
    async fn delete_cart_item(&mut self, cart_id: i64, item_id: i64) -> StoreResult<bool>;
    async fn clear_cart(&mut self, cart_id: i64) -> StoreResult<u64>;

    // ========== Orders ==========

    async fn insert_order(&mut self, order: &NewOrder<'_>) -> StoreResult<Order>;
    async fn insert_order_items(
        &mut self,
        order_id: i64,
        items: &[NewOrderItem],
    ) -> StoreResult<Vec<OrderItem>>;
    async fn order(&mut self, id: i64) -> StoreResult<Option<Order>>;
    async fn lock_order(&mut self, id: i64) -> StoreResult<Option<Order>>;
    async fn order_items(&mut self, order_id: i64) -> StoreResult<Vec<OrderItem>>;
    async fn update_order(&mut self, order: &Order) -> StoreResult<()>;
    /// Whether the customer has a non-terminal order with the seller
    async fn has_ongoing_order(&mut self, customer_id: i64, seller_id: i64) -> StoreResult<bool>;
    /// Newest first
    async fn list_orders(
        &mut self,
        filter: OrderFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Order>>;
    /// Oldest first
    async fn orders_with_status(
        &mut self,
        status: OrderStatus,
        limit: i64,
    ) -> StoreResult<Vec<Order>>;

    // ========== Payments ==========

    async fn payment(&mut self, id: i64) -> StoreResult<Option<Payment>>;
    async fn lock_payment(&mut self, id: i64) -> StoreResult<Option<Payment>>;
    async fn payment_by_track_id(&mut self, track_id: &str) -> StoreResult<Option<Payment>>;
    async fn order_payment(&mut self, order_id: i64) -> StoreResult<Option<Payment>>;
    /// The user's in-flight wallet charge, if any
    async fn paying_charge(&mut self, user_id: i64) -> StoreResult<Option<Payment>>;
    async fn insert_payment(&mut self, payment: &NewPayment<'_>) -> StoreResult<Payment>;
    async fn update_payment(&mut self, payment: &Payment) -> StoreResult<()>;

    // ========== Wallets ==========

    /// Returns the existing wallet when there is one
    async fn insert_wallet(&mut self, user_id: i64, now: i64) -> StoreResult<Wallet>;
    async fn wallet(&mut self, user_id: i64) -> StoreResult<Option<Wallet>>;
    async fn lock_wallet(&mut self, user_id: i64) -> StoreResult<Option<Wallet>>;
    async fn update_wallet_balance(
        &mut self,
        wallet_id: i64,
        balance: i64,
        now: i64,
    ) -> StoreResult<()>;
    async fn insert_financial_record(
        &mut self,
        record: &NewFinancialRecord,
    ) -> StoreResult<FinancialRecord>;
    /// Newest first
    async fn wallet_records(
        &mut self,
        wallet_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<FinancialRecord>>;
    async fn order_records(&mut self, order_id: i64) -> StoreResult<Vec<FinancialRecord>>;

    // ========== Withdrawals and transfers ==========

    async fn pending_withdrawal(&mut self, user_id: i64)
    -> StoreResult<Option<WithdrawalRequest>>;
    async fn insert_withdrawal(&mut self, request: &NewWithdrawal)
    -> StoreResult<WithdrawalRequest>;
    async fn update_withdrawal_amount(&mut self, id: i64, amount: i64, now: i64)
    -> StoreResult<()>;
    async fn insert_money_transfer(
        &mut self,
        request: &NewMoneyTransfer,
    ) -> StoreResult<MoneyTransferRequest>;

    // ========== Deferred tasks ==========

    /// Returns `false` when a task with the same idempotency key exists
    async fn schedule_task(&mut self, task: &NewTask) -> StoreResult<bool>;
    /// Lease due pending tasks by pushing their `run_at` to `lease_until`
    async fn claim_due_tasks(
        &mut self,
        now: i64,
        lease_until: i64,
        limit: i64,
    ) -> StoreResult<Vec<DeferredTask>>;
    async fn complete_task(&mut self, id: i64, now: i64) -> StoreResult<()>;
    async fn reschedule_task(
        &mut self,
        id: i64,
        run_at: i64,
        attempts: i32,
        last_error: Option<&str>,
        now: i64,
    ) -> StoreResult<()>;
    async fn dead_letter_task(
        &mut self,
        id: i64,
        attempts: i32,
        last_error: &str,
        now: i64,
    ) -> StoreResult<()>;
    async fn task_status(&mut self, idempotency_key: &str) -> StoreResult<Option<TaskStatus>>;
}
