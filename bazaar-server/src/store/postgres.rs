//! PostgreSQL store

use async_trait::async_trait;
use shared::models::{
    Account, BankCard, Cart, CartItem, CustomerAddress, FinancialRecord, MoneyTransferRequest,
    Order, OrderItem, OrderStatus, Payment, ProductVariant, SellerProfile, UserRole, Wallet,
    WithdrawalRequest,
};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use super::{
    NewFinancialRecord, NewMoneyTransfer, NewOrder, NewOrderItem, NewPayment, NewWithdrawal,
    OrderFilter, Store, StoreResult, StoreTx,
};
use crate::tasks::{DeferredTask, NewTask, TaskPayload, TaskStatus};

const VARIANT_COLUMNS: &str =
    "id, seller_id, name, price, on_hand_stock, reserved_stock, is_enabled, is_available";

const ORDER_COLUMNS: &str = "id, customer_id, seller_id, customer_address_id, status, total_price,
    payment_method, customer_notes, tracking_code, cancel_reason, cancelled_by,
    created_at, updated_at, paid_at, shipped_at, completed_at";

const PAYMENT_COLUMNS: &str = "id, purpose, order_id, user_id, amount, gateway, track_id, status,
    is_used, track_id_submitted_at, paid_amount, ref_number, created_at, updated_at";

const RECORD_COLUMNS: &str =
    "id, record_type, amount, wallet_id, order_id, payment_id, commission_rate, created_at";

const WITHDRAWAL_COLUMNS: &str =
    "id, user_id, bank_card_id, amount, status, created_at, updated_at";

const TASK_COLUMNS: &str = "id, idempotency_key, payload, run_at, attempts, status, last_error,
    created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    idempotency_key: String,
    payload: Json<TaskPayload>,
    run_at: i64,
    attempts: i32,
    status: TaskStatus,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<TaskRow> for DeferredTask {
    fn from(row: TaskRow) -> Self {
        DeferredTask {
            id: row.id,
            payload: row.payload.0,
            idempotency_key: row.idempotency_key,
            run_at: row.run_at,
            attempts: row.attempts,
            status: row.status,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    // ========== Accounts ==========

    async fn account(&mut self, user_id: i64) -> StoreResult<Option<Account>> {
        let row = sqlx::query_as::<_, Account>(
            "SELECT user_id, role, created_at FROM accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_account(
        &mut self,
        user_id: i64,
        role: UserRole,
        now: i64,
    ) -> StoreResult<Option<Account>> {
        let row = sqlx::query_as::<_, Account>(
            "INSERT INTO accounts (user_id, role, created_at) VALUES ($1, $2, $3)
             ON CONFLICT (user_id) DO NOTHING
             RETURNING user_id, role, created_at",
        )
        .bind(user_id)
        .bind(role)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn seller_profile(&mut self, user_id: i64) -> StoreResult<Option<SellerProfile>> {
        let row = sqlx::query_as::<_, SellerProfile>(
            "SELECT user_id, is_active, minimum_order_amount FROM seller_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn upsert_seller_profile(&mut self, profile: &SellerProfile) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO seller_profiles (user_id, is_active, minimum_order_amount)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id) DO UPDATE SET
                is_active = $2, minimum_order_amount = $3",
        )
        .bind(profile.user_id)
        .bind(profile.is_active)
        .bind(profile.minimum_order_amount)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn address(&mut self, id: i64) -> StoreResult<Option<CustomerAddress>> {
        let row = sqlx::query_as::<_, CustomerAddress>(
            "SELECT id, user_id, address, postal_code FROM customer_addresses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_address(
        &mut self,
        user_id: i64,
        address: &str,
        postal_code: Option<&str>,
    ) -> StoreResult<CustomerAddress> {
        let row = sqlx::query_as::<_, CustomerAddress>(
            "INSERT INTO customer_addresses (user_id, address, postal_code) VALUES ($1, $2, $3)
             RETURNING id, user_id, address, postal_code",
        )
        .bind(user_id)
        .bind(address)
        .bind(postal_code)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn bank_card(&mut self, id: i64) -> StoreResult<Option<BankCard>> {
        let row = sqlx::query_as::<_, BankCard>(
            "SELECT id, user_id, card_number FROM bank_cards WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_bank_card(&mut self, user_id: i64, card_number: &str) -> StoreResult<BankCard> {
        let row = sqlx::query_as::<_, BankCard>(
            "INSERT INTO bank_cards (user_id, card_number) VALUES ($1, $2)
             RETURNING id, user_id, card_number",
        )
        .bind(user_id)
        .bind(card_number)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    // ========== Stock ==========

    async fn variant(&mut self, id: i64) -> StoreResult<Option<ProductVariant>> {
        let row = sqlx::query_as::<_, ProductVariant>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn variants(&mut self, ids: &[i64]) -> StoreResult<Vec<ProductVariant>> {
        let rows = sqlx::query_as::<_, ProductVariant>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn lock_variants(&mut self, ids: &[i64]) -> StoreResult<Vec<ProductVariant>> {
        let rows = sqlx::query_as::<_, ProductVariant>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants WHERE id = ANY($1)
             ORDER BY id FOR UPDATE"
        ))
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn update_variant_stock(
        &mut self,
        id: i64,
        on_hand_stock: i32,
        reserved_stock: i32,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE product_variants SET on_hand_stock = $1, reserved_stock = $2 WHERE id = $3",
        )
        .bind(on_hand_stock)
        .bind(reserved_stock)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    // ========== Carts ==========

    async fn insert_cart(&mut self, user_id: i64) -> StoreResult<Cart> {
        sqlx::query("INSERT INTO carts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        let row = sqlx::query_as::<_, Cart>("SELECT id, user_id FROM carts WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn cart(&mut self, user_id: i64) -> StoreResult<Option<Cart>> {
        let row = sqlx::query_as::<_, Cart>("SELECT id, user_id FROM carts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn lock_cart(&mut self, user_id: i64) -> StoreResult<Option<Cart>> {
        let row = sqlx::query_as::<_, Cart>(
            "SELECT id, user_id FROM carts WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn cart_items(&mut self, cart_id: i64) -> StoreResult<Vec<CartItem>> {
        let rows = sqlx::query_as::<_, CartItem>(
            "SELECT id, cart_id, variant_id, quantity FROM cart_items WHERE cart_id = $1 ORDER BY id",
        )
        .bind(cart_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn upsert_cart_item(
        &mut self,
        cart_id: i64,
        variant_id: i64,
        quantity: i32,
    ) -> StoreResult<CartItem> {
        let row = sqlx::query_as::<_, CartItem>(
            "INSERT INTO cart_items (cart_id, variant_id, quantity) VALUES ($1, $2, $3)
             ON CONFLICT (cart_id, variant_id) DO UPDATE SET quantity = $3
             RETURNING id, cart_id, variant_id, quantity",
        )
        .bind(cart_id)
        .bind(variant_id)
        .bind(quantity)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn delete_cart_item(&mut self, cart_id: i64, item_id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE id = $1 AND cart_id = $2")
            .bind(item_id)
            .bind(cart_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_cart(&mut self, cart_id: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    // ========== Orders ==========

    async fn insert_order(&mut self, order: &NewOrder<'_>) -> StoreResult<Order> {
        let row = sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders (customer_id, seller_id, customer_address_id, status, total_price,
                customer_notes, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.customer_id)
        .bind(order.seller_id)
        .bind(order.customer_address_id)
        .bind(order.status)
        .bind(order.total_price)
        .bind(order.customer_notes)
        .bind(order.now)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_order_items(
        &mut self,
        order_id: i64,
        items: &[NewOrderItem],
    ) -> StoreResult<Vec<OrderItem>> {
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let row = sqlx::query_as::<_, OrderItem>(
                "INSERT INTO order_items (order_id, variant_id, submitted_price, quantity)
                 VALUES ($1, $2, $3, $4)
                 RETURNING id, order_id, variant_id, submitted_price, quantity",
            )
            .bind(order_id)
            .bind(item.variant_id)
            .bind(item.submitted_price)
            .bind(item.quantity)
            .fetch_one(&mut *self.tx)
            .await?;
            created.push(row);
        }
        Ok(created)
    }

    async fn order(&mut self, id: i64) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn lock_order(&mut self, id: i64) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn order_items(&mut self, order_id: i64) -> StoreResult<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItem>(
            "SELECT id, order_id, variant_id, submitted_price, quantity
             FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            "UPDATE orders SET status = $1, payment_method = $2, tracking_code = $3,
                cancel_reason = $4, cancelled_by = $5, updated_at = $6,
                paid_at = $7, shipped_at = $8, completed_at = $9
             WHERE id = $10",
        )
        .bind(order.status)
        .bind(order.payment_method)
        .bind(&order.tracking_code)
        .bind(&order.cancel_reason)
        .bind(order.cancelled_by)
        .bind(order.updated_at)
        .bind(order.paid_at)
        .bind(order.shipped_at)
        .bind(order.completed_at)
        .bind(order.id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn has_ongoing_order(&mut self, customer_id: i64, seller_id: i64) -> StoreResult<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS (
                SELECT 1 FROM orders
                WHERE customer_id = $1 AND seller_id = $2
                  AND status NOT IN ('COMPLETED', 'CANCELLED', 'REFUNDED')
             )",
        )
        .bind(customer_id)
        .bind(seller_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.0)
    }

    async fn list_orders(
        &mut self,
        filter: OrderFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Order>> {
        let (column, user_id) = match filter {
            OrderFilter::Customer(id) => ("customer_id", id),
            OrderFilter::Seller(id) => ("seller_id", id),
        };
        let rows = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {column} = $1
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn orders_with_status(
        &mut self,
        status: OrderStatus,
        limit: i64,
    ) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1 ORDER BY id LIMIT $2"
        ))
        .bind(status)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    // ========== Payments ==========

    async fn payment(&mut self, id: i64) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn lock_payment(&mut self, id: i64) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn payment_by_track_id(&mut self, track_id: &str) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE track_id = $1"
        ))
        .bind(track_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn order_payment(&mut self, order_id: i64) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 AND purpose = 'ORDER'"
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn paying_charge(&mut self, user_id: i64) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE user_id = $1 AND purpose = 'WALLET_CHARGE' AND status = 'PAYING'"
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_payment(&mut self, payment: &NewPayment<'_>) -> StoreResult<Payment> {
        let row = sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments (purpose, order_id, user_id, amount, gateway, track_id, status,
                track_id_submitted_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, $8)
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment.purpose)
        .bind(payment.order_id)
        .bind(payment.user_id)
        .bind(payment.amount)
        .bind(payment.gateway)
        .bind(payment.track_id)
        .bind(payment.status)
        .bind(payment.now)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            "UPDATE payments SET amount = $1, gateway = $2, track_id = $3, status = $4,
                is_used = $5, track_id_submitted_at = $6, paid_amount = $7, ref_number = $8,
                updated_at = $9
             WHERE id = $10",
        )
        .bind(payment.amount)
        .bind(payment.gateway)
        .bind(&payment.track_id)
        .bind(payment.status)
        .bind(payment.is_used)
        .bind(payment.track_id_submitted_at)
        .bind(payment.paid_amount)
        .bind(&payment.ref_number)
        .bind(payment.updated_at)
        .bind(payment.id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    // ========== Wallets ==========

    async fn insert_wallet(&mut self, user_id: i64, now: i64) -> StoreResult<Wallet> {
        sqlx::query(
            "INSERT INTO wallets (user_id, balance, updated_at) VALUES ($1, 0, $2)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        let row = sqlx::query_as::<_, Wallet>(
            "SELECT id, user_id, balance, updated_at FROM wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn wallet(&mut self, user_id: i64) -> StoreResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>(
            "SELECT id, user_id, balance, updated_at FROM wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn lock_wallet(&mut self, user_id: i64) -> StoreResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>(
            "SELECT id, user_id, balance, updated_at FROM wallets WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_wallet_balance(
        &mut self,
        wallet_id: i64,
        balance: i64,
        now: i64,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE wallets SET balance = $1, updated_at = $2 WHERE id = $3")
            .bind(balance)
            .bind(now)
            .bind(wallet_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_financial_record(
        &mut self,
        record: &NewFinancialRecord,
    ) -> StoreResult<FinancialRecord> {
        let row = sqlx::query_as::<_, FinancialRecord>(&format!(
            "INSERT INTO financial_records (record_type, amount, wallet_id, order_id, payment_id,
                commission_rate, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(record.record_type)
        .bind(record.amount)
        .bind(record.wallet_id)
        .bind(record.order_id)
        .bind(record.payment_id)
        .bind(record.commission_rate)
        .bind(record.now)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn wallet_records(
        &mut self,
        wallet_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<FinancialRecord>> {
        let rows = sqlx::query_as::<_, FinancialRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM financial_records WHERE wallet_id = $1
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(wallet_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn order_records(&mut self, order_id: i64) -> StoreResult<Vec<FinancialRecord>> {
        let rows = sqlx::query_as::<_, FinancialRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM financial_records WHERE order_id = $1 ORDER BY id"
        ))
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    // ========== Withdrawals and transfers ==========

    async fn pending_withdrawal(&mut self, user_id: i64) -> StoreResult<Option<WithdrawalRequest>> {
        let row = sqlx::query_as::<_, WithdrawalRequest>(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawal_requests
             WHERE user_id = $1 AND status = 'PENDING'"
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_withdrawal(&mut self, request: &NewWithdrawal) -> StoreResult<WithdrawalRequest> {
        let row = sqlx::query_as::<_, WithdrawalRequest>(&format!(
            "INSERT INTO withdrawal_requests (user_id, bank_card_id, amount, status, created_at, updated_at)
             VALUES ($1, $2, $3, 'PENDING', $4, $4)
             RETURNING {WITHDRAWAL_COLUMNS}"
        ))
        .bind(request.user_id)
        .bind(request.bank_card_id)
        .bind(request.amount)
        .bind(request.now)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_withdrawal_amount(&mut self, id: i64, amount: i64, now: i64) -> StoreResult<()> {
        sqlx::query("UPDATE withdrawal_requests SET amount = $1, updated_at = $2 WHERE id = $3")
            .bind(amount)
            .bind(now)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_money_transfer(
        &mut self,
        request: &NewMoneyTransfer,
    ) -> StoreResult<MoneyTransferRequest> {
        let row = sqlx::query_as::<_, MoneyTransferRequest>(
            "INSERT INTO money_transfer_requests (requested_by, order_id, amount, created_at)
             VALUES ($1, $2, $3, $4)
             RETURNING id, requested_by, order_id, amount, is_verified, is_paid, tracking_code, created_at",
        )
        .bind(request.requested_by)
        .bind(request.order_id)
        .bind(request.amount)
        .bind(request.now)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    // ========== Deferred tasks ==========

    async fn schedule_task(&mut self, task: &NewTask) -> StoreResult<bool> {
        let now = shared::util::now_millis();
        let result = sqlx::query(
            "INSERT INTO deferred_tasks (kind, idempotency_key, payload, run_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)
             ON CONFLICT (idempotency_key) DO NOTHING",
        )
        .bind(task.payload.kind())
        .bind(&task.idempotency_key)
        .bind(Json(&task.payload))
        .bind(task.run_at)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_due_tasks(
        &mut self,
        now: i64,
        lease_until: i64,
        limit: i64,
    ) -> StoreResult<Vec<DeferredTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE deferred_tasks SET run_at = $2, updated_at = $1
             WHERE id IN (
                SELECT id FROM deferred_tasks
                WHERE status = 'PENDING' AND run_at <= $1
                ORDER BY run_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
             )
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(now)
        .bind(lease_until)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(DeferredTask::from).collect())
    }

    async fn complete_task(&mut self, id: i64, now: i64) -> StoreResult<()> {
        sqlx::query("UPDATE deferred_tasks SET status = 'DONE', updated_at = $1 WHERE id = $2")
            .bind(now)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
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
        sqlx::query(
            "UPDATE deferred_tasks
             SET run_at = $1, attempts = $2, last_error = COALESCE($3, last_error), updated_at = $4
             WHERE id = $5",
        )
        .bind(run_at)
        .bind(attempts)
        .bind(last_error)
        .bind(now)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn dead_letter_task(
        &mut self,
        id: i64,
        attempts: i32,
        last_error: &str,
        now: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE deferred_tasks
             SET status = 'DEAD', attempts = $1, last_error = $2, updated_at = $3
             WHERE id = $4",
        )
        .bind(attempts)
        .bind(last_error)
        .bind(now)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn task_status(&mut self, idempotency_key: &str) -> StoreResult<Option<TaskStatus>> {
        let status = sqlx::query_scalar::<_, TaskStatus>(
            "SELECT status FROM deferred_tasks WHERE idempotency_key = $1",
        )
        .bind(idempotency_key)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(status)
    }
}
