//! Wallet ledger
//!
//! Every balance change is paired with exactly one append-only
//! [`FinancialRecord`] in the same transaction. Balances never go negative.

use std::sync::Arc;

use rust_decimal::Decimal;
use shared::error::{AppError, ErrorCode};
use shared::models::{FinancialRecord, TransactionType, Wallet, WithdrawalRequest};
use shared::request::PaginationQuery;
use shared::response::WalletBalance;
use shared::util::now_millis;

use crate::error::ServiceResult;
use crate::store::{NewFinancialRecord, NewWithdrawal, Store, StoreTx};

/// What a wallet movement is about
#[derive(Debug, Clone, Copy)]
pub struct LedgerEntry {
    pub record_type: TransactionType,
    pub order_id: Option<i64>,
    pub payment_id: Option<i64>,
    pub commission_rate: Option<Decimal>,
}

impl LedgerEntry {
    pub fn new(record_type: TransactionType) -> Self {
        Self {
            record_type,
            order_id: None,
            payment_id: None,
            commission_rate: None,
        }
    }

    pub fn order(mut self, order_id: i64) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn payment(mut self, payment_id: i64) -> Self {
        self.payment_id = Some(payment_id);
        self
    }

    pub fn commission(mut self, rate: Decimal) -> Self {
        self.commission_rate = Some(rate);
        self
    }
}

#[derive(Clone)]
pub struct WalletLedger {
    store: Arc<dyn Store>,
    withdrawal_min_amount: i64,
}

fn positive_amount(amount: i64) -> ServiceResult<()> {
    if amount <= 0 {
        return Err(AppError::with_message(ErrorCode::ValueOutOfRange, "Amount must be positive")
            .with_detail("amount", amount)
            .into());
    }
    Ok(())
}

fn insufficient_funds(wallet: &Wallet, amount: i64) -> AppError {
    AppError::new(ErrorCode::InsufficientFunds)
        .with_detail("balance", wallet.balance)
        .with_detail("required", amount)
}

async fn locked_wallet(tx: &mut dyn StoreTx, user_id: i64) -> ServiceResult<Wallet> {
    tx.lock_wallet(user_id)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::WalletNotFound).with_detail("userId", user_id).into())
}

impl WalletLedger {
    pub fn new(store: Arc<dyn Store>, withdrawal_min_amount: i64) -> Self {
        Self {
            store,
            withdrawal_min_amount,
        }
    }

    /// Add `amount` to the user's wallet and record why
    pub async fn credit(
        &self,
        tx: &mut dyn StoreTx,
        user_id: i64,
        amount: i64,
        entry: LedgerEntry,
    ) -> ServiceResult<FinancialRecord> {
        positive_amount(amount)?;
        let wallet = locked_wallet(tx, user_id).await?;
        let now = now_millis();
        tx.update_wallet_balance(wallet.id, wallet.balance + amount, now)
            .await?;
        let record = self.record(tx, Some(wallet.id), amount, entry, now).await?;
        tracing::info!(
            user_id,
            amount,
            record_type = ?entry.record_type,
            "Wallet credited"
        );
        Ok(record)
    }

    /// Take `amount` from the user's wallet, failing without side effects if it is short
    pub async fn debit(
        &self,
        tx: &mut dyn StoreTx,
        user_id: i64,
        amount: i64,
        entry: LedgerEntry,
    ) -> ServiceResult<FinancialRecord> {
        positive_amount(amount)?;
        let wallet = locked_wallet(tx, user_id).await?;
        if wallet.balance < amount {
            return Err(insufficient_funds(&wallet, amount).into());
        }
        let now = now_millis();
        tx.update_wallet_balance(wallet.id, wallet.balance - amount, now)
            .await?;
        let record = self.record(tx, Some(wallet.id), amount, entry, now).await?;
        tracing::info!(
            user_id,
            amount,
            record_type = ?entry.record_type,
            "Wallet debited"
        );
        Ok(record)
    }

    /// Record a money movement that does not touch any wallet (gateway payments and refunds)
    pub async fn record_external(
        &self,
        tx: &mut dyn StoreTx,
        amount: i64,
        entry: LedgerEntry,
    ) -> ServiceResult<FinancialRecord> {
        positive_amount(amount)?;
        self.record(tx, None, amount, entry, now_millis()).await
    }

    async fn record(
        &self,
        tx: &mut dyn StoreTx,
        wallet_id: Option<i64>,
        amount: i64,
        entry: LedgerEntry,
        now: i64,
    ) -> ServiceResult<FinancialRecord> {
        let record = tx
            .insert_financial_record(&NewFinancialRecord {
                record_type: entry.record_type,
                amount,
                wallet_id,
                order_id: entry.order_id,
                payment_id: entry.payment_id,
                commission_rate: entry.commission_rate,
                now,
            })
            .await?;
        Ok(record)
    }

    pub async fn balance(&self, user_id: i64) -> ServiceResult<WalletBalance> {
        let mut tx = self.store.begin().await?;
        let wallet = tx
            .wallet(user_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::WalletNotFound))?;
        Ok(WalletBalance {
            wallet_id: wallet.id,
            balance: wallet.balance,
        })
    }

    /// Ledger entries of the user's wallet, newest first
    pub async fn list_records(
        &self,
        user_id: i64,
        page: &PaginationQuery,
    ) -> ServiceResult<Vec<FinancialRecord>> {
        let mut tx = self.store.begin().await?;
        let wallet = tx
            .wallet(user_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::WalletNotFound))?;
        let records = tx
            .wallet_records(wallet.id, i64::from(page.limit()), page.offset())
            .await?;
        Ok(records)
    }

    fn check_withdrawal_amount(&self, wallet: &Wallet, amount: i64) -> ServiceResult<()> {
        positive_amount(amount)?;
        if amount < self.withdrawal_min_amount {
            return Err(AppError::new(ErrorCode::WithdrawalBelowMinimum)
                .with_detail("minimum", self.withdrawal_min_amount)
                .with_detail("amount", amount)
                .into());
        }
        if wallet.balance < amount {
            return Err(insufficient_funds(wallet, amount).into());
        }
        Ok(())
    }

    /// Ask for a payout to one of the user's bank cards
    ///
    /// Nothing is debited here; payouts are settled by operators.
    pub async fn request_withdrawal(
        &self,
        user_id: i64,
        bank_card_id: i64,
        amount: i64,
    ) -> ServiceResult<WithdrawalRequest> {
        let mut tx = self.store.begin().await?;
        let wallet = locked_wallet(tx.as_mut(), user_id).await?;

        match tx.bank_card(bank_card_id).await? {
            Some(card) if card.user_id == user_id => {}
            _ => {
                return Err(AppError::new(ErrorCode::BankCardNotFound)
                    .with_detail("bankCardId", bank_card_id)
                    .into());
            }
        }
        if let Some(pending) = tx.pending_withdrawal(user_id).await? {
            return Err(AppError::new(ErrorCode::WithdrawalPending)
                .with_detail("withdrawalId", pending.id)
                .into());
        }
        self.check_withdrawal_amount(&wallet, amount)?;

        let request = tx
            .insert_withdrawal(&NewWithdrawal {
                user_id,
                bank_card_id,
                amount,
                now: now_millis(),
            })
            .await?;
        tx.commit().await?;

        tracing::info!(user_id, amount, withdrawal_id = request.id, "Withdrawal requested");
        Ok(request)
    }

    /// Change the amount of the user's pending withdrawal
    pub async fn update_withdrawal_request(
        &self,
        user_id: i64,
        amount: i64,
    ) -> ServiceResult<WithdrawalRequest> {
        let mut tx = self.store.begin().await?;
        let wallet = locked_wallet(tx.as_mut(), user_id).await?;
        let mut request = tx
            .pending_withdrawal(user_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::WithdrawalNotFound))?;
        self.check_withdrawal_amount(&wallet, amount)?;

        let now = now_millis();
        tx.update_withdrawal_amount(request.id, amount, now).await?;
        tx.commit().await?;

        request.amount = amount;
        request.updated_at = now;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use shared::models::UserRole;

    async fn setup(balance: i64) -> (Arc<MemoryStore>, WalletLedger) {
        let store = Arc::new(MemoryStore::new());
        let ledger = WalletLedger::new(store.clone(), 100_000);
        let mut tx = store.begin().await.unwrap();
        tx.insert_account(7, UserRole::Customer, 0).await.unwrap();
        tx.insert_wallet(7, 0).await.unwrap();
        if balance > 0 {
            ledger
                .credit(tx.as_mut(), 7, balance, LedgerEntry::new(TransactionType::Deposit))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();
        (store, ledger)
    }

    #[tokio::test]
    async fn test_debit_insufficient_leaves_no_trace() {
        let (store, ledger) = setup(1_000).await;
        let mut tx = store.begin().await.unwrap();
        let err = ledger
            .debit(
                tx.as_mut(),
                7,
                3_950,
                LedgerEntry::new(TransactionType::WalletPayment).order(1),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientFunds);
        drop(tx);

        assert_eq!(ledger.balance(7).await.unwrap().balance, 1_000);
        assert_eq!(store.financial_records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_debit_pairs_balance_and_record() {
        let (store, ledger) = setup(5_000).await;
        let mut tx = store.begin().await.unwrap();
        let record = ledger
            .debit(
                tx.as_mut(),
                7,
                3_950,
                LedgerEntry::new(TransactionType::WalletPayment).order(1),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(record.amount, 3_950);
        assert_eq!(record.order_id, Some(1));
        assert_eq!(ledger.balance(7).await.unwrap().balance, 1_050);
    }

    #[tokio::test]
    async fn test_withdrawal_rules() {
        let (store, ledger) = setup(150_000).await;
        let mut tx = store.begin().await.unwrap();
        let card = tx.insert_bank_card(7, "6037991234567890").await.unwrap();
        tx.commit().await.unwrap();

        let err = ledger.request_withdrawal(7, card.id, 50_000).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::WithdrawalBelowMinimum);

        let err = ledger.request_withdrawal(7, card.id, 200_000).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientFunds);

        let err = ledger.request_withdrawal(7, card.id + 100, 120_000).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::BankCardNotFound);

        ledger.request_withdrawal(7, card.id, 120_000).await.unwrap();
        let err = ledger.request_withdrawal(7, card.id, 120_000).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::WithdrawalPending);

        let updated = ledger.update_withdrawal_request(7, 140_000).await.unwrap();
        assert_eq!(updated.amount, 140_000);
        // Requests never move money
        assert_eq!(ledger.balance(7).await.unwrap().balance, 150_000);
    }
}
