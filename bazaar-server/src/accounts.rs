//! Account provisioning
//!
//! The identity service creates users; it then calls
//! [`AccountService::provision_account`] once so the marketplace rows
//! every user needs exist before their first request.

use std::sync::Arc;

use shared::error::{AppError, ErrorCode};
use shared::models::{Account, BankCard, CustomerAddress, SellerProfile, UserRole};
use shared::util::now_millis;

use crate::error::{ServiceError, ServiceResult};
use crate::store::Store;

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
}

/// 16 digits, spaces and dashes ignored
fn normalize_card_number(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    (digits.len() == 16 && digits.chars().all(|c| c.is_ascii_digit())).then_some(digits)
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create account, cart, wallet and (for sellers) an inactive profile
    ///
    /// Idempotent for the same role. Provisioning an existing user with a
    /// different role fails with `AlreadyExists`.
    pub async fn provision_account(&self, user_id: i64, role: UserRole) -> ServiceResult<Account> {
        let mut tx = self.store.begin().await?;
        let now = now_millis();

        let account = match tx.insert_account(user_id, role, now).await? {
            Some(account) => account,
            None => {
                let existing = tx.account(user_id).await?.ok_or_else(|| {
                    ServiceError::invariant(format!(
                        "account {user_id} reported as existing but not found"
                    ))
                })?;
                if existing.role != role {
                    return Err(AppError::with_message(
                        ErrorCode::AlreadyExists,
                        "Account exists with another role",
                    )
                    .with_detail("userId", user_id)
                    .into());
                }
                existing
            }
        };

        tx.insert_cart(user_id).await?;
        tx.insert_wallet(user_id, now).await?;
        if role == UserRole::Seller && tx.seller_profile(user_id).await?.is_none() {
            tx.upsert_seller_profile(&SellerProfile {
                user_id,
                is_active: false,
                minimum_order_amount: None,
            })
            .await?;
        }
        tx.commit().await?;

        tracing::info!(user_id, role = ?role, "Account provisioned");
        Ok(account)
    }

    /// Verify or suspend a seller
    pub async fn set_seller_active(
        &self,
        seller_id: i64,
        is_active: bool,
    ) -> ServiceResult<SellerProfile> {
        let mut tx = self.store.begin().await?;
        let mut profile = tx.seller_profile(seller_id).await?.ok_or_else(|| {
            AppError::new(ErrorCode::AccountNotFound).with_detail("sellerId", seller_id)
        })?;
        profile.is_active = is_active;
        tx.upsert_seller_profile(&profile).await?;
        tx.commit().await?;

        tracing::info!(seller_id, is_active, "Seller status changed");
        Ok(profile)
    }

    pub async fn add_address(
        &self,
        user_id: i64,
        address: &str,
        postal_code: Option<&str>,
    ) -> ServiceResult<CustomerAddress> {
        let address = address.trim();
        if address.is_empty() {
            return Err(AppError::with_message(ErrorCode::RequiredField, "address is required").into());
        }
        let mut tx = self.store.begin().await?;
        if tx.account(user_id).await?.is_none() {
            return Err(AppError::new(ErrorCode::AccountNotFound).into());
        }
        let row = tx.insert_address(user_id, address, postal_code).await?;
        tx.commit().await?;
        Ok(row)
    }

    pub async fn add_bank_card(&self, user_id: i64, card_number: &str) -> ServiceResult<BankCard> {
        let card_number = normalize_card_number(card_number).ok_or_else(|| {
            AppError::with_message(ErrorCode::ValidationFailed, "Card number must have 16 digits")
        })?;
        let mut tx = self.store.begin().await?;
        if tx.account(user_id).await?.is_none() {
            return Err(AppError::new(ErrorCode::AccountNotFound).into());
        }
        let card = tx.insert_bank_card(user_id, &card_number).await?;
        tx.commit().await?;
        Ok(card)
    }
}
