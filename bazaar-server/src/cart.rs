//! Cart service
//!
//! A cart holds items of one seller only. Every mutation re-checks the
//! item against the catalog; checkout runs the same checks over the whole
//! cart and reports every failing item instead of stopping at the first.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use shared::error::{AppError, ErrorCode};
use shared::models::{Cart, CartItem, CartLine, CartView, ProductVariant};
use shared::response::CartValidationReport;

use crate::error::ServiceResult;
use crate::store::{Store, StoreTx};

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn Store>,
}

/// Outcome of checking cart items against the catalog
#[derive(Debug, Default)]
pub(crate) struct CartCheck {
    pub report: CartValidationReport,
    pub seller_id: Option<i64>,
}

/// Errors of one cart line, in the order they are reported
fn item_errors(
    variant: &ProductVariant,
    quantity: i32,
    buyer_id: i64,
    cart_seller: Option<i64>,
    seller_active: bool,
) -> Vec<ErrorCode> {
    let mut errors = Vec::new();
    if cart_seller.is_some_and(|s| s != variant.seller_id) {
        errors.push(ErrorCode::CartMixedSellers);
    }
    if !variant.is_enabled {
        errors.push(ErrorCode::ProductDisabled);
    }
    if !variant.is_available {
        errors.push(ErrorCode::ProductUnavailable);
    }
    if quantity > variant.available_stock() {
        errors.push(ErrorCode::InsufficientStock);
    }
    if !seller_active {
        errors.push(ErrorCode::SellerInactive);
    }
    if variant.seller_id == buyer_id {
        errors.push(ErrorCode::CartOwnProduct);
    }
    errors
}

async fn seller_active(tx: &mut dyn StoreTx, seller_id: i64) -> ServiceResult<bool> {
    Ok(tx
        .seller_profile(seller_id)
        .await?
        .is_some_and(|p| p.is_active))
}

fn quantity_positive(quantity: i32) -> ServiceResult<()> {
    if quantity < 1 {
        return Err(AppError::new(ErrorCode::CartQuantityInvalid)
            .with_detail("quantity", quantity)
            .into());
    }
    Ok(())
}

async fn owned_cart(tx: &mut dyn StoreTx, user_id: i64) -> ServiceResult<Cart> {
    tx.lock_cart(user_id)
        .await?
        .ok_or_else(|| AppError::new(ErrorCode::AccountNotFound).with_detail("userId", user_id).into())
}

/// Check every item of a cart
pub(crate) async fn check_items(
    tx: &mut dyn StoreTx,
    buyer_id: i64,
    items: &[CartItem],
) -> ServiceResult<CartCheck> {
    let ids: Vec<i64> = items.iter().map(|i| i.variant_id).collect();
    let variants: BTreeMap<i64, ProductVariant> = tx
        .variants(&ids)
        .await?
        .into_iter()
        .map(|v| (v.id, v))
        .collect();

    let seller_id = items
        .iter()
        .find_map(|i| variants.get(&i.variant_id))
        .map(|v| v.seller_id);

    let mut active: HashMap<i64, bool> = HashMap::new();
    let mut report = CartValidationReport::new();
    for item in items {
        let Some(variant) = variants.get(&item.variant_id) else {
            report.insert(item.id, vec![ErrorCode::VariantNotFound]);
            continue;
        };
        let is_active = match active.get(&variant.seller_id) {
            Some(a) => *a,
            None => {
                let a = seller_active(tx, variant.seller_id).await?;
                active.insert(variant.seller_id, a);
                a
            }
        };
        let errors = item_errors(variant, item.quantity, buyer_id, seller_id, is_active);
        if !errors.is_empty() {
            report.insert(item.id, errors);
        }
    }

    Ok(CartCheck { report, seller_id })
}

impl CartService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Check a variant at `quantity` against the rest of the cart; fail fast
    async fn check_line(
        tx: &mut dyn StoreTx,
        user_id: i64,
        items: &[CartItem],
        variant_id: i64,
        quantity: i32,
    ) -> ServiceResult<()> {
        let variant = tx.variant(variant_id).await?.ok_or_else(|| {
            AppError::new(ErrorCode::VariantNotFound).with_detail("variantId", variant_id)
        })?;

        let other = items.iter().find(|i| i.variant_id != variant_id);
        let cart_seller = match other {
            Some(item) => tx.variant(item.variant_id).await?.map(|v| v.seller_id),
            None => None,
        };
        let active = seller_active(tx, variant.seller_id).await?;

        if let Some(code) =
            item_errors(&variant, quantity, user_id, cart_seller, active).first()
        {
            let mut err = AppError::new(*code).with_detail("variantId", variant_id);
            if *code == ErrorCode::InsufficientStock {
                err = err
                    .with_detail("requested", quantity)
                    .with_detail("available", variant.available_stock());
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Add `quantity` units of a variant, merging with an existing line
    pub async fn add_item(
        &self,
        user_id: i64,
        variant_id: i64,
        quantity: i32,
    ) -> ServiceResult<CartItem> {
        quantity_positive(quantity)?;
        let mut tx = self.store.begin().await?;
        let cart = owned_cart(tx.as_mut(), user_id).await?;
        let items = tx.cart_items(cart.id).await?;

        let new_quantity = match items.iter().find(|i| i.variant_id == variant_id) {
            Some(existing) => existing.quantity.checked_add(quantity).ok_or_else(|| {
                AppError::new(ErrorCode::CartQuantityInvalid)
                    .with_detail("current", existing.quantity)
                    .with_detail("quantity", quantity)
            })?,
            None => quantity,
        };
        Self::check_line(tx.as_mut(), user_id, &items, variant_id, new_quantity).await?;

        let item = tx
            .upsert_cart_item(cart.id, variant_id, new_quantity)
            .await?;
        tx.commit().await?;

        tracing::debug!(user_id, variant_id, quantity = new_quantity, "Cart item added");
        Ok(item)
    }

    /// Overwrite the quantity of an existing line
    pub async fn set_item_quantity(
        &self,
        user_id: i64,
        item_id: i64,
        quantity: i32,
    ) -> ServiceResult<CartItem> {
        quantity_positive(quantity)?;
        let mut tx = self.store.begin().await?;
        let cart = owned_cart(tx.as_mut(), user_id).await?;
        let items = tx.cart_items(cart.id).await?;
        let variant_id = items
            .iter()
            .find(|i| i.id == item_id)
            .map(|i| i.variant_id)
            .ok_or_else(|| AppError::new(ErrorCode::CartItemNotFound).with_detail("itemId", item_id))?;

        Self::check_line(tx.as_mut(), user_id, &items, variant_id, quantity).await?;

        let item = tx.upsert_cart_item(cart.id, variant_id, quantity).await?;
        tx.commit().await?;
        Ok(item)
    }

    pub async fn remove_item(&self, user_id: i64, item_id: i64) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        let cart = owned_cart(tx.as_mut(), user_id).await?;
        if !tx.delete_cart_item(cart.id, item_id).await? {
            return Err(AppError::new(ErrorCode::CartItemNotFound)
                .with_detail("itemId", item_id)
                .into());
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn clear_cart(&self, user_id: i64) -> ServiceResult<()> {
        let mut tx = self.store.begin().await?;
        let cart = owned_cart(tx.as_mut(), user_id).await?;
        tx.clear_cart(cart.id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Cart lines joined with current catalog prices
    pub async fn get_cart(&self, user_id: i64) -> ServiceResult<CartView> {
        let mut tx = self.store.begin().await?;
        let cart = tx
            .cart(user_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::AccountNotFound))?;
        let items = tx.cart_items(cart.id).await?;
        let ids: Vec<i64> = items.iter().map(|i| i.variant_id).collect();
        let variants: HashMap<i64, ProductVariant> = tx
            .variants(&ids)
            .await?
            .into_iter()
            .map(|v| (v.id, v))
            .collect();

        let lines: Vec<CartLine> = items
            .iter()
            .filter_map(|item| {
                variants.get(&item.variant_id).map(|v| CartLine {
                    item_id: item.id,
                    variant_id: v.id,
                    name: v.name.clone(),
                    price: v.price,
                    quantity: item.quantity,
                })
            })
            .collect();

        Ok(CartView {
            cart_id: cart.id,
            seller_id: lines
                .first()
                .and_then(|l| variants.get(&l.variant_id))
                .map(|v| v.seller_id),
            total_price: lines.iter().map(CartLine::line_total).sum(),
            items: lines,
        })
    }

    /// Per-item problems that would block checkout; empty when the cart is good
    pub async fn validate_cart_for_checkout(
        &self,
        user_id: i64,
    ) -> ServiceResult<CartValidationReport> {
        let mut tx = self.store.begin().await?;
        let cart = tx
            .cart(user_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::AccountNotFound))?;
        let items = tx.cart_items(cart.id).await?;
        if items.is_empty() {
            return Err(AppError::new(ErrorCode::CartEmpty).into());
        }
        Ok(check_items(tx.as_mut(), user_id, &items).await?.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(seller_id: i64) -> ProductVariant {
        ProductVariant {
            id: 1,
            seller_id,
            name: "Tea".into(),
            price: 195,
            on_hand_stock: 15,
            reserved_stock: 10,
            is_enabled: true,
            is_available: true,
        }
    }

    #[test]
    fn test_item_errors_clean_line() {
        assert!(item_errors(&variant(2), 5, 1, Some(2), true).is_empty());
    }

    #[test]
    fn test_item_errors_collects_all() {
        let mut v = variant(1);
        v.is_enabled = false;
        let errors = item_errors(&v, 6, 1, Some(3), false);
        assert_eq!(
            errors,
            vec![
                ErrorCode::CartMixedSellers,
                ErrorCode::ProductDisabled,
                ErrorCode::InsufficientStock,
                ErrorCode::SellerInactive,
                ErrorCode::CartOwnProduct,
            ]
        );
    }
}
