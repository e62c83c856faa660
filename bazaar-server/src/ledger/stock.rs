//! Stock ledger
//!
//! Owns the two counters of every variant:
//!
//! | event     | on_hand | reserved |
//! |-----------|---------|----------|
//! | reserve   |    =    |   + q    |
//! | release   |    =    |   - q    |
//! | consume   |  - q    |   - q    |
//!
//! `0 <= reserved <= on_hand` holds after every operation. Rows are locked
//! in ascending id order so concurrent multi-variant reservations cannot
//! deadlock.

use std::collections::BTreeMap;

use serde_json::json;
use shared::error::{AppError, ErrorCode};
use shared::models::ProductVariant;

use crate::error::{ServiceError, ServiceResult};
use crate::store::StoreTx;

/// Quantity per variant id; iteration order is the lock order
pub type StockQuantities = BTreeMap<i64, i32>;

#[derive(Debug, Clone, Copy, Default)]
pub struct StockLedger;

/// A variant that cannot cover the requested quantity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortfall {
    pub variant_id: i64,
    pub requested: i32,
    pub available: i32,
}

fn reserve_one(variant: &mut ProductVariant, quantity: i32) -> Result<(), Shortfall> {
    if quantity > variant.available_stock() {
        return Err(Shortfall {
            variant_id: variant.id,
            requested: quantity,
            available: variant.available_stock(),
        });
    }
    variant.reserved_stock += quantity;
    Ok(())
}

fn release_one(variant: &mut ProductVariant, quantity: i32) -> ServiceResult<()> {
    if quantity > variant.reserved_stock {
        return Err(ServiceError::invariant(format!(
            "release of {quantity} exceeds reserved stock {} of variant {}",
            variant.reserved_stock, variant.id
        )));
    }
    variant.reserved_stock -= quantity;
    Ok(())
}

fn consume_one(variant: &mut ProductVariant, quantity: i32) -> ServiceResult<()> {
    if quantity > variant.reserved_stock {
        return Err(ServiceError::invariant(format!(
            "shipment of {quantity} exceeds reserved stock {} of variant {}",
            variant.reserved_stock, variant.id
        )));
    }
    variant.reserved_stock -= quantity;
    variant.on_hand_stock -= quantity;
    Ok(())
}

fn insufficient_stock(shortfalls: &[Shortfall]) -> AppError {
    let variants: Vec<_> = shortfalls
        .iter()
        .map(|s| {
            json!({
                "variantId": s.variant_id,
                "requested": s.requested,
                "available": s.available,
            })
        })
        .collect();
    AppError::new(ErrorCode::InsufficientStock).with_detail("variants", variants)
}

impl StockLedger {
    /// Lock the variants and fail if any is missing or a quantity is not positive
    async fn lock(
        &self,
        tx: &mut dyn StoreTx,
        quantities: &StockQuantities,
    ) -> ServiceResult<Vec<ProductVariant>> {
        if let Some((id, q)) = quantities.iter().find(|(_, q)| **q <= 0) {
            return Err(AppError::new(ErrorCode::CartQuantityInvalid)
                .with_detail("variantId", *id)
                .with_detail("quantity", *q)
                .into());
        }
        let ids: Vec<i64> = quantities.keys().copied().collect();
        let variants = tx.lock_variants(&ids).await?;
        if let Some(missing) = ids.iter().find(|id| !variants.iter().any(|v| v.id == **id)) {
            return Err(AppError::new(ErrorCode::VariantNotFound)
                .with_detail("variantId", *missing)
                .into());
        }
        Ok(variants)
    }

    async fn write(&self, tx: &mut dyn StoreTx, variants: &[ProductVariant]) -> ServiceResult<()> {
        for v in variants {
            tx.update_variant_stock(v.id, v.on_hand_stock, v.reserved_stock)
                .await?;
        }
        Ok(())
    }

    /// Reserve every quantity or nothing
    ///
    /// Returns the locked variants after reservation (current prices included).
    pub async fn reserve(
        &self,
        tx: &mut dyn StoreTx,
        quantities: &StockQuantities,
    ) -> ServiceResult<Vec<ProductVariant>> {
        let mut variants = self.lock(tx, quantities).await?;
        let mut shortfalls = Vec::new();
        for v in variants.iter_mut() {
            if let Err(s) = reserve_one(v, quantities[&v.id]) {
                shortfalls.push(s);
            }
        }
        if !shortfalls.is_empty() {
            return Err(insufficient_stock(&shortfalls).into());
        }
        self.write(tx, &variants).await?;
        Ok(variants)
    }

    /// Give back reserved units (cancellation)
    pub async fn release(
        &self,
        tx: &mut dyn StoreTx,
        quantities: &StockQuantities,
    ) -> ServiceResult<()> {
        let mut variants = self.lock(tx, quantities).await?;
        for v in variants.iter_mut() {
            release_one(v, quantities[&v.id])?;
        }
        self.write(tx, &variants).await
    }

    /// Turn reserved units into shipped units
    pub async fn consume(
        &self,
        tx: &mut dyn StoreTx,
        quantities: &StockQuantities,
    ) -> ServiceResult<()> {
        let mut variants = self.lock(tx, quantities).await?;
        for v in variants.iter_mut() {
            consume_one(v, quantities[&v.id])?;
        }
        self.write(tx, &variants).await
    }
}
