//! Product variant stock view

use serde::{Deserialize, Serialize};

/// The part of a catalog variant the commerce core reads and mutates
///
/// `reserved_stock <= on_hand_stock` always holds for stored rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct ProductVariant {
    pub id: i64,
    pub seller_id: i64,
    pub name: String,
    /// Unit price in the smallest currency unit
    pub price: i64,
    pub on_hand_stock: i32,
    pub reserved_stock: i32,
    pub is_enabled: bool,
    pub is_available: bool,
}

impl ProductVariant {
    /// Quantity that can still be offered to new carts
    pub fn available_stock(&self) -> i32 {
        self.on_hand_stock - self.reserved_stock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_stock() {
        let variant = ProductVariant {
            id: 1,
            seller_id: 2,
            name: "Blue / M".into(),
            price: 195,
            on_hand_stock: 15,
            reserved_stock: 10,
            is_enabled: true,
            is_available: true,
        };
        assert_eq!(variant.available_stock(), 5);
    }
}
