//! Stock and money ledgers
//!
//! Both ledgers work inside a caller-provided transaction so that a stock
//! or balance change commits together with the order or payment change
//! that caused it.

pub mod stock;
pub mod wallet;

pub use stock::{StockLedger, StockQuantities};
pub use wallet::{LedgerEntry, WalletLedger};
