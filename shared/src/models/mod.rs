//! Data models
//!
//! Shared between the server and API clients.
//! DB row types use `#[cfg_attr(feature = "db", derive(sqlx::FromRow))]`.
//! All IDs are `i64` (PostgreSQL BIGSERIAL), money is `i64` in the smallest
//! currency unit and timestamps are epoch milliseconds.

pub mod account;
pub mod cart;
pub mod order;
pub mod payment;
pub mod product;
pub mod wallet;

// Re-exports
pub use account::*;
pub use cart::*;
pub use order::*;
pub use payment::*;
pub use product::*;
pub use wallet::*;
