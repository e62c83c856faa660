//! bazaar-server: multi-vendor marketplace core
//!
//! - [`ledger`]: stock counters and wallet balances
//! - [`cart`], [`orders`], [`payments`]: the commerce flow
//! - [`tasks`]: durable timers and the worker that runs them
//! - [`api`]: axum routes over [`state::AppState`]

pub mod accounts;
pub mod api;
pub mod auth;
pub mod cart;
pub mod config;
pub mod error;
pub mod ledger;
pub mod orders;
pub mod payments;
pub mod state;
pub mod store;
pub mod tasks;
