//! Shared types for the Bazaar marketplace core
//!
//! Domain models and enums, the order state machine, HTTP request and
//! response types, and the unified error system used by the server and
//! its clients.

pub mod error;
pub mod models;
pub mod request;
pub mod response;
pub mod util;

// Re-exports
pub use axum::Json;
pub use http;
pub use serde::{Deserialize, Serialize};
