//! Unified service-layer error type for bazaar-server
//!
//! `ServiceError` bridges storage errors, gateway errors and the API-layer
//! error (`AppError`), so every service method can use `?` freely.

use axum::response::IntoResponse;
use shared::error::{AppError, ErrorCode};

use crate::payments::gateway::GatewayError;
use crate::store::StoreError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Service-layer error
///
/// - `Db`: storage/infrastructure errors (auto-logged, mapped to DatabaseError)
/// - `App`: business-rule errors (passed through to the client)
/// - `Invariant`: a broken internal invariant (logged as an alert, mapped to InvariantViolation)
/// - `Gateway`: payment gateway failures (mapped by kind)
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("storage error: {0}")]
    Db(BoxError),
    #[error(transparent)]
    App(AppError),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ServiceError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        ServiceError::Invariant(msg.into())
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Db(_) => true,
            ServiceError::Gateway(e) => e.is_transient(),
            ServiceError::App(_) | ServiceError::Invariant(_) => false,
        }
    }

    /// Error code of the client-facing error
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Db(_) => ErrorCode::DatabaseError,
            ServiceError::App(e) => e.code,
            ServiceError::Invariant(_) => ErrorCode::InvariantViolation,
            ServiceError::Gateway(e) => e.code(),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        ServiceError::Db(e.into())
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(e: sqlx::Error) -> Self {
        ServiceError::Db(e.into())
    }
}

impl From<BoxError> for ServiceError {
    fn from(e: BoxError) -> Self {
        ServiceError::Db(e)
    }
}

impl From<AppError> for ServiceError {
    fn from(e: AppError) -> Self {
        ServiceError::App(e)
    }
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::App(app_err) => app_err,
            ServiceError::Db(db_err) => {
                tracing::error!(error = %db_err, "Service storage error");
                AppError::new(ErrorCode::DatabaseError)
            }
            ServiceError::Invariant(msg) => {
                tracing::error!(alert = true, invariant = %msg, "Invariant violated");
                AppError::invariant(msg)
            }
            ServiceError::Gateway(gw_err) => {
                tracing::warn!(error = %gw_err, "Payment gateway error");
                gw_err.to_app_error()
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        let app_error: AppError = self.into();
        app_error.into_response()
    }
}

/// Convenience type alias for service-layer results
pub type ServiceResult<T> = Result<T, ServiceError>;
