//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    /// Get the appropriate HTTP status code for this error code
    pub fn http_status(&self) -> StatusCode {
        match self {
            // Success
            Self::Success => StatusCode::OK,

            // 404 Not Found
            Self::NotFound
            | Self::AccountNotFound
            | Self::AddressNotFound
            | Self::BankCardNotFound
            | Self::OrderNotFound
            | Self::PaymentNotFound
            | Self::GatewayNotFound
            | Self::VariantNotFound
            | Self::CartItemNotFound
            | Self::WalletNotFound
            | Self::WithdrawalNotFound => StatusCode::NOT_FOUND,

            // 409 Conflict
            Self::AlreadyExists
            | Self::InvalidStatusTransition
            | Self::OrderOngoingExists
            | Self::OrderFinished
            | Self::PaymentInProgress
            | Self::WithdrawalPending => StatusCode::CONFLICT,

            // 401 Unauthorized
            Self::NotAuthenticated | Self::TokenExpired | Self::TokenInvalid => {
                StatusCode::UNAUTHORIZED
            }

            // 403 Forbidden
            Self::PermissionDenied
            | Self::RoleRequired
            | Self::AdminRequired
            | Self::IpNotAllowed => StatusCode::FORBIDDEN,

            // Gateway failures
            Self::GatewayNotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::GatewayRequestFailed => StatusCode::BAD_GATEWAY,
            Self::GatewayUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            Self::Unknown
            | Self::InternalError
            | Self::DatabaseError
            | Self::ConfigError
            | Self::InvariantViolation => StatusCode::INTERNAL_SERVER_ERROR,

            // 400 Bad Request (default for validation/business errors)
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
