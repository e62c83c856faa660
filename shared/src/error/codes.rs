//! Unified error codes for the Bazaar marketplace
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 3xxx: Account and seller errors
//! - 4xxx: Order errors
//! - 5xxx: Payment and gateway errors
//! - 6xxx: Product, stock and cart errors
//! - 7xxx: Wallet errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// Serialized as the bare `u16` so clients can switch on stable numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Required field missing
    RequiredField = 7,
    /// Value out of range
    ValueOutOfRange = 8,
    /// Requested state change is not legal from the current state
    InvalidStatusTransition = 10,

    // ==================== 1xxx: Auth ====================
    /// User is not authenticated
    NotAuthenticated = 1001,
    /// Token has expired
    TokenExpired = 1003,
    /// Token is invalid
    TokenInvalid = 1004,

    // ==================== 2xxx: Permission ====================
    /// Permission denied
    PermissionDenied = 2001,
    /// Specific role required
    RoleRequired = 2002,
    /// Admin role required
    AdminRequired = 2003,
    /// Request origin is not on the allowlist
    IpNotAllowed = 2010,

    // ==================== 3xxx: Account ====================
    /// Account has not been provisioned
    AccountNotFound = 3001,
    /// Seller account is not active/verified
    SellerInactive = 3002,
    /// Customer address not found
    AddressNotFound = 3003,
    /// Bank card not found or not owned by the user
    BankCardNotFound = 3004,

    // ==================== 4xxx: Order ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Selected address does not belong to the customer
    OrderInvalidAddress = 4003,
    /// Customer already has an ongoing order with this seller
    OrderOngoingExists = 4004,
    /// Cart total is below the seller minimum
    OrderBelowMinimum = 4005,
    /// Order is in a terminal state
    OrderFinished = 4006,
    /// Seller requested a status outside the allowed set
    OrderInvalidSellerStatus = 4007,
    /// Shipping requires a tracking code
    TrackingCodeRequired = 4008,
    /// Cancelling requires a reason
    CancelReasonRequired = 4009,
    /// Order can no longer be cancelled by the customer
    OrderNotCancellable = 4010,
    /// Order is not awaiting payment
    OrderNotPayable = 4011,

    // ==================== 5xxx: Payment ====================
    /// Payment was not successful
    PaymentFailed = 5001,
    /// Payment not found
    PaymentNotFound = 5002,
    /// Another payment attempt is already in progress
    PaymentInProgress = 5003,
    /// Gateway reported an amount different from the payment
    PaymentAmountMismatch = 5004,
    /// Payment method requires a gateway selection
    PaymentMethodInvalid = 5005,
    /// Gateway integration is not implemented
    GatewayNotImplemented = 5101,
    /// Gateway is not known
    GatewayNotFound = 5102,
    /// Gateway request failed or returned an unexpected response
    GatewayRequestFailed = 5103,
    /// Gateway did not answer in time
    GatewayTimeout = 5104,
    /// No gateway is currently available
    GatewayUnavailable = 5105,

    // ==================== 6xxx: Product / Cart ====================
    /// Product variant not found
    VariantNotFound = 6001,
    /// Product is disabled by the seller
    ProductDisabled = 6002,
    /// Product is not available for sale
    ProductUnavailable = 6003,
    /// Requested quantity exceeds available stock
    InsufficientStock = 6004,
    /// Cart has no items
    CartEmpty = 6101,
    /// Cart items must come from a single seller
    CartMixedSellers = 6102,
    /// Sellers cannot add their own products to a cart
    CartOwnProduct = 6103,
    /// Cart item not found
    CartItemNotFound = 6104,
    /// Quantity must be positive
    CartQuantityInvalid = 6105,

    // ==================== 7xxx: Wallet ====================
    /// Wallet not found
    WalletNotFound = 7001,
    /// Wallet balance is not enough
    InsufficientFunds = 7002,
    /// A pending withdrawal already exists
    WithdrawalPending = 7003,
    /// Withdrawal amount is below the minimum
    WithdrawalBelowMinimum = 7004,
    /// No pending withdrawal exists
    WithdrawalNotFound = 7005,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Configuration error
    ConfigError = 9003,
    /// A stored invariant was found broken
    InvariantViolation = 9004,
}

impl ErrorCode {
    /// Every defined code, in declaration order
    pub const ALL: &'static [ErrorCode] = &[
        ErrorCode::Success,
        ErrorCode::Unknown,
        ErrorCode::ValidationFailed,
        ErrorCode::NotFound,
        ErrorCode::AlreadyExists,
        ErrorCode::InvalidRequest,
        ErrorCode::RequiredField,
        ErrorCode::ValueOutOfRange,
        ErrorCode::InvalidStatusTransition,
        ErrorCode::NotAuthenticated,
        ErrorCode::TokenExpired,
        ErrorCode::TokenInvalid,
        ErrorCode::PermissionDenied,
        ErrorCode::RoleRequired,
        ErrorCode::AdminRequired,
        ErrorCode::IpNotAllowed,
        ErrorCode::AccountNotFound,
        ErrorCode::SellerInactive,
        ErrorCode::AddressNotFound,
        ErrorCode::BankCardNotFound,
        ErrorCode::OrderNotFound,
        ErrorCode::OrderInvalidAddress,
        ErrorCode::OrderOngoingExists,
        ErrorCode::OrderBelowMinimum,
        ErrorCode::OrderFinished,
        ErrorCode::OrderInvalidSellerStatus,
        ErrorCode::TrackingCodeRequired,
        ErrorCode::CancelReasonRequired,
        ErrorCode::OrderNotCancellable,
        ErrorCode::OrderNotPayable,
        ErrorCode::PaymentFailed,
        ErrorCode::PaymentNotFound,
        ErrorCode::PaymentInProgress,
        ErrorCode::PaymentAmountMismatch,
        ErrorCode::PaymentMethodInvalid,
        ErrorCode::GatewayNotImplemented,
        ErrorCode::GatewayNotFound,
        ErrorCode::GatewayRequestFailed,
        ErrorCode::GatewayTimeout,
        ErrorCode::GatewayUnavailable,
        ErrorCode::VariantNotFound,
        ErrorCode::ProductDisabled,
        ErrorCode::ProductUnavailable,
        ErrorCode::InsufficientStock,
        ErrorCode::CartEmpty,
        ErrorCode::CartMixedSellers,
        ErrorCode::CartOwnProduct,
        ErrorCode::CartItemNotFound,
        ErrorCode::CartQuantityInvalid,
        ErrorCode::WalletNotFound,
        ErrorCode::InsufficientFunds,
        ErrorCode::WithdrawalPending,
        ErrorCode::WithdrawalBelowMinimum,
        ErrorCode::WithdrawalNotFound,
        ErrorCode::InternalError,
        ErrorCode::DatabaseError,
        ErrorCode::ConfigError,
        ErrorCode::InvariantViolation,
    ];

    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Get the developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::RequiredField => "Required field is missing",
            ErrorCode::ValueOutOfRange => "Value is out of range",
            ErrorCode::InvalidStatusTransition => "Status change is not allowed from the current state",

            // Auth
            ErrorCode::NotAuthenticated => "User is not authenticated",
            ErrorCode::TokenExpired => "Authentication token has expired",
            ErrorCode::TokenInvalid => "Authentication token is invalid",

            // Permission
            ErrorCode::PermissionDenied => "Permission denied",
            ErrorCode::RoleRequired => "Specific role is required",
            ErrorCode::AdminRequired => "Administrator role is required",
            ErrorCode::IpNotAllowed => "Request origin is not allowed",

            // Account
            ErrorCode::AccountNotFound => "Account not found",
            ErrorCode::SellerInactive => "The seller is not active",
            ErrorCode::AddressNotFound => "Address not found",
            ErrorCode::BankCardNotFound => "Bank card not found",

            // Order
            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::OrderInvalidAddress => "The selected address does not belong to this user",
            ErrorCode::OrderOngoingExists => "An ongoing order with this seller already exists",
            ErrorCode::OrderBelowMinimum => "Order total is below the seller minimum",
            ErrorCode::OrderFinished => "The order is already finished",
            ErrorCode::OrderInvalidSellerStatus => "Sellers can only set processing, shipped or cancelled",
            ErrorCode::TrackingCodeRequired => "A tracking code is required to ship the order",
            ErrorCode::CancelReasonRequired => "A reason is required to cancel the order",
            ErrorCode::OrderNotCancellable => "The order can no longer be cancelled",
            ErrorCode::OrderNotPayable => "The order is not awaiting payment",

            // Payment
            ErrorCode::PaymentFailed => "Payment was not successful",
            ErrorCode::PaymentNotFound => "Payment not found",
            ErrorCode::PaymentInProgress => "A payment attempt is already in progress",
            ErrorCode::PaymentAmountMismatch => "Paid amount does not match the payment",
            ErrorCode::PaymentMethodInvalid => "A gateway must be selected for gateway payments",
            ErrorCode::GatewayNotImplemented => "The selected payment gateway is not implemented",
            ErrorCode::GatewayNotFound => "The selected payment gateway does not exist",
            ErrorCode::GatewayRequestFailed => "The payment gateway request failed",
            ErrorCode::GatewayTimeout => "The payment gateway did not respond in time",
            ErrorCode::GatewayUnavailable => "The payment gateway is unavailable",

            // Product / Cart
            ErrorCode::VariantNotFound => "Product variant not found",
            ErrorCode::ProductDisabled => "The product is disabled",
            ErrorCode::ProductUnavailable => "The product is not available",
            ErrorCode::InsufficientStock => "Requested quantity exceeds available stock",
            ErrorCode::CartEmpty => "The cart has no items",
            ErrorCode::CartMixedSellers => "Cart items must belong to a single seller",
            ErrorCode::CartOwnProduct => "Sellers cannot buy their own products",
            ErrorCode::CartItemNotFound => "Cart item not found",
            ErrorCode::CartQuantityInvalid => "Quantity must be at least one",

            // Wallet
            ErrorCode::WalletNotFound => "Wallet not found",
            ErrorCode::InsufficientFunds => "Not enough wallet balance",
            ErrorCode::WithdrawalPending => "A pending withdrawal already exists",
            ErrorCode::WithdrawalBelowMinimum => "Withdrawal amount is below the minimum",
            ErrorCode::WithdrawalNotFound => "There is no pending withdrawal",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::ConfigError => "Configuration error",
            ErrorCode::InvariantViolation => "Internal consistency check failed",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.code() == value)
            .ok_or(InvalidErrorCode(value))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
