//! Payment gateway strategy
//!
//! Each gateway implements [`PaymentGateway`]; the [`GatewayRegistry`]
//! dispatches by [`GatewayId`] and caches which gateways answered the last
//! health probe.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use shared::error::{AppError, ErrorCode};
use shared::models::{GatewayId, GatewayStatus};
use shared::response::GatewayInfo;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("gateway {0} is not implemented")]
    NotImplemented(GatewayId),

    #[error("gateway {0} is not configured")]
    NotFound(GatewayId),

    #[error("gateway request failed: {0}")]
    Request(String),

    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The gateway answered with a business error code
    #[error("gateway rejected the request ({code}): {message}")]
    Response { code: i32, message: String },
}

impl GatewayError {
    /// Whether the same call may succeed later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Request(_) | GatewayError::Timeout | GatewayError::Unavailable(_)
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::NotImplemented(_) => ErrorCode::GatewayNotImplemented,
            GatewayError::NotFound(_) => ErrorCode::GatewayNotFound,
            GatewayError::Request(_) | GatewayError::Response { .. } => {
                ErrorCode::GatewayRequestFailed
            }
            GatewayError::Timeout => ErrorCode::GatewayTimeout,
            GatewayError::Unavailable(_) => ErrorCode::GatewayUnavailable,
        }
    }

    pub fn to_app_error(&self) -> AppError {
        let err = AppError::with_message(self.code(), self.to_string());
        match self {
            GatewayError::NotImplemented(id) | GatewayError::NotFound(id) => {
                err.with_detail("gatewayId", id.as_str())
            }
            GatewayError::Response { code, .. } => err.with_detail("gatewayCode", *code),
            _ => err,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Response {
                code: -1,
                message: format!("malformed response: {e}"),
            }
        } else if e.status().is_some_and(|s| s.is_server_error()) {
            GatewayError::Unavailable(e.to_string())
        } else {
            GatewayError::Request(e.to_string())
        }
    }
}

/// A created transaction
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub track_id: String,
}

/// Gateway answer to verify or inquiry
#[derive(Debug, Clone)]
pub struct TransactionStatus {
    pub status: GatewayStatus,
    /// Amount the gateway reports, in the smallest currency unit
    pub amount: i64,
    pub ref_number: Option<String>,
    pub paid_at: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn id(&self) -> GatewayId;

    /// Open a transaction; the customer pays through [`PaymentGateway::payment_link`]
    async fn request_transaction(
        &self,
        amount: i64,
        callback_url: &str,
    ) -> Result<TransactionRequest, GatewayError>;

    /// Confirm a paid transaction (captures the money)
    async fn verify_transaction(&self, track_id: &str) -> Result<TransactionStatus, GatewayError>;

    /// Read the transaction status without side effects
    async fn inquiry_transaction(&self, track_id: &str)
    -> Result<TransactionStatus, GatewayError>;

    fn payment_link(&self, track_id: &str) -> String;

    /// Whether the gateway is reachable right now
    async fn check_health(&self) -> bool;
}

/// Gateway dispatch plus the availability cache
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    clients: Arc<HashMap<GatewayId, Arc<dyn PaymentGateway>>>,
    availability: Arc<DashMap<GatewayId, bool>>,
}

impl GatewayRegistry {
    pub fn new(clients: Vec<Arc<dyn PaymentGateway>>) -> Self {
        let availability = DashMap::new();
        let clients: HashMap<_, _> = clients
            .into_iter()
            .map(|c| {
                availability.insert(c.id(), true);
                (c.id(), c)
            })
            .collect();
        Self {
            clients: Arc::new(clients),
            availability: Arc::new(availability),
        }
    }

    /// Client for a gateway, or a typed error for gateways without one
    pub fn get(&self, id: GatewayId) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        match id {
            GatewayId::ZarinPal | GatewayId::AsanPardakht => Err(GatewayError::NotImplemented(id)),
            GatewayId::Zibal => self
                .clients
                .get(&id)
                .cloned()
                .ok_or(GatewayError::NotFound(id)),
        }
    }

    pub fn is_available(&self, id: GatewayId) -> bool {
        self.availability.get(&id).is_some_and(|a| *a)
    }

    pub fn any_available(&self) -> bool {
        self.availability.iter().any(|e| *e.value())
    }

    pub fn set_available(&self, id: GatewayId, available: bool) {
        if self.clients.contains_key(&id) {
            self.availability.insert(id, available);
        }
    }

    /// Gateways customers can pay with right now
    pub fn available_gateways(&self) -> Vec<GatewayInfo> {
        GatewayId::ALL
            .iter()
            .filter(|id| self.is_available(**id))
            .map(|id| GatewayInfo {
                id: *id,
                name: id.display_name().to_string(),
            })
            .collect()
    }

    /// Probe every registered gateway and refresh the cache
    ///
    /// Returns the number of available gateways.
    pub async fn refresh_health(&self) -> usize {
        let mut up = 0;
        for (id, client) in self.clients.iter() {
            let healthy = client.check_health().await;
            let was = self.availability.insert(*id, healthy);
            if was != Some(healthy) {
                if healthy {
                    tracing::info!(gateway = %id, "Payment gateway is back");
                } else {
                    tracing::warn!(gateway = %id, "Payment gateway is down");
                }
            }
            if healthy {
                up += 1;
            }
        }
        up
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeGateway;
    use super::*;

    #[test]
    fn test_unimplemented_gateways_fail_at_dispatch() {
        let registry = GatewayRegistry::new(vec![Arc::new(FakeGateway::new())]);
        assert!(matches!(
            registry.get(GatewayId::ZarinPal),
            Err(GatewayError::NotImplemented(GatewayId::ZarinPal))
        ));
        assert!(registry.get(GatewayId::Zibal).is_ok());
    }

    #[test]
    fn test_unconfigured_gateway() {
        let registry = GatewayRegistry::default();
        assert!(matches!(
            registry.get(GatewayId::Zibal),
            Err(GatewayError::NotFound(_))
        ));
        assert!(!registry.any_available());
    }

    #[tokio::test]
    async fn test_health_refresh_updates_availability() {
        let fake = Arc::new(FakeGateway::new());
        let registry = GatewayRegistry::new(vec![fake.clone()]);
        assert_eq!(registry.available_gateways().len(), 1);

        fake.set_healthy(false);
        assert_eq!(registry.refresh_health().await, 0);
        assert!(!registry.any_available());
        assert!(registry.available_gateways().is_empty());

        fake.set_healthy(true);
        assert_eq!(registry.refresh_health().await, 1);
        assert!(registry.is_available(GatewayId::Zibal));
    }

    #[test]
    fn test_error_classification() {
        assert!(GatewayError::Timeout.is_transient());
        assert!(!GatewayError::NotImplemented(GatewayId::AsanPardakht).is_transient());
        assert_eq!(
            GatewayError::NotImplemented(GatewayId::AsanPardakht)
                .to_app_error()
                .http_status(),
            http::StatusCode::NOT_IMPLEMENTED
        );
    }
}
