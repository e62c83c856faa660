//! Application state
//!
//! Every service is built once here and shared by the HTTP handlers and
//! the background loops.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

use crate::accounts::AccountService;
use crate::cart::CartService;
use crate::config::{CommerceSettings, Config};
use crate::error::BoxError;
use crate::ledger::{StockLedger, WalletLedger};
use crate::orders::OrderLifecycle;
use crate::payments::PaymentCoordinator;
use crate::payments::gateway::{GatewayRegistry, PaymentGateway};
use crate::payments::zibal::ZibalGateway;
use crate::store::{PgStore, Store};
use crate::tasks::{CommerceTaskRunner, TaskRunner};

const DB_MAX_CONNECTIONS: u32 = 20;
const DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub accounts: AccountService,
    pub carts: CartService,
    pub orders: OrderLifecycle,
    pub payments: PaymentCoordinator,
    pub wallet: WalletLedger,
    pub gateways: GatewayRegistry,
    /// HS256 secret for bearer tokens
    pub jwt_secret: Arc<str>,
    /// Sources accepted on the gateway callback
    pub gateway_allowed_ips: Arc<[IpAddr]>,
    /// Peers allowed to report the client address in `X-Forwarded-For`
    pub trusted_proxy_ips: Arc<[IpAddr]>,
}

impl AppState {
    /// Connect to PostgreSQL, run migrations and wire the Zibal client
    pub async fn new(config: &Config) -> Result<Self, BoxError> {
        let pool = PgPoolOptions::new()
            .max_connections(DB_MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(DB_ACQUIRE_TIMEOUT_SECS))
            .connect(&config.database_url)
            .await?;
        let store = PgStore::new(pool);
        store.migrate().await?;
        tracing::info!("Database migrations applied");

        let zibal: Arc<dyn PaymentGateway> = Arc::new(ZibalGateway::new(
            config.zibal_merchant.clone(),
            config.zibal_base_url.clone(),
        )?);

        Ok(Self::build(
            Arc::new(store),
            GatewayRegistry::new(vec![zibal]),
            config.commerce.clone(),
            &config.jwt_secret,
            config.gateway_allowed_ips.clone(),
        )
        .with_trusted_proxies(config.trusted_proxy_ips.clone()))
    }

    /// Wire services over an arbitrary store and gateway set
    pub fn build(
        store: Arc<dyn Store>,
        gateways: GatewayRegistry,
        settings: CommerceSettings,
        jwt_secret: &str,
        gateway_allowed_ips: Vec<IpAddr>,
    ) -> Self {
        let settings = Arc::new(settings);
        let wallet = WalletLedger::new(store.clone(), settings.withdrawal_min_amount);
        let orders = OrderLifecycle::new(
            store.clone(),
            StockLedger,
            wallet.clone(),
            gateways.clone(),
            settings.clone(),
        );
        let payments = PaymentCoordinator::new(
            store.clone(),
            gateways.clone(),
            orders.clone(),
            wallet.clone(),
            settings,
        );

        Self {
            accounts: AccountService::new(store.clone()),
            carts: CartService::new(store.clone()),
            orders,
            payments,
            wallet,
            gateways,
            store,
            jwt_secret: Arc::from(jwt_secret),
            gateway_allowed_ips: Arc::from(gateway_allowed_ips),
            trusted_proxy_ips: Arc::from(Vec::new()),
        }
    }

    pub fn with_trusted_proxies(mut self, proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxy_ips = Arc::from(proxies);
        self
    }

    /// Runner for the deferred task worker
    pub fn task_runner(&self) -> Arc<dyn TaskRunner> {
        Arc::new(CommerceTaskRunner::new(
            self.orders.clone(),
            self.payments.clone(),
        ))
    }

    /// Probe gateways, then release held orders if any gateway is up
    pub async fn refresh_gateways(&self) {
        let available = self.gateways.refresh_health().await;
        if available == 0 {
            return;
        }
        if let Err(e) = self.orders.promote_held_orders().await {
            tracing::error!(error = %e, "Failed to release held orders");
        }
    }
}
