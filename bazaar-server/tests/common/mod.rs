//! Test harness: in-memory store, scripted gateway, one active seller

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bazaar_server::config::CommerceSettings;
use bazaar_server::error::ServiceResult;
use bazaar_server::ledger::LedgerEntry;
use bazaar_server::payments::gateway::{
    GatewayError, GatewayRegistry, PaymentGateway, TransactionRequest, TransactionStatus,
};
use bazaar_server::state::AppState;
use bazaar_server::store::{MemoryStore, Store};
use bazaar_server::tasks::TaskWorker;
use shared::models::{
    GatewayId, GatewayStatus, Order, OrderDetail, ProductVariant, TransactionType, UserRole,
};
use shared::request::CheckoutRequest;

pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const SELLER: i64 = 100;
pub const CUSTOMER: i64 = 200;

/// Gateway whose answers are set per track id
pub struct FakeGateway {
    next_track: AtomicU64,
    healthy: AtomicBool,
    answers: Mutex<HashMap<String, Result<TransactionStatus, GatewayError>>>,
    pub inquiries: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            next_track: AtomicU64::new(5000),
            healthy: AtomicBool::new(true),
            answers: Mutex::new(HashMap::new()),
            inquiries: AtomicUsize::new(0),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn answer(&self, track_id: &str, status: GatewayStatus, amount: i64) {
        self.answers.lock().unwrap().insert(
            track_id.to_string(),
            Ok(TransactionStatus {
                status,
                amount,
                ref_number: Some(format!("ref-{track_id}")),
                paid_at: None,
            }),
        );
    }

    pub fn fail(&self, track_id: &str, err: GatewayError) {
        self.answers
            .lock()
            .unwrap()
            .insert(track_id.to_string(), Err(err));
    }

    fn lookup(&self, track_id: &str) -> Result<TransactionStatus, GatewayError> {
        self.answers
            .lock()
            .unwrap()
            .get(track_id)
            .cloned()
            .unwrap_or(Ok(TransactionStatus {
                status: GatewayStatus::Waiting,
                amount: 0,
                ref_number: None,
                paid_at: None,
            }))
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn id(&self) -> GatewayId {
        GatewayId::Zibal
    }

    async fn request_transaction(
        &self,
        _amount: i64,
        _callback_url: &str,
    ) -> Result<TransactionRequest, GatewayError> {
        let track = self.next_track.fetch_add(1, Ordering::SeqCst);
        Ok(TransactionRequest {
            track_id: track.to_string(),
        })
    }

    async fn verify_transaction(&self, track_id: &str) -> Result<TransactionStatus, GatewayError> {
        self.lookup(track_id)
    }

    async fn inquiry_transaction(
        &self,
        track_id: &str,
    ) -> Result<TransactionStatus, GatewayError> {
        self.inquiries.fetch_add(1, Ordering::SeqCst);
        self.lookup(track_id)
    }

    fn payment_link(&self, track_id: &str) -> String {
        format!("https://gateway.test/start/{track_id}")
    }

    async fn check_health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub gateway: Arc<FakeGateway>,
    pub state: AppState,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(CommerceSettings::default(), Vec::new()).await
    }

    pub async fn build(settings: CommerceSettings, allowed_ips: Vec<IpAddr>) -> Self {
        let store = MemoryStore::new();
        let gateway = Arc::new(FakeGateway::new());
        let registry = GatewayRegistry::new(vec![gateway.clone() as Arc<dyn PaymentGateway>]);
        let state = AppState::build(
            Arc::new(store.clone()),
            registry,
            settings,
            JWT_SECRET,
            allowed_ips,
        );

        state
            .accounts
            .provision_account(SELLER, UserRole::Seller)
            .await
            .unwrap();
        state.accounts.set_seller_active(SELLER, true).await.unwrap();

        Self {
            store,
            gateway,
            state,
        }
    }

    /// Provision a customer; returns their address id
    pub async fn customer(&self, user_id: i64) -> i64 {
        self.state
            .accounts
            .provision_account(user_id, UserRole::Customer)
            .await
            .unwrap();
        self.state
            .accounts
            .add_address(user_id, "12 Market Street", Some("1234567890"))
            .await
            .unwrap()
            .id
    }

    pub async fn variant(&self, price: i64, on_hand: i32) -> ProductVariant {
        self.store.insert_variant(SELLER, "Item", price, on_hand).await
    }

    pub async fn checkout(&self, user_id: i64, address_id: i64) -> ServiceResult<OrderDetail> {
        self.state
            .orders
            .checkout(
                user_id,
                &CheckoutRequest {
                    customer_address_id: address_id,
                    notes: None,
                },
            )
            .await
    }

    /// Variant A (195, stock 15) and B (200, stock 50), ten of each, checked out
    pub async fn scenario_order(&self) -> (OrderDetail, ProductVariant, ProductVariant) {
        let address = self.customer(CUSTOMER).await;
        let a = self.variant(195, 15).await;
        let b = self.variant(200, 50).await;
        self.state.carts.add_item(CUSTOMER, a.id, 10).await.unwrap();
        self.state.carts.add_item(CUSTOMER, b.id, 10).await.unwrap();
        let order = self.checkout(CUSTOMER, address).await.unwrap();
        (order, a, b)
    }

    pub async fn fund(&self, user_id: i64, amount: i64) {
        let mut tx = self.store.begin().await.unwrap();
        self.state
            .wallet
            .credit(
                tx.as_mut(),
                user_id,
                amount,
                LedgerEntry::new(TransactionType::Deposit),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    pub async fn variant_row(&self, id: i64) -> ProductVariant {
        let mut tx = self.store.begin().await.unwrap();
        tx.variant(id).await.unwrap().unwrap()
    }

    pub async fn order(&self, id: i64) -> Order {
        let mut tx = self.store.begin().await.unwrap();
        tx.order(id).await.unwrap().unwrap()
    }

    pub async fn balance(&self, user_id: i64) -> i64 {
        self.state.wallet.balance(user_id).await.unwrap().balance
    }

    pub fn worker(&self) -> TaskWorker {
        TaskWorker::new(
            Arc::new(self.store.clone()),
            self.state.task_runner(),
            Duration::from_secs(1),
        )
    }
}

pub const MINUTE: i64 = 60_000;
pub const DAY: i64 = 24 * 60 * MINUTE;
