//! Server configuration

use std::net::IpAddr;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::BoxError;

/// Server configuration, read once at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment: development | staging | production
    pub environment: String,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// HTTP port
    pub http_port: u16,
    /// HS256 secret shared with the identity service
    pub jwt_secret: String,
    /// Zibal merchant id
    pub zibal_merchant: String,
    /// Zibal API base URL
    pub zibal_base_url: String,
    /// Source IPs allowed to call the gateway callback (empty = allow all, development only)
    pub gateway_allowed_ips: Vec<IpAddr>,
    /// Reverse proxies whose `X-Forwarded-For` is believed
    pub trusted_proxy_ips: Vec<IpAddr>,
    /// How often the deferred task worker scans for due tasks
    pub task_poll_interval_secs: u64,
    /// How often gateway availability is probed
    pub gateway_health_interval_secs: u64,
    pub commerce: CommerceSettings,
}

/// Business settings handed to the commerce services
#[derive(Debug, Clone)]
pub struct CommerceSettings {
    /// Unpaid orders are cancelled this long after checkout
    pub order_timeout_minutes: i64,
    /// Delay before an unsettled gateway attempt is polled
    pub payment_verify_delay_minutes: i64,
    /// How long a gateway payment link stays usable
    pub payment_link_expiry_minutes: i64,
    /// Shipped orders auto-complete after this many business days
    pub delivery_business_days: u32,
    /// Platform fraction kept from each completed order
    pub commission_rate: Decimal,
    /// Minimum order total for sellers without their own minimum
    pub default_order_minimum: i64,
    pub withdrawal_min_amount: i64,
    /// Where gateways redirect the customer after payment
    pub payment_callback_url: String,
}

const MINUTE_MILLIS: i64 = 60_000;

impl CommerceSettings {
    pub fn order_timeout_millis(&self) -> i64 {
        self.order_timeout_minutes * MINUTE_MILLIS
    }

    pub fn payment_verify_delay_millis(&self) -> i64 {
        self.payment_verify_delay_minutes * MINUTE_MILLIS
    }

    pub fn payment_link_expiry_millis(&self) -> i64 {
        self.payment_link_expiry_minutes * MINUTE_MILLIS
    }
}

impl Default for CommerceSettings {
    fn default() -> Self {
        Self {
            order_timeout_minutes: 30,
            payment_verify_delay_minutes: 20,
            payment_link_expiry_minutes: 15,
            delivery_business_days: 7,
            commission_rate: Decimal::new(25, 3),
            default_order_minimum: 0,
            withdrawal_min_amount: 100_000,
            payment_callback_url: "http://localhost:8080/api/payments/callback".into(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Require a secret env var: must be set and non-empty in non-development environments.
    fn require_secret(name: &str, environment: &str) -> Result<String, BoxError> {
        let val = match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                if environment != "development" {
                    return Err(format!("{name} must be set in {environment} environment").into());
                }
                format!("dev-{name}-not-for-production")
            }
        };
        if val.is_empty() && environment != "development" {
            return Err(format!("{name} must not be empty in {environment} environment").into());
        }
        Ok(val)
    }

    fn parse_ip_list(name: &str, raw: &str) -> Result<Vec<IpAddr>, BoxError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpAddr>()
                    .map_err(|e| format!("invalid {name} entry {s:?}: {e}").into())
            })
            .collect()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, BoxError> {
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());
        let defaults = CommerceSettings::default();

        let gateway_allowed_ips = Self::parse_ip_list(
            "GATEWAY_ALLOWED_IPS",
            &std::env::var("GATEWAY_ALLOWED_IPS").unwrap_or_default(),
        )?;
        let trusted_proxy_ips = Self::parse_ip_list(
            "TRUSTED_PROXY_IPS",
            &std::env::var("TRUSTED_PROXY_IPS").unwrap_or_default(),
        )?;
        if gateway_allowed_ips.is_empty() && environment != "development" {
            return Err(
                format!("GATEWAY_ALLOWED_IPS must be set in {environment} environment").into(),
            );
        }

        let commission_rate = env_or("COMMISSION_RATE", defaults.commission_rate);
        if commission_rate < Decimal::ZERO || commission_rate > Decimal::ONE {
            return Err(format!("COMMISSION_RATE must be within [0, 1], got {commission_rate}").into());
        }

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?,
            http_port: env_or("HTTP_PORT", 8080),
            jwt_secret: Self::require_secret("JWT_SECRET", &environment)?,
            zibal_merchant: Self::require_secret("ZIBAL_MERCHANT", &environment)?,
            zibal_base_url: std::env::var("ZIBAL_BASE_URL")
                .unwrap_or_else(|_| "https://gateway.zibal.ir".into()),
            gateway_allowed_ips,
            trusted_proxy_ips,
            task_poll_interval_secs: env_or("TASK_POLL_INTERVAL_SECS", 5),
            gateway_health_interval_secs: env_or("GATEWAY_HEALTH_INTERVAL_SECS", 60),
            commerce: CommerceSettings {
                order_timeout_minutes: env_or("ORDER_TIMEOUT_MINUTES", defaults.order_timeout_minutes),
                payment_verify_delay_minutes: env_or(
                    "PAYMENT_VERIFY_DELAY_MINUTES",
                    defaults.payment_verify_delay_minutes,
                ),
                payment_link_expiry_minutes: env_or(
                    "PAYMENT_LINK_EXPIRY_MINUTES",
                    defaults.payment_link_expiry_minutes,
                ),
                delivery_business_days: env_or(
                    "DELIVERY_BUSINESS_DAYS",
                    defaults.delivery_business_days,
                ),
                commission_rate,
                default_order_minimum: env_or(
                    "DEFAULT_ORDER_MINIMUM",
                    defaults.default_order_minimum,
                ),
                withdrawal_min_amount: env_or(
                    "WITHDRAWAL_MIN_AMOUNT",
                    defaults.withdrawal_min_amount,
                ),
                payment_callback_url: std::env::var("PAYMENT_CALLBACK_URL")
                    .unwrap_or(defaults.payment_callback_url),
            },
            environment,
        })
    }
}
