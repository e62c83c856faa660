//! Zibal IPG client (REST, no SDK)

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use shared::models::{GatewayId, GatewayStatus};

use super::gateway::{GatewayError, PaymentGateway, TransactionRequest, TransactionStatus};

const REQUEST_TIMEOUT_SECS: u64 = 4;

/// `result` of a successful call
const RESULT_SUCCESS: i32 = 100;
/// `result` of verify on an already verified transaction
const RESULT_ALREADY_VERIFIED: i32 = 201;
/// `result` of verify on an unpaid or failed transaction
const RESULT_NOT_PAID: i32 = 202;

pub struct ZibalGateway {
    client: reqwest::Client,
    merchant: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZibalResponse {
    result: i32,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    track_id: Option<Value>,
    #[serde(default)]
    status: Option<i32>,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    ref_number: Option<Value>,
    #[serde(default)]
    paid_at: Option<String>,
}

/// Zibal sends ids as JSON numbers; keep them as text
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Numeric track ids go back as numbers
fn track_id_value(track_id: &str) -> Value {
    track_id
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(track_id))
}

fn result_error(resp: &ZibalResponse) -> GatewayError {
    GatewayError::Response {
        code: resp.result,
        message: resp.message.clone().unwrap_or_default(),
    }
}

impl ZibalResponse {
    fn into_status(self) -> TransactionStatus {
        TransactionStatus {
            status: GatewayStatus::from(self.status.unwrap_or(GatewayStatus::Waiting.code())),
            amount: self.amount.unwrap_or(0),
            ref_number: self.ref_number.as_ref().and_then(id_text),
            paid_at: self.paid_at,
        }
    }
}

impl ZibalGateway {
    pub fn new(merchant: impl Into<String>, base_url: impl Into<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            merchant: merchant.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn call(&self, path: &str, body: Value) -> Result<ZibalResponse, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/v1/{path}", self.base_url))
            .json(&body)
            .send()
            .await?;
        if resp.status().is_server_error() {
            return Err(GatewayError::Unavailable(format!(
                "zibal {path} answered {}",
                resp.status()
            )));
        }
        let parsed: ZibalResponse = resp.json().await?;
        tracing::debug!(path, result = parsed.result, "Zibal response");
        Ok(parsed)
    }

    async fn status_call(&self, path: &str, track_id: &str) -> Result<ZibalResponse, GatewayError> {
        self.call(
            path,
            json!({ "merchant": self.merchant, "trackId": track_id_value(track_id) }),
        )
        .await
    }
}

#[async_trait]
impl PaymentGateway for ZibalGateway {
    fn id(&self) -> GatewayId {
        GatewayId::Zibal
    }

    async fn request_transaction(
        &self,
        amount: i64,
        callback_url: &str,
    ) -> Result<TransactionRequest, GatewayError> {
        let resp = self
            .call(
                "request",
                json!({
                    "merchant": self.merchant,
                    "amount": amount,
                    "callbackUrl": callback_url,
                }),
            )
            .await?;
        if resp.result != RESULT_SUCCESS {
            tracing::error!(result = resp.result, message = ?resp.message, "Zibal refused transaction request");
            return Err(result_error(&resp));
        }
        let track_id = resp
            .track_id
            .as_ref()
            .and_then(id_text)
            .ok_or_else(|| GatewayError::Response {
                code: resp.result,
                message: "missing trackId".into(),
            })?;
        Ok(TransactionRequest { track_id })
    }

    async fn verify_transaction(&self, track_id: &str) -> Result<TransactionStatus, GatewayError> {
        let resp = self.status_call("verify", track_id).await?;
        match resp.result {
            RESULT_SUCCESS => Ok(TransactionStatus {
                status: GatewayStatus::PaidVerified,
                ..resp.into_status()
            }),
            RESULT_ALREADY_VERIFIED => self.inquiry_transaction(track_id).await,
            RESULT_NOT_PAID => {
                let status = resp
                    .status
                    .map(GatewayStatus::from)
                    .filter(|s| !s.is_paid())
                    .unwrap_or(GatewayStatus::Failed(RESULT_NOT_PAID));
                Ok(TransactionStatus {
                    status,
                    ..resp.into_status()
                })
            }
            _ => Err(result_error(&resp)),
        }
    }

    async fn inquiry_transaction(&self, track_id: &str) -> Result<TransactionStatus, GatewayError> {
        let resp = self.status_call("inquiry", track_id).await?;
        if resp.result != RESULT_SUCCESS {
            return Err(result_error(&resp));
        }
        Ok(resp.into_status())
    }

    fn payment_link(&self, track_id: &str) -> String {
        format!("{}/start/{track_id}", self.base_url)
    }

    async fn check_health(&self) -> bool {
        match self.client.get(&self.base_url).send().await {
            Ok(resp) => !resp.status().is_server_error(),
            Err(e) => {
                tracing::debug!(error = %e, "Zibal health probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_id_round_trip_as_number() {
        assert_eq!(track_id_value("3714061657"), json!(3714061657_i64));
        assert_eq!(track_id_value("abc"), json!("abc"));
        assert_eq!(id_text(&json!(3714061657_i64)).as_deref(), Some("3714061657"));
    }

    #[test]
    fn test_parse_verify_response() {
        let resp: ZibalResponse = serde_json::from_value(json!({
            "paidAt": "2024-06-03T10:00:00.000000",
            "amount": 3950,
            "result": 100,
            "status": 1,
            "refNumber": 12345,
            "message": "success"
        }))
        .unwrap();
        let status = resp.into_status();
        assert_eq!(status.status, GatewayStatus::PaidVerified);
        assert_eq!(status.amount, 3950);
        assert_eq!(status.ref_number.as_deref(), Some("12345"));
    }

    #[test]
    fn test_payment_link() {
        let gw = ZibalGateway::new("zibal", "https://gateway.zibal.ir/").unwrap();
        assert_eq!(gw.payment_link("42"), "https://gateway.zibal.ir/start/42");
    }
}
