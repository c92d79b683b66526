//! Outbound client for the Finik payment-creation endpoint.

use std::time::Duration;

use chrono::Utc;
use reqwest::{StatusCode, header::LOCATION, redirect};
use serde::Serialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use super::signer::{CanonicalRequest, RequestSigner, SigningError};
use crate::config::Config;
use crate::models::transaction::cents_to_amount;

/// Path of the payment-creation endpoint, relative to the API base URL.
pub const PAYMENT_PATH: &str = "/v1/payment";

/// Payment method requested from the processor.
pub const CARD_TYPE: &str = "FINIK_QR";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Failures of a payment-creation call.
///
/// `Configuration` and `Signing` mean this service is misconfigured;
/// `Rejected` and `Transport` mean the processor refused or could not be reached.
#[derive(Debug, thiserror::Error)]
pub enum FinikError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Configuration(String),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("Processor rejected payment (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Failed to reach payment processor: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    InvalidResponse(String),
}

/// Parameters of a new payment intent.
#[derive(Debug, Clone, Default)]
pub struct PaymentRequest {
    /// Amount in minor units (tyiyn); sent to the processor in major units.
    pub amount_cents: i64,
    pub redirect_url: String,
    pub account_id: String,
    pub merchant_category_code: String,
    pub name_en: String,
    pub webhook_url: String,
    pub description: Option<String>,
    /// Optional QR validity window, epoch millis.
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    /// Extra keys merged into `Data`; the processor echoes them back in callbacks.
    pub custom_fields: Map<String, Value>,
}

impl PaymentRequest {
    fn validate(&self) -> Result<(), FinikError> {
        if self.amount_cents <= 0 {
            return Err(FinikError::Validation(
                "Amount must be greater than 0".to_string(),
            ));
        }

        let required = [
            ("RedirectUrl", &self.redirect_url),
            ("AccountId", &self.account_id),
            ("MerchantCategoryCode", &self.merchant_category_code),
            ("NameEn", &self.name_en),
            ("WebhookUrl", &self.webhook_url),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(FinikError::Validation(format!("{} is required", name)));
            }
        }

        Ok(())
    }

    fn to_body(&self, payment_id: &str) -> Value {
        let mut data = Map::new();
        data.insert("accountId".into(), json!(self.account_id));
        data.insert(
            "merchantCategoryCode".into(),
            json!(self.merchant_category_code),
        );
        data.insert("name_en".into(), json!(self.name_en));
        data.insert("webhookUrl".into(), json!(self.webhook_url));
        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            data.insert("description".into(), json!(description));
        }
        if let Some(start) = self.start_date {
            data.insert("startDate".into(), json!(start));
        }
        if let Some(end) = self.end_date {
            data.insert("endDate".into(), json!(end));
        }
        for (key, value) in &self.custom_fields {
            data.insert(key.clone(), value.clone());
        }

        json!({
            "Amount": cents_to_amount(self.amount_cents),
            "CardType": CARD_TYPE,
            "PaymentId": payment_id,
            "RedirectUrl": self.redirect_url,
            "Data": data,
        })
    }
}

/// Result of a successful payment creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCreated {
    /// Our generated id; stored as the ledger's processor transaction id.
    pub payment_id: String,
    /// Where the end user must be sent to pay.
    pub payment_url: Option<String>,
    pub status: String,
}

/// Signed HTTP client for the processor's acquiring API.
pub struct FinikClient {
    http: reqwest::Client,
    base_url: String,
    host: String,
    api_key: Option<String>,
    private_key_pem: Option<String>,
}

impl FinikClient {
    /// Build a client. Redirects are never followed: a 3xx is the success answer.
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        private_key_pem: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let host = host_of(&base_url);

        Ok(Self {
            http,
            base_url,
            host,
            api_key,
            private_key_pem,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        Self::new(
            config.finik_base_url(),
            config.finik_api_key.clone(),
            config.private_key_pem(),
        )
    }

    /// Create a payment intent with the processor.
    ///
    /// # Process
    ///
    /// 1. Validate the request and credentials
    /// 2. Generate a fresh payment id (UUID v4)
    /// 3. Sign the canonical request with the merchant key
    /// 4. POST it and interpret the answer
    ///
    /// # Responses
    ///
    /// - 3xx: success, the `Location` header is the payment URL
    /// - other 2xx: success, the URL comes from the JSON `paymentUrl`
    /// - anything else: `FinikError::Rejected` with the processor's message
    ///
    /// Nothing is written to the ledger here; the caller stores the pending row.
    pub async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentCreated, FinikError> {
        request.validate()?;

        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                FinikError::Configuration(
                    "FINIK_API_KEY is not set in environment variables".to_string(),
                )
            })?;

        let signer = RequestSigner::from_pem(self.private_key_pem.as_deref())?;

        let payment_id = Uuid::new_v4().to_string();
        let body = serde_json::to_vec(&request.to_body(&payment_id))
            .map_err(|e| FinikError::Validation(format!("Failed to serialize payment: {}", e)))?;
        let timestamp = Utc::now().timestamp_millis().to_string();

        let canonical = CanonicalRequest::new("POST", PAYMENT_PATH, &body)
            .header("host", &self.host)
            .header("x-api-key", api_key)
            .header("x-api-timestamp", &timestamp)
            .to_canonical_string();
        let signature = signer.sign(&canonical)?;

        let response = self
            .http
            .post(format!("{}{}", self.base_url, PAYMENT_PATH))
            .header("content-type", "application/json")
            .header("x-api-key", api_key)
            .header("x-api-timestamp", &timestamp)
            .header("signature", signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status.is_redirection() {
            let payment_url = location.ok_or_else(|| {
                FinikError::InvalidResponse(format!(
                    "Processor answered HTTP {} without a Location header",
                    status.as_u16()
                ))
            })?;

            return Ok(PaymentCreated {
                payment_id,
                payment_url: Some(payment_url),
                status: "CREATED".to_string(),
            });
        }

        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            let data: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
            let payment_url = data
                .get("paymentUrl")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or(location);
            let payment_status = data
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("CREATED")
                .to_string();

            return Ok(PaymentCreated {
                payment_id,
                payment_url,
                status: payment_status,
            });
        }

        let message = error_message(status, &text);
        tracing::error!(
            status = status.as_u16(),
            url = %format!("{}{}", self.base_url, PAYMENT_PATH),
            "Finik API error: {}",
            message
        );

        Err(FinikError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

/// `host[:port]` of the base URL, as reqwest will send it in the `Host` header.
fn host_of(base_url: &str) -> String {
    url::Url::parse(base_url)
        .ok()
        .and_then(|url| {
            url.host_str().map(|host| match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            })
        })
        .unwrap_or_default()
}

/// Human-readable message from a processor error body.
fn error_message(status: StatusCode, text: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(text).ok();

    parsed
        .as_ref()
        .and_then(|data| {
            ["message", "ErrorMessage", "errorMessage"]
                .iter()
                .find_map(|key| data.get(*key).and_then(Value::as_str))
        })
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), text))
}
