//! Request and response bodies of the payment-creation and polling routes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::registration::RegistrationData;
use super::transaction::PaymentStatus;

/// Request to start a subscription payment.
///
/// # JSON Example
///
/// ```json
/// {
///   "amount": 500,
///   "description": "Monthly subscription",
///   "paymentType": "subscription",
///   "subscriptionType": "3"
/// }
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    /// Amount in som
    pub amount: f64,
    pub description: Option<String>,
    pub payment_type: Option<String>,
    /// Number of months, as a number or a numeric string
    pub subscription_type: Option<Value>,
}

/// Request to pay for a new account.
///
/// # JSON Example
///
/// ```json
/// {
///   "amount": 500,
///   "registrationData": {
///     "username": "ann",
///     "email": "ann@example.com",
///     "password": "secret1",
///     "referralCode": "AB12CD34",
///     "subscription": { "type": "1" }
///   }
/// }
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRegistrationPaymentRequest {
    pub amount: f64,
    pub description: Option<String>,
    pub payment_type: Option<String>,
    pub registration_data: RegistrationData,
}

/// Response to either payment-creation route.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub success: bool,
    pub message: String,
    /// Processor correlation id
    pub payment_id: String,
    pub payment_url: Option<String>,
    /// Ledger row id
    pub transaction_id: Uuid,
    pub amount: Value,
}

/// Polling view of a payment.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub success: bool,
    pub payment_id: String,
    pub transaction_id: Uuid,
    pub status: PaymentStatus,
    pub amount: Value,
    /// Whether an account is linked to this payment yet.
    pub account_linked: bool,
}

/// Acknowledgement returned to the processor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub success: bool,
    pub message: String,
    pub transaction_id: Uuid,
}
