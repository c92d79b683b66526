//! Processor callback endpoint.
//!
//! The body is taken as raw bytes: the signature covers the exact bytes on
//! the wire, so nothing is parsed until verification has run.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
};

use crate::error::AppError;
use crate::models::payment::WebhookAck;
use crate::models::webhook::WebhookPayload;
use crate::services::webhook_service;
use crate::state::AppState;

/// Receive a payment status callback.
///
/// # Endpoint
///
/// `POST /api/payments/webhook`
///
/// # Process
///
/// 1. Verify the RSA signature over the canonical request
/// 2. Parse the body and read the transaction id
/// 3. Reconcile the ledger and run first-success side effects
///
/// # Request Body
///
/// ```json
/// {
///   "transactionId": "3f1c...",
///   "status": "SUCCEEDED",
///   "amount": 500,
///   "fields": { "paymentType": "subscription", "userId": "550e8400-..." }
/// }
/// ```
///
/// # Response (200)
///
/// ```json
/// {
///   "success": true,
///   "message": "Webhook processed",
///   "transactionId": "770e8400-..."
/// }
/// ```
///
/// # Errors
///
/// - 401 when the signature is missing or wrong (unless enforcement is off)
/// - 400 when the body is not a JSON object or has no transaction id
/// - 500 on ledger failures, so the processor retries
pub async fn receive_webhook(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    if let Err(e) = state.validator.verify_request(&method, &uri, &headers, &body) {
        if state.enforce_signatures {
            tracing::warn!("Webhook rejected: {}", e);
            return Err(AppError::InvalidSignature);
        }
        tracing::warn!("Webhook signature check failed ({}), processing anyway", e);
    }

    let raw = serde_json::from_slice(&body)
        .map_err(|e| AppError::MalformedPayload(format!("Body is not valid JSON: {}", e)))?;
    let payload =
        WebhookPayload::from_value(raw).map_err(|e| AppError::MalformedPayload(e.to_string()))?;

    tracing::info!(
        payment_id = %payload.transaction_id,
        status = payload.status.as_str(),
        "Webhook received"
    );

    let reconciliation =
        webhook_service::reconcile(state.transactions.as_ref(), state.users.as_ref(), &payload)
            .await?;

    tracing::info!(
        transaction_id = %reconciliation.transaction.id,
        inserted = reconciliation.inserted,
        became_succeeded = reconciliation.became_succeeded,
        provisioning = ?reconciliation.provisioning,
        "Webhook reconciled"
    );

    Ok(Json(WebhookAck {
        success: true,
        message: "Webhook processed".to_string(),
        transaction_id: reconciliation.transaction.id,
    }))
}
