//! Payment HTTP handlers.
//!
//! This module implements the payment API endpoints:
//! - POST /api/payments/create - Subscription payment
//! - POST /api/payments/create-registration - Pay-to-register payment
//! - GET /api/payments/status/{payment_id} - Poll a payment
//! - GET /api/payments/transactions - Caller's transactions
//! - GET /api/payments/transactions/{id} - One of the caller's transactions

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderMap, header},
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::{AuthUser, optional_user};
use crate::models::payment::{
    CreatePaymentRequest, CreateRegistrationPaymentRequest, PaymentResponse, PaymentStatusResponse,
};
use crate::models::transaction::TransactionResponse;
use crate::services::payment_service;
use crate::state::AppState;

/// Most recent transactions returned by the listing.
const TRANSACTION_LIST_LIMIT: i64 = 50;

/// Start a subscription payment.
///
/// A bearer token is optional; when present the payment is tied to the caller.
///
/// # Request Body
///
/// ```json
/// {
///   "amount": 500,
///   "description": "Monthly subscription",
///   "subscriptionType": "1"
/// }
/// ```
///
/// # Response (200)
///
/// ```json
/// {
///   "success": true,
///   "message": "Payment created successfully",
///   "paymentId": "3f1c...",
///   "paymentUrl": "https://qr.finik.kg/...",
///   "transactionId": "770e8400-...",
///   "amount": 500
/// }
/// ```
pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<PaymentResponse>, AppError> {
    let user_id = optional_user(&headers, &state.jwt_secret);

    let response = payment_service::create_payment(
        &state.finik,
        state.transactions.as_ref(),
        &state.payment_settings,
        request_host(&headers),
        user_id,
        request,
    )
    .await?;

    Ok(Json(response))
}

/// Start a payment that creates the account once paid.
///
/// # Validation
///
/// - `username`: 3 to 50 characters
/// - `email`: valid shape
/// - `password`: at least 6 characters
/// - `amount`: greater than 0
pub async fn create_registration_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRegistrationPaymentRequest>,
) -> Result<Json<PaymentResponse>, AppError> {
    let response = payment_service::create_registration_payment(
        &state.finik,
        state.transactions.as_ref(),
        state.users.as_ref(),
        &state.payment_settings,
        request_host(&headers),
        request,
    )
    .await?;

    Ok(Json(response))
}

/// Ledger status of a payment, by processor payment id.
pub async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    let status = payment_service::payment_status(state.transactions.as_ref(), &payment_id).await?;

    Ok(Json(status))
}

/// The caller's most recent transactions, newest first.
///
/// # Response (200)
///
/// ```json
/// {
///   "transactions": [
///     { "id": "770e8400-...", "paymentId": "3f1c...", "amount": 500, "status": "SUCCEEDED" }
///   ]
/// }
/// ```
pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Value>, AppError> {
    let transactions: Vec<TransactionResponse> = state
        .transactions
        .list_for_user(auth.user_id, TRANSACTION_LIST_LIMIT)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(json!({ "transactions": transactions })))
}

/// One of the caller's transactions.
///
/// # Errors
///
/// Returns 404 if the transaction doesn't exist or belongs to someone else.
pub async fn get_transaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let transaction: TransactionResponse = state
        .transactions
        .get_for_user(id, auth.user_id)
        .await?
        .ok_or(AppError::TransactionNotFound)?
        .into();

    Ok(Json(json!({ "transaction": transaction })))
}

fn request_host(headers: &HeaderMap) -> &str {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost")
}
