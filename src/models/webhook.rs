//! Processor callback payload.
//!
//! The body is kept as a `serde_json::Value` so the exact document can be
//! stored for audit; this module reads the typed view the reconciler needs.

use serde_json::{Map, Value};
use uuid::Uuid;

use super::transaction::{
    CallbackUpdate, NewTransaction, PaymentStatus, TransactionType, amount_to_cents,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Webhook body is not a JSON object")]
    NotAnObject,

    #[error("Webhook body carries no transaction id")]
    MissingTransactionId,
}

/// Typed view of a processor callback.
#[derive(Debug, Clone)]
pub struct WebhookPayload {
    /// `transactionId`, else `id`; the reconciliation key.
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub amount_cents: Option<i64>,
    pub net_cents: Option<i64>,
    pub receipt_number: Option<String>,
    pub request_date: Option<i64>,
    pub transaction_date: Option<i64>,
    pub transaction_type: Option<TransactionType>,
    pub account_id: Option<String>,
    pub item_id: Option<String>,
    pub service_id: Option<String>,
    pub fields: Option<Map<String, Value>>,
    pub data: Option<Map<String, Value>>,

    /// The full body as received.
    pub raw: Value,
}

impl WebhookPayload {
    pub fn from_value(raw: Value) -> Result<Self, PayloadError> {
        let body = raw.as_object().ok_or(PayloadError::NotAnObject)?;

        let transaction_id = ["transactionId", "id"]
            .iter()
            .find_map(|key| body.get(*key).and_then(scalar_string))
            .ok_or(PayloadError::MissingTransactionId)?;

        let status = body
            .get("status")
            .and_then(Value::as_str)
            .map(PaymentStatus::from_processor)
            .unwrap_or(PaymentStatus::Pending);

        Ok(Self {
            transaction_id,
            status,
            amount_cents: body.get("amount").and_then(number).map(amount_to_cents),
            net_cents: body.get("net").and_then(number).map(amount_to_cents),
            receipt_number: body.get("receiptNumber").and_then(scalar_string),
            request_date: body.get("requestDate").and_then(integer),
            transaction_date: body.get("transactionDate").and_then(integer),
            transaction_type: body
                .get("transactionType")
                .and_then(Value::as_str)
                .and_then(TransactionType::parse),
            account_id: body.get("accountId").and_then(scalar_string),
            item_id: nested_id(body, "item"),
            service_id: nested_id(body, "service"),
            fields: body.get("fields").and_then(Value::as_object).cloned(),
            data: body.get("data").and_then(Value::as_object).cloned(),
            raw,
        })
    }

    /// Owner named by the callback metadata: `fields.userId`, then `data.userId`.
    pub fn user_id(&self) -> Option<Uuid> {
        [self.fields.as_ref(), self.data.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|m| m.get("userId").and_then(scalar_string))
            .and_then(|id| Uuid::parse_str(&id).ok())
    }

    /// A callback-level entry of `fields`.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.as_ref().and_then(|f| f.get(key))
    }

    /// Row for a callback that arrived before (or without) a locally created intent.
    pub fn to_new_transaction(&self) -> NewTransaction {
        NewTransaction {
            user_id: self.user_id(),
            processor_transaction_id: self.transaction_id.clone(),
            processor_account_id: self.account_id.clone(),
            amount_cents: self.amount_cents.unwrap_or(0),
            net_cents: self.net_cents,
            status: self.status,
            transaction_type: self.transaction_type,
            receipt_number: self.receipt_number.clone(),
            request_date: self.request_date,
            transaction_date: self.transaction_date,
            item_id: self.item_id.clone(),
            service_id: self.service_id.clone(),
            fields: self.fields.clone().map(Value::Object),
            data: self.data.clone().map(Value::Object),
            raw_payload: Some(self.raw.clone()),
        }
    }

    pub fn to_update(&self) -> CallbackUpdate {
        CallbackUpdate {
            status: self.status,
            amount_cents: self.amount_cents,
            net_cents: self.net_cents,
            receipt_number: self.receipt_number.clone(),
            transaction_date: self.transaction_date,
            transaction_type: self.transaction_type,
            fields: self.fields.clone(),
            data: self.data.clone(),
            raw_payload: self.raw.clone(),
        }
    }
}

/// Strings as-is, numbers rendered; anything else (including `""`) is absent.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn nested_id(body: &Map<String, Value>, key: &str) -> Option<String> {
    body.get(key)
        .and_then(|v| v.get("id"))
        .and_then(scalar_string)
}
