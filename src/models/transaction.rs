//! Payment ledger models.
//!
//! This module defines:
//! - `PaymentStatus` and `TransactionType`: processor vocabularies, normalized once
//! - `Transaction`: a ledger row, with `TransactionRow` as its database mapping
//! - `NewTransaction` / `CallbackUpdate`: the two ways a row is written
//! - `TransactionResponse`: what clients see

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Lifecycle status of a payment.
///
/// `Pending` moves one way to `Succeeded` or `Failed`; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    /// Map a processor status string. Unknown or missing values are `Pending`.
    pub fn from_processor(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "SUCCEEDED" => PaymentStatus::Succeeded,
            "FAILED" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Succeeded => "SUCCEEDED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// Direction of the money movement as reported by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Debit,
    Credit,
}

impl TransactionType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBIT" => Some(TransactionType::Debit),
            "CREDIT" => Some(TransactionType::Credit),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Debit => "DEBIT",
            TransactionType::Credit => "CREDIT",
        }
    }
}

/// A payment intent and its lifecycle.
///
/// # Invariants
///
/// - `processor_transaction_id` is unique across the ledger
/// - `user_id`, once set, is never cleared or reassigned
/// - `status` never leaves a terminal value
/// - Amounts are in minor units (tyiyn)
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub processor_transaction_id: String,
    pub processor_account_id: Option<String>,
    pub amount_cents: i64,
    pub net_cents: Option<i64>,
    pub status: PaymentStatus,
    pub transaction_type: Option<TransactionType>,
    pub receipt_number: Option<String>,
    pub request_date: Option<i64>,
    pub transaction_date: Option<i64>,
    pub item_id: Option<String>,
    pub service_id: Option<String>,

    /// Metadata captured at creation time (payment type, registration payload).
    pub fields: Option<Value>,
    pub data: Option<Value>,

    /// Last callback body received for this payment.
    pub raw_payload: Option<Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// A top-level entry of the stored `fields` object.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.as_ref().and_then(|f| f.get(key))
    }

    /// Apply a processor callback in place.
    ///
    /// A terminal status is kept. Values the callback leaves out keep their
    /// stored value, and metadata objects are merged key by key.
    pub fn apply_callback(&mut self, update: &CallbackUpdate) {
        if !self.status.is_terminal() {
            self.status = update.status;
        }
        if let Some(amount) = update.amount_cents {
            self.amount_cents = amount;
        }
        if update.net_cents.is_some() {
            self.net_cents = update.net_cents;
        }
        if update.receipt_number.is_some() {
            self.receipt_number = update.receipt_number.clone();
        }
        if update.transaction_date.is_some() {
            self.transaction_date = update.transaction_date;
        }
        if update.transaction_type.is_some() {
            self.transaction_type = update.transaction_type;
        }
        if let Some(fields) = &update.fields {
            self.fields = Some(merge_objects(self.fields.as_ref(), fields));
        }
        if let Some(data) = &update.data {
            self.data = Some(merge_objects(self.data.as_ref(), data));
        }
        self.raw_payload = Some(update.raw_payload.clone());
        self.updated_at = Utc::now();
    }
}

/// Database mapping of the `transactions` table.
#[derive(Debug, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub processor_transaction_id: String,
    pub processor_account_id: Option<String>,
    pub amount_cents: i64,
    pub net_cents: Option<i64>,
    pub status: String,
    pub transaction_type: Option<String>,
    pub receipt_number: Option<String>,
    pub request_date: Option<i64>,
    pub transaction_date: Option<i64>,
    pub item_id: Option<String>,
    pub service_id: Option<String>,
    pub fields: Option<Value>,
    pub data: Option<Value>,
    pub raw_payload: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TransactionRow> for Transaction {
    fn from(row: TransactionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            processor_transaction_id: row.processor_transaction_id,
            processor_account_id: row.processor_account_id,
            amount_cents: row.amount_cents,
            net_cents: row.net_cents,
            status: PaymentStatus::from_processor(&row.status),
            transaction_type: row.transaction_type.as_deref().and_then(TransactionType::parse),
            receipt_number: row.receipt_number,
            request_date: row.request_date,
            transaction_date: row.transaction_date,
            item_id: row.item_id,
            service_id: row.service_id,
            fields: row.fields,
            data: row.data,
            raw_payload: row.raw_payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// A ledger row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: Option<Uuid>,
    pub processor_transaction_id: String,
    pub processor_account_id: Option<String>,
    pub amount_cents: i64,
    pub net_cents: Option<i64>,
    pub status: PaymentStatus,
    pub transaction_type: Option<TransactionType>,
    pub receipt_number: Option<String>,
    pub request_date: Option<i64>,
    pub transaction_date: Option<i64>,
    pub item_id: Option<String>,
    pub service_id: Option<String>,
    pub fields: Option<Value>,
    pub data: Option<Value>,
    pub raw_payload: Option<Value>,
}

impl NewTransaction {
    /// A pending row created alongside a payment intent.
    pub fn pending(
        processor_transaction_id: String,
        user_id: Option<Uuid>,
        amount_cents: i64,
        fields: Value,
    ) -> Self {
        Self {
            user_id,
            processor_transaction_id,
            processor_account_id: None,
            amount_cents,
            net_cents: None,
            status: PaymentStatus::Pending,
            transaction_type: None,
            receipt_number: None,
            request_date: None,
            transaction_date: None,
            item_id: None,
            service_id: None,
            fields: Some(fields),
            data: None,
            raw_payload: None,
        }
    }
}

/// Values a processor callback writes onto an existing row.
#[derive(Debug, Clone)]
pub struct CallbackUpdate {
    pub status: PaymentStatus,
    pub amount_cents: Option<i64>,
    pub net_cents: Option<i64>,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<i64>,
    pub transaction_type: Option<TransactionType>,
    pub fields: Option<Map<String, Value>>,
    pub data: Option<Map<String, Value>>,
    pub raw_payload: Value,
}

/// Result of applying a callback under the row lock.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub transaction: Transaction,
    pub previous: PaymentStatus,
    /// `fields` as stored before this callback was merged in.
    pub previous_fields: Option<Value>,
}

impl StatusChange {
    /// True only for the single delivery that moved the row into `Succeeded`.
    pub fn became_succeeded(&self) -> bool {
        self.previous != PaymentStatus::Succeeded
            && self.transaction.status == PaymentStatus::Succeeded
    }
}

/// Merge `incoming` over a stored JSON object; incoming keys win, except that
/// `null` or `""` never replaces a stored value.
pub fn merge_objects(stored: Option<&Value>, incoming: &Map<String, Value>) -> Value {
    let mut merged = match stored {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    for (key, value) in incoming {
        let blank = value.is_null() || value.as_str() == Some("");
        if blank && merged.contains_key(key) {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    Value::Object(merged)
}

/// Major units (som) to minor units (tyiyn).
pub fn amount_to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Minor units back to a JSON amount: an integer when whole, else a decimal.
pub fn cents_to_amount(cents: i64) -> Value {
    if cents % 100 == 0 {
        json!(cents / 100)
    } else {
        json!(cents as f64 / 100.0)
    }
}

/// Ledger row as returned to clients.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "770e8400-e29b-41d4-a716-446655440002",
///   "paymentId": "5b0e3c1e-7f51-4c8e-9d43-0b9d1b7a2f10",
///   "amount": 500,
///   "net": null,
///   "status": "SUCCEEDED",
///   "transactionType": "DEBIT",
///   "receiptNumber": "R-1001",
///   "userId": "550e8400-e29b-41d4-a716-446655440000",
///   "createdAt": "2025-12-21T16:00:00Z",
///   "updatedAt": "2025-12-21T16:01:00Z"
/// }
/// ```
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub id: Uuid,
    pub payment_id: String,
    pub amount: Value,
    pub net: Option<Value>,
    pub status: PaymentStatus,
    pub transaction_type: Option<TransactionType>,
    pub receipt_number: Option<String>,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata and raw payloads stay internal.
impl From<Transaction> for TransactionResponse {
    fn from(transaction: Transaction) -> Self {
        Self {
            id: transaction.id,
            payment_id: transaction.processor_transaction_id,
            amount: cents_to_amount(transaction.amount_cents),
            net: transaction.net_cents.map(cents_to_amount),
            status: transaction.status,
            transaction_type: transaction.transaction_type,
            receipt_number: transaction.receipt_number,
            user_id: transaction.user_id,
            created_at: transaction.created_at,
            updated_at: transaction.updated_at,
        }
    }
}
