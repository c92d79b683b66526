//! Reconciliation of processor callbacks against the payment ledger.
//!
//! Callbacks may arrive before the local intent exists, more than once, or
//! concurrently. Correctness rests on the ledger alone:
//!
//! - the unique processor transaction id decides which first delivery inserts
//! - the row lock in `apply_callback` decides which delivery observes the
//!   transition into `SUCCEEDED`
//!
//! Only that delivery provisions. Replays update the row and stop there.

use serde_json::Value;

use crate::error::AppError;
use crate::models::registration::RegistrationData;
use crate::models::transaction::{NewTransaction, PaymentStatus, StatusChange, Transaction};
use crate::models::webhook::WebhookPayload;
use crate::repositories::{RepositoryError, TransactionRepository, UserRepository};
use crate::services::account_service::{self, ProvisioningOutcome};

/// Where a registration payload may be found, in priority order.
///
/// Sources see the `fields` stored before the callback was merged in, so a
/// callback can never mask the payload captured at payment creation.
type RegistrationSource = for<'a> fn(Option<&'a Value>, &'a Value) -> Option<&'a Value>;

const REGISTRATION_SOURCES: &[(&str, RegistrationSource)] = &[
    ("stored fields", stored_fields),
    ("callback fields", callback_fields),
    ("callback data", callback_data),
    ("callback root", callback_root),
];

fn stored_fields<'a>(stored: Option<&'a Value>, _: &'a Value) -> Option<&'a Value> {
    stored?.get("registrationData")
}

fn callback_fields<'a>(_: Option<&'a Value>, payload: &'a Value) -> Option<&'a Value> {
    payload.get("fields")?.get("registrationData")
}

fn callback_data<'a>(_: Option<&'a Value>, payload: &'a Value) -> Option<&'a Value> {
    payload.get("data")?.get("registrationData")
}

fn callback_root<'a>(_: Option<&'a Value>, payload: &'a Value) -> Option<&'a Value> {
    payload.get("registrationData")
}

/// Result of one callback.
#[derive(Debug)]
pub struct Reconciliation {
    /// Ledger row after the callback was applied.
    pub transaction: Transaction,
    /// Whether this delivery inserted the row.
    pub inserted: bool,
    /// Whether this delivery moved the payment into `SUCCEEDED`.
    pub became_succeeded: bool,
    /// What provisioning did, when it ran and did not fail.
    pub provisioning: Option<ProvisioningOutcome>,
}

/// Apply a verified callback to the ledger and run first-success side effects.
///
/// # Process
///
/// 1. Update the row for this payment under a lock
/// 2. If there is none, insert it from the callback
///    (losing an insert race falls back to step 1)
/// 3. If this delivery made the payment `SUCCEEDED`, provision the account
///    or extend the owner's subscription
///
/// # Errors
///
/// Only ledger failures are returned; the processor should retry them.
/// Provisioning failures are logged and swallowed.
pub async fn reconcile(
    transactions: &dyn TransactionRepository,
    users: &dyn UserRepository,
    payload: &WebhookPayload,
) -> Result<Reconciliation, AppError> {
    let update = payload.to_update();

    let (change, inserted) = match transactions
        .apply_callback(&payload.transaction_id, &update)
        .await?
    {
        Some(change) => (change, false),
        None => match transactions.insert(new_transaction(users, payload).await?).await {
            Ok(transaction) => {
                tracing::info!(
                    transaction_id = %transaction.id,
                    payment_id = %transaction.processor_transaction_id,
                    status = transaction.status.as_str(),
                    "Transaction recorded from webhook"
                );
                let change = StatusChange {
                    transaction,
                    previous: PaymentStatus::Pending,
                    previous_fields: None,
                };
                (change, true)
            }
            Err(RepositoryError::Conflict) => {
                tracing::info!(
                    payment_id = %payload.transaction_id,
                    "Concurrent first delivery, applying as update"
                );
                let change = transactions
                    .apply_callback(&payload.transaction_id, &update)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(format!(
                            "transaction {} conflicted on insert but cannot be found",
                            payload.transaction_id
                        ))
                    })?;
                (change, false)
            }
            Err(e) => return Err(e.into()),
        },
    };

    if !inserted {
        tracing::info!(
            transaction_id = %change.transaction.id,
            from = change.previous.as_str(),
            to = change.transaction.status.as_str(),
            "Transaction updated from webhook"
        );
    }

    let became_succeeded = change.became_succeeded();
    let provisioning = if became_succeeded {
        provision(
            transactions,
            users,
            &change.transaction,
            change.previous_fields.as_ref(),
            payload,
        )
        .await
    } else {
        None
    };

    let transaction = match transactions.find_by_id(change.transaction.id).await {
        Ok(Some(fresh)) => fresh,
        _ => change.transaction,
    };

    Ok(Reconciliation {
        transaction,
        inserted,
        became_succeeded,
        provisioning,
    })
}

/// Row for a callback that arrived before its payment intent.
///
/// The owner echoed in the callback metadata is kept only if that user exists;
/// an unknown id would otherwise fail the insert on every retry.
async fn new_transaction(
    users: &dyn UserRepository,
    payload: &WebhookPayload,
) -> Result<NewTransaction, AppError> {
    let mut new = payload.to_new_transaction();
    if let Some(user_id) = new.user_id {
        if users.find_by_id(user_id).await?.is_none() {
            tracing::warn!(
                payment_id = %payload.transaction_id,
                user_id = %user_id,
                "Callback names an unknown user, recording without owner"
            );
            new.user_id = None;
        }
    }
    Ok(new)
}

async fn provision(
    transactions: &dyn TransactionRepository,
    users: &dyn UserRepository,
    transaction: &Transaction,
    stored_fields: Option<&Value>,
    payload: &WebhookPayload,
) -> Option<ProvisioningOutcome> {
    let result = match find_registration(stored_fields, &payload.raw) {
        Some(registration) => {
            account_service::provision_registration(transactions, users, transaction, &registration)
                .await
        }
        None => account_service::renew_subscription(users, transaction, payload).await,
    };

    match result {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            tracing::error!(
                transaction_id = %transaction.id,
                "Provisioning failed for successful payment: {}",
                e
            );
            None
        }
    }
}

/// First usable registration payload among the known locations.
///
/// `stored_fields` is the ledger row's `fields` before this callback.
pub fn find_registration(stored_fields: Option<&Value>, payload: &Value) -> Option<RegistrationData> {
    REGISTRATION_SOURCES.iter().find_map(|(name, source)| {
        let registration = parse_registration(source(stored_fields, payload)?);
        if registration.is_some() {
            tracing::debug!(source = *name, "Registration payload found");
        }
        registration
    })
}

/// Accepts an object or a JSON string holding one. Empty or unparsable candidates yield `None`.
fn parse_registration(candidate: &Value) -> Option<RegistrationData> {
    let object = match candidate {
        Value::Object(map) => map.clone(),
        Value::String(s) if !s.trim().is_empty() => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => {
                tracing::warn!("Ignoring unparsable registration payload");
                return None;
            }
        },
        _ => return None,
    };

    if object.is_empty() {
        return None;
    }

    serde_json::from_value(Value::Object(object)).ok()
}
