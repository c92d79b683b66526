//! Account provisioning for successful payments.
//!
//! This service handles:
//! - Creating the account a registration payment paid for
//! - Linking a payment to an account that already exists
//! - Referral bonuses for the new user and the referrer
//! - Additive subscription extension
//!
//! Nothing here is called more than once per payment: the reconciler only
//! invokes it for the delivery that moved the ledger row into `SUCCEEDED`.

use chrono::{DateTime, Months, Utc};
use uuid::Uuid;

use crate::models::registration::{RegistrationData, parse_months};
use crate::models::transaction::Transaction;
use crate::models::user::{NewUser, User};
use crate::models::webhook::WebhookPayload;
use crate::repositories::{RepositoryError, TransactionRepository, UserRepository};

/// Coins credited to both sides of a successful referral.
pub const REFERRAL_BONUS_COINS: i32 = 50;

/// Random referral codes tried before falling back to a timestamp code.
pub const REFERRAL_CODE_ATTEMPTS: usize = 10;

/// User inserts tried when the generated referral code collides at insert time.
const USER_CREATE_ATTEMPTS: u32 = 3;

/// Failures while provisioning. Logged by the caller, never returned to the processor.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("registration payload lacks username, email, or password")]
    IncompleteRegistration,

    #[error("user {0} does not exist")]
    UnknownUser(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What provisioning did for a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    /// A new account was created and linked.
    Created {
        user_id: Uuid,
        referrer_id: Option<Uuid>,
    },
    /// The payment was linked to an account with the same email or username.
    LinkedExisting { user_id: Uuid },
    /// The payment already had an owner.
    AlreadyLinked,
    SubscriptionExtended {
        user_id: Uuid,
        ends_at: DateTime<Utc>,
    },
    /// The payment is not for a subscription.
    NotASubscription,
}

/// Provision the account a registration payment paid for.
///
/// # Process
///
/// 1. Skip if the payment already has an owner
/// 2. Link to an existing user with the same email or username
/// 3. Otherwise resolve the referral code and create the user
/// 4. Create the stats row and link the payment
/// 5. Credit referral bonuses
/// 6. Set the subscription end date
///
/// Steps 4-6 are attempted independently: a failure is logged and the
/// remaining steps still run.
///
/// # Errors
///
/// - `IncompleteRegistration` if no existing user matches and credentials are missing
/// - `Repository` if the user lookup or creation fails
pub async fn provision_registration(
    transactions: &dyn TransactionRepository,
    users: &dyn UserRepository,
    transaction: &Transaction,
    registration: &RegistrationData,
) -> Result<ProvisioningOutcome, ProvisioningError> {
    if transaction.user_id.is_some() {
        tracing::info!(
            transaction_id = %transaction.id,
            "Registration payload present but payment already has an owner"
        );
        return Ok(ProvisioningOutcome::AlreadyLinked);
    }

    let months = registration.subscription_months();

    if let Some(existing) = find_existing(users, registration).await? {
        return link_existing(transactions, users, transaction, existing, months).await;
    }

    let (username, email, password) = registration.credentials().ok_or_else(|| {
        tracing::error!(
            transaction_id = %transaction.id,
            has_username = registration.username.is_some(),
            has_email = registration.email.is_some(),
            has_password = registration.password.is_some(),
            "Missing required registration data"
        );
        ProvisioningError::IncompleteRegistration
    })?;

    let referrer = resolve_referrer(users, registration.normalized_referral_code()).await?;

    let mut attempt = 1;
    let user = loop {
        let new_user = NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            referral_code: generate_referral_code(users).await?,
            referred_by: referrer.as_ref().map(|r| r.id),
        };

        match users.create(new_user).await {
            Ok(user) => break user,
            Err(RepositoryError::Conflict) => {
                // Same identity registered concurrently: link to it
                if let Some(existing) = users.find_by_email_or_username(email, username).await? {
                    tracing::warn!(email = %email, "User created concurrently, linking instead");
                    return link_existing(transactions, users, transaction, existing, months).await;
                }
                // Otherwise the referral code was taken between check and insert
                if attempt >= USER_CREATE_ATTEMPTS {
                    return Err(RepositoryError::Conflict.into());
                }
                tracing::warn!(attempt, "Referral code taken at insert, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    };

    tracing::info!(user_id = %user.id, email = %user.email, "User account created");

    if let Err(e) = users.create_stats_if_absent(user.id).await {
        tracing::error!(user_id = %user.id, "Failed to create user stats: {}", e);
    }

    match transactions.link_user(transaction.id, user.id).await {
        Ok(true) => {
            tracing::info!(transaction_id = %transaction.id, user_id = %user.id, "Payment linked to new user")
        }
        Ok(false) => {
            tracing::warn!(transaction_id = %transaction.id, "Payment was linked by another request")
        }
        Err(e) => {
            tracing::error!(transaction_id = %transaction.id, "Failed to link payment: {}", e)
        }
    }

    if let Some(referrer) = &referrer {
        credit_referral_bonus(users, user.id, referrer.id).await;
    }

    let ends_at = extended_subscription_end(None, months, Utc::now());
    if let Err(e) = users.set_subscription_end(user.id, ends_at).await {
        tracing::error!(user_id = %user.id, "Failed to set subscription end date: {}", e);
    } else {
        tracing::info!(user_id = %user.id, %ends_at, months, "Subscription started");
    }

    Ok(ProvisioningOutcome::Created {
        user_id: user.id,
        referrer_id: referrer.map(|r| r.id),
    })
}

/// Extend the subscription of a payment's owner.
///
/// Runs for successful payments without a registration payload. The payment
/// type and month count come from the stored metadata first, then the callback.
pub async fn renew_subscription(
    users: &dyn UserRepository,
    transaction: &Transaction,
    payload: &WebhookPayload,
) -> Result<ProvisioningOutcome, ProvisioningError> {
    let Some(user_id) = transaction.user_id else {
        tracing::info!(
            transaction_id = %transaction.id,
            "No registration payload and no owner; nothing to provision"
        );
        return Ok(ProvisioningOutcome::NotASubscription);
    };

    let payment_type = transaction
        .field("paymentType")
        .and_then(|v| v.as_str())
        .or_else(|| payload.field("paymentType").and_then(|v| v.as_str()))
        .unwrap_or("subscription");

    if payment_type != "subscription" && payment_type != "registration" {
        tracing::info!(
            transaction_id = %transaction.id,
            payment_type,
            "Payment is not a subscription purchase"
        );
        return Ok(ProvisioningOutcome::NotASubscription);
    }

    let months = parse_months(
        transaction
            .field("subscriptionType")
            .or_else(|| payload.field("subscriptionType")),
    );

    let ends_at = extend_subscription(users, user_id, months).await?;

    Ok(ProvisioningOutcome::SubscriptionExtended { user_id, ends_at })
}

async fn find_existing(
    users: &dyn UserRepository,
    registration: &RegistrationData,
) -> Result<Option<User>, RepositoryError> {
    let email = registration.email.as_deref().map(str::trim).unwrap_or("");
    let username = registration.username.as_deref().map(str::trim).unwrap_or("");
    if email.is_empty() && username.is_empty() {
        return Ok(None);
    }

    users.find_by_email_or_username(email, username).await
}

async fn link_existing(
    transactions: &dyn TransactionRepository,
    users: &dyn UserRepository,
    transaction: &Transaction,
    existing: User,
    months: u32,
) -> Result<ProvisioningOutcome, ProvisioningError> {
    tracing::info!(
        user_id = %existing.id,
        transaction_id = %transaction.id,
        "User already exists, linking payment"
    );

    if !transactions.link_user(transaction.id, existing.id).await? {
        return Ok(ProvisioningOutcome::AlreadyLinked);
    }

    if let Err(e) = extend_subscription(users, existing.id, months).await {
        tracing::error!(user_id = %existing.id, "Failed to extend subscription: {}", e);
    }

    Ok(ProvisioningOutcome::LinkedExisting {
        user_id: existing.id,
    })
}

/// Unknown codes are logged and ignored; registration goes on without a referrer.
async fn resolve_referrer(
    users: &dyn UserRepository,
    code: Option<String>,
) -> Result<Option<User>, RepositoryError> {
    let Some(code) = code else {
        return Ok(None);
    };

    let referrer = users.find_by_referral_code(&code).await?;
    match &referrer {
        Some(r) => tracing::info!(referral_code = %code, referrer_id = %r.id, "Referral code found"),
        None => tracing::warn!(referral_code = %code, "Invalid referral code"),
    }
    Ok(referrer)
}

async fn credit_referral_bonus(users: &dyn UserRepository, user_id: Uuid, referrer_id: Uuid) {
    for (recipient, role) in [(user_id, "new user"), (referrer_id, "referrer")] {
        match users.add_coins(recipient, REFERRAL_BONUS_COINS).await {
            Ok(balance) => tracing::info!(
                user_id = %recipient,
                balance,
                "Credited {} coins to {}",
                REFERRAL_BONUS_COINS,
                role
            ),
            Err(e) => tracing::error!(user_id = %recipient, "Failed to credit {}: {}", role, e),
        }
    }
}

async fn extend_subscription(
    users: &dyn UserRepository,
    user_id: Uuid,
    months: u32,
) -> Result<DateTime<Utc>, ProvisioningError> {
    let user = users
        .find_by_id(user_id)
        .await?
        .ok_or(ProvisioningError::UnknownUser(user_id))?;

    let ends_at = extended_subscription_end(user.subscription_end_date, months, Utc::now());
    users.set_subscription_end(user_id, ends_at).await?;

    tracing::info!(user_id = %user_id, %ends_at, months, "Subscription extended");
    Ok(ends_at)
}

/// New subscription end: months are appended to a still-running subscription,
/// otherwise counted from `now`.
///
/// Month arithmetic clamps to the last day of the target month (Jan 31 + 1 month = Feb 28/29).
pub fn extended_subscription_end(
    current: Option<DateTime<Utc>>,
    months: u32,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let base = current.filter(|end| *end > now).unwrap_or(now);
    base.checked_add_months(Months::new(months)).unwrap_or(base)
}

/// Generate a referral code not yet taken.
///
/// Tries random 8-character hex codes, then falls back to `REF` plus the tail
/// of the base-36 millisecond timestamp.
pub async fn generate_referral_code(users: &dyn UserRepository) -> Result<String, RepositoryError> {
    for _ in 0..REFERRAL_CODE_ATTEMPTS {
        let candidate = hex::encode_upper(rand::random::<[u8; 4]>());
        if !users.referral_code_exists(&candidate).await? {
            return Ok(candidate);
        }
    }

    let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    Ok(fallback_referral_code(millis))
}

fn fallback_referral_code(millis: u64) -> String {
    let encoded = to_base36(millis);
    let tail = &encoded[encoded.len().saturating_sub(6)..];
    format!("REF{}", tail)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
