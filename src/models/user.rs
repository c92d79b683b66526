//! User account model, limited to the columns payment provisioning touches.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Moderation status of accounts created by a paid registration; no review step.
pub const APPROVED_STATUS: &str = "approved";

/// Represents a user record from the database.
///
/// The password hash is never selected into this struct.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub status: String,
    pub referral_code: Option<String>,
    pub coins: i32,
    pub referred_by: Option<Uuid>,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A user about to be created.
///
/// `password` is plaintext; the store hashes it. No `Debug` so it cannot end up in logs.
#[derive(Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub referral_code: String,
    pub referred_by: Option<Uuid>,
}
