//! Storage ports for the ledger and user store.
//!
//! Services depend on these traits; `postgres` holds the production
//! implementations and `memory` the in-process ones used by tests.
//!
//! Uniqueness is the storage layer's job: implementations must report a
//! duplicate key as `RepositoryError::Conflict` so callers can fall back to
//! the row that won the race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::transaction::{CallbackUpdate, NewTransaction, StatusChange, Transaction};
use crate::models::user::{NewUser, User};

#[cfg(test)]
pub mod memory;
pub mod postgres;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// A unique constraint rejected the write.
    #[error("record already exists")]
    Conflict,

    #[error(transparent)]
    Database(sqlx::Error),

    #[error("password hashing failed: {0}")]
    Hashing(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                RepositoryError::Conflict
            }
            other => RepositoryError::Database(other),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// bcrypt the password off the async executor.
pub(crate) async fn hash_password(password: String, cost: u32) -> RepositoryResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| RepositoryError::Hashing(e.to_string()))?
        .map_err(|e| RepositoryError::Hashing(e.to_string()))
}

/// Repository port for the payment ledger.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Check that the store is reachable.
    async fn ping(&self) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Transaction>>;

    async fn find_by_processor_id(
        &self,
        processor_transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>>;

    /// Insert a new row.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the processor transaction id is already recorded
    async fn insert(&self, transaction: NewTransaction) -> RepositoryResult<Transaction>;

    /// Apply a callback to an existing row under a row lock.
    ///
    /// Returns the updated row together with the status it had before, so
    /// exactly one caller observes a given transition. `None` if no row matches.
    async fn apply_callback(
        &self,
        processor_transaction_id: &str,
        update: &CallbackUpdate,
    ) -> RepositoryResult<Option<StatusChange>>;

    /// Attach an owner to an unowned row.
    ///
    /// Returns `false` when the row already had an owner; the existing owner is kept.
    async fn link_user(&self, id: Uuid, user_id: Uuid) -> RepositoryResult<bool>;

    /// The user's rows, newest first.
    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> RepositoryResult<Vec<Transaction>>;

    async fn get_for_user(&self, id: Uuid, user_id: Uuid) -> RepositoryResult<Option<Transaction>>;
}

/// Repository port for the user store.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> RepositoryResult<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<User>>;

    async fn find_by_referral_code(&self, code: &str) -> RepositoryResult<Option<User>>;

    async fn referral_code_exists(&self, code: &str) -> RepositoryResult<bool>;

    /// Create a user, hashing the plaintext password.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the email, username, or referral code is taken
    async fn create(&self, user: NewUser) -> RepositoryResult<User>;

    /// Create the statistics row unless one exists.
    async fn create_stats_if_absent(&self, user_id: Uuid) -> RepositoryResult<()>;

    /// Returns the new balance.
    async fn add_coins(&self, user_id: Uuid, amount: i32) -> RepositoryResult<i32>;

    async fn set_subscription_end(
        &self,
        user_id: Uuid,
        end: DateTime<Utc>,
    ) -> RepositoryResult<()>;
}
