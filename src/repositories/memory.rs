//! In-process storage for tests.
//!
//! Enforces the same unique keys as the schema so conflict paths can be exercised.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    RepositoryError, RepositoryResult, TransactionRepository, UserRepository, hash_password,
};
use crate::models::transaction::{CallbackUpdate, NewTransaction, StatusChange, Transaction};
use crate::models::user::{APPROVED_STATUS, NewUser, User};

#[derive(Default)]
pub struct InMemoryTransactionRepository {
    rows: Mutex<Vec<Transaction>>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Transaction> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        Ok(self.rows.lock().unwrap().iter().find(|t| t.id == id).cloned())
    }

    async fn find_by_processor_id(
        &self,
        processor_transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.processor_transaction_id == processor_transaction_id)
            .cloned())
    }

    async fn insert(&self, new: NewTransaction) -> RepositoryResult<Transaction> {
        let mut rows = self.rows.lock().unwrap();
        if rows
            .iter()
            .any(|t| t.processor_transaction_id == new.processor_transaction_id)
        {
            return Err(RepositoryError::Conflict);
        }

        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            processor_transaction_id: new.processor_transaction_id,
            processor_account_id: new.processor_account_id,
            amount_cents: new.amount_cents,
            net_cents: new.net_cents,
            status: new.status,
            transaction_type: new.transaction_type,
            receipt_number: new.receipt_number,
            request_date: new.request_date,
            transaction_date: new.transaction_date,
            item_id: new.item_id,
            service_id: new.service_id,
            fields: new.fields,
            data: new.data,
            raw_payload: new.raw_payload,
            created_at: now,
            updated_at: now,
        };
        rows.push(transaction.clone());
        Ok(transaction)
    }

    async fn apply_callback(
        &self,
        processor_transaction_id: &str,
        update: &CallbackUpdate,
    ) -> RepositoryResult<Option<StatusChange>> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows
            .iter_mut()
            .find(|t| t.processor_transaction_id == processor_transaction_id)
        else {
            return Ok(None);
        };

        let previous = row.status;
        let previous_fields = row.fields.clone();
        row.apply_callback(update);

        Ok(Some(StatusChange {
            transaction: row.clone(),
            previous,
            previous_fields,
        }))
    }

    async fn link_user(&self, id: Uuid, user_id: Uuid) -> RepositoryResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|t| t.id == id) {
            Some(row) if row.user_id.is_none() => {
                row.user_id = Some(user_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let mut owned: Vec<Transaction> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.user_id == Some(user_id))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        owned.truncate(limit.max(0) as usize);
        Ok(owned)
    }

    async fn get_for_user(&self, id: Uuid, user_id: Uuid) -> RepositoryResult<Option<Transaction>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id && t.user_id == Some(user_id))
            .cloned())
    }
}

/// Stored user plus the columns `User` does not expose.
#[derive(Clone)]
pub struct StoredUser {
    pub user: User,
    pub password_hash: String,
    pub has_stats: bool,
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: Mutex<Vec<StoredUser>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing account.
    pub fn seed(&self, username: &str, email: &str, referral_code: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            status: APPROVED_STATUS.to_string(),
            referral_code: Some(referral_code.to_string()),
            coins: 0,
            referred_by: None,
            subscription_end_date: None,
            created_at: Utc::now(),
        };
        self.users.lock().unwrap().push(StoredUser {
            user: user.clone(),
            password_hash: String::new(),
            has_stats: true,
        });
        user
    }

    pub fn all(&self) -> Vec<StoredUser> {
        self.users.lock().unwrap().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<StoredUser> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.user.id == id)
            .cloned()
    }

    pub fn set_subscription(&self, id: Uuid, end: Option<DateTime<Utc>>) {
        if let Some(stored) = self.users.lock().unwrap().iter_mut().find(|u| u.user.id == id) {
            stored.user.subscription_end_date = end;
        }
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> RepositoryResult<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.user.email == email || u.user.username == username)
            .map(|u| u.user.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<User>> {
        Ok(self.get(id).map(|u| u.user))
    }

    async fn find_by_referral_code(&self, code: &str) -> RepositoryResult<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.user.referral_code.as_deref() == Some(code))
            .map(|u| u.user.clone()))
    }

    async fn referral_code_exists(&self, code: &str) -> RepositoryResult<bool> {
        Ok(self.find_by_referral_code(code).await?.is_some())
    }

    async fn create(&self, new: NewUser) -> RepositoryResult<User> {
        let password_hash = hash_password(new.password, 4).await?;

        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| {
            u.user.email == new.email
                || u.user.username == new.username
                || u.user.referral_code.as_deref() == Some(new.referral_code.as_str())
        }) {
            return Err(RepositoryError::Conflict);
        }

        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            status: APPROVED_STATUS.to_string(),
            referral_code: Some(new.referral_code),
            coins: 0,
            referred_by: new.referred_by,
            subscription_end_date: None,
            created_at: Utc::now(),
        };
        users.push(StoredUser {
            user: user.clone(),
            password_hash,
            has_stats: false,
        });
        Ok(user)
    }

    async fn create_stats_if_absent(&self, user_id: Uuid) -> RepositoryResult<()> {
        if let Some(stored) = self
            .users
            .lock()
            .unwrap()
            .iter_mut()
            .find(|u| u.user.id == user_id)
        {
            stored.has_stats = true;
        }
        Ok(())
    }

    async fn add_coins(&self, user_id: Uuid, amount: i32) -> RepositoryResult<i32> {
        let mut users = self.users.lock().unwrap();
        let stored = users
            .iter_mut()
            .find(|u| u.user.id == user_id)
            .ok_or(RepositoryError::Database(sqlx::Error::RowNotFound))?;
        stored.user.coins += amount;
        Ok(stored.user.coins)
    }

    async fn set_subscription_end(
        &self,
        user_id: Uuid,
        end: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        self.set_subscription(user_id, Some(end));
        Ok(())
    }
}
