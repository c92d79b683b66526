//! PostgreSQL implementations of the storage ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{RepositoryResult, TransactionRepository, UserRepository, hash_password};
use crate::db::DbPool;
use crate::models::transaction::{
    CallbackUpdate, NewTransaction, StatusChange, Transaction, TransactionRow,
};
use crate::models::user::{APPROVED_STATUS, NewUser, User};

const TRANSACTION_COLUMNS: &str = "id, user_id, processor_transaction_id, processor_account_id, \
     amount_cents, net_cents, status, transaction_type, receipt_number, request_date, \
     transaction_date, item_id, service_id, fields, data, raw_payload, created_at, updated_at";

const USER_COLUMNS: &str = "id, username, email, status, referral_code, coins, referred_by, \
     subscription_end_date, created_at";

pub struct PgTransactionRepository {
    pool: DbPool,
}

impl PgTransactionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Transaction::from))
    }

    async fn find_by_processor_id(
        &self,
        processor_transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE processor_transaction_id = $1",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(processor_transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Transaction::from))
    }

    async fn insert(&self, transaction: NewTransaction) -> RepositoryResult<Transaction> {
        // A duplicate processor id surfaces as RepositoryError::Conflict
        let sql = format!(
            r#"
            INSERT INTO transactions (
                user_id, processor_transaction_id, processor_account_id,
                amount_cents, net_cents, status, transaction_type, receipt_number,
                request_date, transaction_date, item_id, service_id,
                fields, data, raw_payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );

        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(transaction.user_id)
            .bind(&transaction.processor_transaction_id)
            .bind(&transaction.processor_account_id)
            .bind(transaction.amount_cents)
            .bind(transaction.net_cents)
            .bind(transaction.status.as_str())
            .bind(transaction.transaction_type.map(|t| t.as_str()))
            .bind(&transaction.receipt_number)
            .bind(transaction.request_date)
            .bind(transaction.transaction_date)
            .bind(&transaction.item_id)
            .bind(&transaction.service_id)
            .bind(&transaction.fields)
            .bind(&transaction.data)
            .bind(&transaction.raw_payload)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }

    /// Lock the row, apply the callback, and write it back in one transaction.
    ///
    /// Concurrent deliveries for the same payment serialize on the lock, so
    /// each sees the status left by the one before it.
    async fn apply_callback(
        &self,
        processor_transaction_id: &str,
        update: &CallbackUpdate,
    ) -> RepositoryResult<Option<StatusChange>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM transactions WHERE processor_transaction_id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        );
        let Some(row) = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(processor_transaction_id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut transaction = Transaction::from(row);
        let previous = transaction.status;
        let previous_fields = transaction.fields.clone();
        transaction.apply_callback(update);

        sqlx::query(
            r#"
            UPDATE transactions
            SET status = $1,
                amount_cents = $2,
                net_cents = $3,
                receipt_number = $4,
                transaction_date = $5,
                transaction_type = $6,
                fields = $7,
                data = $8,
                raw_payload = $9,
                updated_at = $10
            WHERE id = $11
            "#,
        )
        .bind(transaction.status.as_str())
        .bind(transaction.amount_cents)
        .bind(transaction.net_cents)
        .bind(&transaction.receipt_number)
        .bind(transaction.transaction_date)
        .bind(transaction.transaction_type.map(|t| t.as_str()))
        .bind(&transaction.fields)
        .bind(&transaction.data)
        .bind(&transaction.raw_payload)
        .bind(transaction.updated_at)
        .bind(transaction.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(StatusChange {
            transaction,
            previous,
            previous_fields,
        }))
    }

    async fn link_user(&self, id: Uuid, user_id: Uuid) -> RepositoryResult<bool> {
        let linked = sqlx::query(
            r#"
            UPDATE transactions
            SET user_id = $1,
                updated_at = NOW()
            WHERE id = $2 AND user_id IS NULL
            "#,
        )
        .bind(user_id)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(linked == 1)
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Transaction::from).collect())
    }

    async fn get_for_user(&self, id: Uuid, user_id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE id = $1 AND user_id = $2",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Transaction::from))
    }
}

pub struct PgUserRepository {
    pool: DbPool,
}

impl PgUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> RepositoryResult<Option<User>> {
        let sql = format!(
            "SELECT {} FROM users WHERE email = $1 OR username = $2 LIMIT 1",
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn find_by_referral_code(&self, code: &str) -> RepositoryResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE referral_code = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn referral_code_exists(&self, code: &str) -> RepositoryResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE referral_code = $1)")
                .bind(code)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn create(&self, user: NewUser) -> RepositoryResult<User> {
        let password_hash = hash_password(user.password, bcrypt::DEFAULT_COST).await?;

        let sql = format!(
            r#"
            INSERT INTO users (username, email, password_hash, status, referral_code, referred_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let created = sqlx::query_as::<_, User>(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&password_hash)
            .bind(APPROVED_STATUS)
            .bind(&user.referral_code)
            .bind(user.referred_by)
            .fetch_one(&self.pool)
            .await?;

        Ok(created)
    }

    async fn create_stats_if_absent(&self, user_id: Uuid) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO user_stats (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_coins(&self, user_id: Uuid, amount: i32) -> RepositoryResult<i32> {
        let balance: i32 = sqlx::query_scalar(
            r#"
            UPDATE users
            SET coins = coins + $1,
                updated_at = NOW()
            WHERE id = $2
            RETURNING coins
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn set_subscription_end(
        &self,
        user_id: Uuid,
        end: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET subscription_end_date = $1,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(end)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
