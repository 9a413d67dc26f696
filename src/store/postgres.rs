//! PostgreSQL store
//!
//! `Store`, `UnitOfWork` and `UserStore` over a sqlx connection pool.
//! A unit of work is a database transaction; balance updates use
//! `balance = balance + $delta`, which takes the row lock until commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, CreateUserParams,
    CreateVerifyEmailParams, Entry, Transfer, UpdateUserParams, User, VerifyEmail,
};

use super::{Store, StoreError, UnitOfWork, UserStore};

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: i64,
    owner: String,
    balance: i64,
    currency: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let currency = row
            .currency
            .parse()
            .map_err(|e| StoreError::InvalidData(format!("account {}: {}", row.id, e)))?;
        Ok(Account {
            id: row.id,
            owner: row.owner,
            balance: row.balance,
            currency,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransferRow {
    id: i64,
    from_account_id: i64,
    to_account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Transfer {
            id: row.id,
            from_account_id: row.from_account_id,
            to_account_id: row.to_account_id,
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    id: i64,
    account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Entry {
            id: row.id,
            account_id: row.account_id,
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    username: String,
    hashed_password: String,
    full_name: String,
    email: String,
    is_email_verified: bool,
    password_changed_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            username: row.username,
            hashed_password: row.hashed_password,
            full_name: row.full_name,
            email: row.email,
            is_email_verified: row.is_email_verified,
            password_changed_at: row.password_changed_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VerifyEmailRow {
    id: i64,
    username: String,
    email: String,
    secret_code: String,
    is_used: bool,
    created_at: DateTime<Utc>,
    expired_at: DateTime<Utc>,
}

impl From<VerifyEmailRow> for VerifyEmail {
    fn from(row: VerifyEmailRow) -> Self {
        VerifyEmail {
            id: row.id,
            username: row.username,
            email: row.email,
            secret_code: row.secret_code,
            is_used: row.is_used,
            created_at: row.created_at,
            expired_at: row.expired_at,
        }
    }
}

/// PostgreSQL-backed store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn not_found(what: String) -> impl FnOnce(StoreError) -> StoreError {
    move |err| match err {
        StoreError::NotFound(_) => StoreError::NotFound(what),
        other => other,
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError> {
        let row: AccountRow = sqlx::query_as(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, $2, $3)
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(&params.owner)
        .bind(params.balance)
        .bind(params.currency.code())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_account(&self, id: i64) -> Result<Account, StoreError> {
        let row: AccountRow = sqlx::query_as(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)
        .map_err(not_found(format!("account {}", id)))?;

        row.try_into()
    }

    async fn list_accounts(
        &self,
        owner: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, StoreError> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE owner = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Account::try_from).collect()
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer, StoreError> {
        let row: TransferRow = sqlx::query_as(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)
        .map_err(not_found(format!("transfer {}", id)))?;

        Ok(row.into())
    }

    async fn list_entries(&self, account_id: i64) -> Result<Vec<Entry>, StoreError> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE account_id = $1
            ORDER BY id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Entry::from).collect())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// Unit of work backed by a database transaction.
/// sqlx rolls the transaction back when it is dropped uncommitted.
struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn create_transfer(
        &mut self,
        params: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        let row: TransferRow = sqlx::query_as(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.into())
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, StoreError> {
        let row: EntryRow = sqlx::query_as(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(params.account_id)
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.into())
    }

    async fn add_account_balance(
        &mut self,
        account_id: i64,
        delta: i64,
    ) -> Result<Account, StoreError> {
        let row: AccountRow = sqlx::query_as(
            r#"
            UPDATE accounts
            SET balance = balance + $2
            WHERE id = $1
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(account_id)
        .bind(delta)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::from)
        .map_err(not_found(format!("account {}", account_id)))?;

        row.try_into()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, params: CreateUserParams) -> Result<User, StoreError> {
        let row: UserRow = sqlx::query_as(
            r#"
            INSERT INTO users (username, hashed_password, full_name, email)
            VALUES ($1, $2, $3, $4)
            RETURNING username, hashed_password, full_name, email,
                      is_email_verified, password_changed_at, created_at
            "#,
        )
        .bind(&params.username)
        .bind(&params.hashed_password)
        .bind(&params.full_name)
        .bind(&params.email)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        let row: UserRow = sqlx::query_as(
            r#"
            SELECT username, hashed_password, full_name, email,
                   is_email_verified, password_changed_at, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)
        .map_err(not_found(format!("user {}", username)))?;

        Ok(row.into())
    }

    async fn update_user(&self, params: UpdateUserParams) -> Result<User, StoreError> {
        let row: UserRow = sqlx::query_as(
            r#"
            UPDATE users
            SET full_name = COALESCE($2, full_name),
                email = COALESCE($3, email),
                hashed_password = COALESCE($4, hashed_password),
                password_changed_at = COALESCE($5, password_changed_at)
            WHERE username = $1
            RETURNING username, hashed_password, full_name, email,
                      is_email_verified, password_changed_at, created_at
            "#,
        )
        .bind(&params.username)
        .bind(&params.full_name)
        .bind(&params.email)
        .bind(&params.hashed_password)
        .bind(params.password_changed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)
        .map_err(not_found(format!("user {}", params.username)))?;

        Ok(row.into())
    }

    async fn create_verify_email(
        &self,
        params: CreateVerifyEmailParams,
    ) -> Result<VerifyEmail, StoreError> {
        let row: VerifyEmailRow = sqlx::query_as(
            r#"
            INSERT INTO verify_emails (username, email, secret_code)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, secret_code, is_used, created_at, expired_at
            "#,
        )
        .bind(&params.username)
        .bind(&params.email)
        .bind(&params.secret_code)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }
}
