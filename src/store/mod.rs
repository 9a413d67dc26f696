//! Store module
//!
//! Capability interfaces over persistent storage. The transaction engine
//! only talks to `Store` and `UnitOfWork`; the task pipeline only talks to
//! `UserStore`.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;

use crate::domain::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, CreateUserParams,
    CreateVerifyEmailParams, Entry, Transfer, UpdateUserParams, User, VerifyEmail,
};

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Account and ledger persistence
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError>;

    async fn get_account(&self, id: i64) -> Result<Account, StoreError>;

    async fn list_accounts(
        &self,
        owner: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, StoreError>;

    async fn get_transfer(&self, id: i64) -> Result<Transfer, StoreError>;

    async fn list_entries(&self, account_id: i64) -> Result<Vec<Entry>, StoreError>;

    /// Open an atomic unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

/// A group of writes that becomes visible all at once on `commit`.
///
/// Dropping a unit of work without committing rolls it back and releases
/// every row lock it holds.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn create_transfer(&mut self, params: CreateTransferParams)
        -> Result<Transfer, StoreError>;

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, StoreError>;

    /// Add `delta` to the stored balance and return the updated account.
    ///
    /// Locks the account row until the unit of work ends.
    async fn add_account_balance(
        &mut self,
        account_id: i64,
        delta: i64,
    ) -> Result<Account, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// User and email-verification persistence
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, params: CreateUserParams) -> Result<User, StoreError>;

    async fn get_user(&self, username: &str) -> Result<User, StoreError>;

    /// Apply the `Some` fields of `params`. `NotFound` if the user is missing.
    async fn update_user(&self, params: UpdateUserParams) -> Result<User, StoreError>;

    async fn create_verify_email(
        &self,
        params: CreateVerifyEmailParams,
    ) -> Result<VerifyEmail, StoreError>;
}
