//! In-memory store
//!
//! Implements the store traits without a database, for tests and local
//! runs. Units of work buffer their writes and apply them on commit.
//! Balance updates take a per-account lock that is held until the unit of
//! work ends, mirroring PostgreSQL row locks: two units of work that lock
//! the same accounts in opposite orders will wait on each other forever.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::user::verify_email_expiry;
use crate::domain::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, CreateUserParams,
    CreateVerifyEmailParams, Entry, Transfer, UpdateUserParams, User, VerifyEmail,
};

use super::{Store, StoreError, UnitOfWork, UserStore};

#[derive(Debug, Default)]
struct State {
    accounts: BTreeMap<i64, Account>,
    transfers: BTreeMap<i64, Transfer>,
    entries: BTreeMap<i64, Entry>,
    users: HashMap<String, User>,
    hidden_users: HashSet<String>,
    verify_emails: BTreeMap<i64, VerifyEmail>,
    last_account_id: i64,
    last_transfer_id: i64,
    last_entry_id: i64,
    last_verify_email_id: i64,
}

/// Thread-safe in-memory store; clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    row_locks: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `get_user` report the user as missing until `reveal_user`.
    /// Simulates a creating transaction that has not committed yet.
    pub async fn hide_user(&self, username: &str) {
        self.state
            .lock()
            .await
            .hidden_users
            .insert(username.to_string());
    }

    pub async fn reveal_user(&self, username: &str) {
        self.state.lock().await.hidden_users.remove(username);
    }

    pub async fn transfer_count(&self) -> usize {
        self.state.lock().await.transfers.len()
    }

    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn verify_emails_for(&self, username: &str) -> Vec<VerifyEmail> {
        self.state
            .lock()
            .await
            .verify_emails
            .values()
            .filter(|v| v.username == username)
            .cloned()
            .collect()
    }

    async fn row_lock(&self, account_id: i64) -> Arc<Mutex<()>> {
        self.row_locks
            .lock()
            .await
            .entry(account_id)
            .or_default()
            .clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&params.owner) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "owner {} does not exist",
                params.owner
            )));
        }
        let duplicate = state
            .accounts
            .values()
            .any(|a| a.owner == params.owner && a.currency == params.currency);
        if duplicate {
            return Err(StoreError::UniqueViolation(format!(
                "owner {} already has a {} account",
                params.owner, params.currency
            )));
        }

        state.last_account_id += 1;
        let account = Account {
            id: state.last_account_id,
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: i64) -> Result<Account, StoreError> {
        self.state
            .lock()
            .await
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("account {}", id)))
    }

    async fn list_accounts(
        &self,
        owner: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .filter(|a| a.owner == owner)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer, StoreError> {
        self.state
            .lock()
            .await
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("transfer {}", id)))
    }

    async fn list_entries(&self, account_id: i64) -> Result<Vec<Entry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self.clone(),
            locks: HashMap::new(),
            balances: BTreeMap::new(),
            transfers: Vec::new(),
            entries: Vec::new(),
        }))
    }
}

struct MemoryUnitOfWork {
    store: MemoryStore,
    locks: HashMap<i64, OwnedMutexGuard<()>>,
    balances: BTreeMap<i64, i64>,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
}

impl MemoryUnitOfWork {
    async fn ensure_account(&self, account_id: i64) -> Result<(), StoreError> {
        if self.store.state.lock().await.accounts.contains_key(&account_id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKeyViolation(format!(
                "account {} does not exist",
                account_id
            )))
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn create_transfer(
        &mut self,
        params: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        self.ensure_account(params.from_account_id).await?;
        self.ensure_account(params.to_account_id).await?;

        let mut state = self.store.state.lock().await;
        state.last_transfer_id += 1;
        let transfer = Transfer {
            id: state.last_transfer_id,
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, StoreError> {
        self.ensure_account(params.account_id).await?;

        let mut state = self.store.state.lock().await;
        state.last_entry_id += 1;
        let entry = Entry {
            id: state.last_entry_id,
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn add_account_balance(
        &mut self,
        account_id: i64,
        delta: i64,
    ) -> Result<Account, StoreError> {
        if !self.locks.contains_key(&account_id) {
            let lock = self.store.row_lock(account_id).await;
            let guard = lock.lock_owned().await;
            self.locks.insert(account_id, guard);
        }

        let mut account = self.store.get_account(account_id).await?;
        let current = self
            .balances
            .get(&account_id)
            .copied()
            .unwrap_or(account.balance);
        let updated = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::InvalidData(format!("balance overflow on account {}", account_id)))?;

        self.balances.insert(account_id, updated);
        account.balance = updated;
        Ok(account)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryUnitOfWork {
            store,
            locks,
            balances,
            transfers,
            entries,
        } = *self;

        {
            let mut state = store.state.lock().await;
            for (account_id, balance) in balances {
                if let Some(account) = state.accounts.get_mut(&account_id) {
                    account.balance = balance;
                }
            }
            for transfer in transfers {
                state.transfers.insert(transfer.id, transfer);
            }
            for entry in entries {
                state.entries.insert(entry.id, entry);
            }
        }

        // Row locks are released only after the writes are visible.
        drop(locks);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, params: CreateUserParams) -> Result<User, StoreError> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(&params.username) {
            return Err(StoreError::UniqueViolation(format!(
                "username {} already exists",
                params.username
            )));
        }
        if state.users.values().any(|u| u.email == params.email) {
            return Err(StoreError::UniqueViolation(format!(
                "email {} already exists",
                params.email
            )));
        }

        let now = Utc::now();
        let user = User {
            username: params.username,
            hashed_password: params.hashed_password,
            full_name: params.full_name,
            email: params.email,
            is_email_verified: false,
            password_changed_at: now,
            created_at: now,
        };
        state.users.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        let state = self.state.lock().await;
        if state.hidden_users.contains(username) {
            return Err(StoreError::not_found(format!("user {}", username)));
        }
        state
            .users
            .get(username)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("user {}", username)))
    }

    async fn update_user(&self, params: UpdateUserParams) -> Result<User, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(email) = &params.email {
            let taken = state
                .users
                .values()
                .any(|u| &u.email == email && u.username != params.username);
            if taken {
                return Err(StoreError::UniqueViolation(format!(
                    "email {} already exists",
                    email
                )));
            }
        }

        let user = state
            .users
            .get_mut(&params.username)
            .ok_or_else(|| StoreError::not_found(format!("user {}", params.username)))?;
        if let Some(full_name) = params.full_name {
            user.full_name = full_name;
        }
        if let Some(email) = params.email {
            user.email = email;
        }
        if let Some(hashed_password) = params.hashed_password {
            user.hashed_password = hashed_password;
        }
        if let Some(changed_at) = params.password_changed_at {
            user.password_changed_at = changed_at;
        }
        Ok(user.clone())
    }

    async fn create_verify_email(
        &self,
        params: CreateVerifyEmailParams,
    ) -> Result<VerifyEmail, StoreError> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&params.username) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "user {} does not exist",
                params.username
            )));
        }

        state.last_verify_email_id += 1;
        let now = Utc::now();
        let record = VerifyEmail {
            id: state.last_verify_email_id,
            username: params.username,
            email: params.email,
            secret_code: params.secret_code,
            is_used: false,
            created_at: now,
            expired_at: verify_email_expiry(now),
        };
        state.verify_emails.insert(record.id, record.clone());
        Ok(record)
    }
}
