//! Domain module
//!
//! Core domain types and business rules.

pub mod account;
pub mod amount;
pub mod context;
pub mod currency;
pub mod error;
pub mod user;

pub use account::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry, Transfer,
};
pub use amount::{Amount, AmountError};
pub use context::OperationContext;
pub use currency::Currency;
pub use error::DomainError;
pub use user::{
    check_password, hash_password, CreateUserParams, CreateVerifyEmailParams, PasswordError,
    UpdateUserParams, User, VerifyEmail,
};
