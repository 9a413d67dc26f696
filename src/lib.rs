//! Simple Bank Library
//!
//! Atomic money transfers between accounts and asynchronous delivery of
//! verification emails. Used by the `simple_bank` server, the `worker`
//! binary and the integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
mod error;
pub mod handlers;
pub mod mail;
pub mod runtime;
pub mod store;
pub mod worker;

pub use config::Config;
pub use domain::{Amount, AmountError, Currency, DomainError, OperationContext};
pub use error::{AppError, AppResult, ErrorResponse};
