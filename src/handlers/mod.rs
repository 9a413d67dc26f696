//! Command Handlers module
//!
//! Handlers validate a command, run it against the stores and log the
//! outcome. Transport concerns stay in `api`.

mod account_handler;
mod commands;
mod transfer_handler;
mod user_handler;

#[cfg(test)]
mod tests;

pub use account_handler::CreateAccountHandler;
pub use commands::*;
pub use transfer_handler::{TransferHandler, DEFAULT_TRANSFER_TIMEOUT};
pub use user_handler::{
    CreateUserHandler, LoginUserHandler, UpdateUserHandler, VERIFY_EMAIL_DELAY,
    VERIFY_EMAIL_MAX_RETRY,
};
