//! Account Creation Handler

use std::sync::Arc;

use crate::domain::{Account, CreateAccountParams, OperationContext};
use crate::error::AppError;
use crate::store::Store;

use super::CreateAccountCommand;

/// Handler for opening accounts
pub struct CreateAccountHandler {
    store: Arc<dyn Store>,
}

impl CreateAccountHandler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Open an empty account. An owner holds at most one account per
    /// currency.
    pub async fn execute(
        &self,
        command: CreateAccountCommand,
        context: &OperationContext,
    ) -> Result<Account, AppError> {
        if command.owner.trim().is_empty() {
            return Err(AppError::InvalidRequest("owner must not be empty".to_string()));
        }

        let account = self
            .store
            .create_account(CreateAccountParams {
                owner: command.owner,
                balance: 0,
                currency: command.currency,
            })
            .await?;

        tracing::info!(
            account_id = account.id,
            owner = %account.owner,
            currency = %account.currency,
            correlation_id = %context.correlation_id,
            "Account created"
        );

        Ok(account)
    }
}
