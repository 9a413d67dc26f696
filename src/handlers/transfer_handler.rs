//! Transfer Handler
//!
//! Moves money between two accounts inside one unit of work.
//!
//! Balance rows are always locked in ascending account id order, whichever
//! side is debited. Two transfers running in opposite directions over the
//! same pair of accounts therefore queue on the same first row instead of
//! each holding the row the other one needs.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    Account, Amount, CreateEntryParams, CreateTransferParams, DomainError, OperationContext,
};
use crate::error::AppError;
use crate::store::{Store, StoreError, UnitOfWork};

use super::{TransferCommand, TransferTxResult};

/// Default deadline for one transfer
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);

/// Handler for money transfers
pub struct TransferHandler {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl TransferHandler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            timeout: DEFAULT_TRANSFER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute the transfer command.
    ///
    /// Command validation fails before any storage access. Insufficient
    /// funds is not a validation error: it is detected after both ordered
    /// balance updates, while their row locks are still held, and the unit
    /// of work is rolled back. Once the unit of work has started, any
    /// failure (including the deadline expiring) rolls back every write
    /// made so far.
    pub async fn execute(
        &self,
        command: TransferCommand,
        context: &OperationContext,
    ) -> Result<TransferTxResult, AppError> {
        let amount = command.validate()?;

        if let Some(currency) = command.currency {
            for account_id in [command.from_account_id, command.to_account_id] {
                let account = self.store.get_account(account_id).await?;
                if account.currency != currency {
                    return Err(DomainError::CurrencyMismatch {
                        account_id,
                        expected: currency,
                        actual: account.currency,
                    }
                    .into());
                }
            }
        }

        let result = tokio::time::timeout(
            self.timeout,
            self.transfer_tx(command.from_account_id, command.to_account_id, amount),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.timeout))?;

        match &result {
            Ok(tx) => tracing::info!(
                transfer_id = tx.transfer.id,
                from_account_id = command.from_account_id,
                to_account_id = command.to_account_id,
                amount = amount.value(),
                correlation_id = %context.correlation_id,
                "Transfer committed"
            ),
            Err(e) => tracing::warn!(
                from_account_id = command.from_account_id,
                to_account_id = command.to_account_id,
                amount = amount.value(),
                correlation_id = %context.correlation_id,
                error = %e,
                "Transfer rolled back"
            ),
        }

        result
    }

    async fn transfer_tx(
        &self,
        from_account_id: i64,
        to_account_id: i64,
        amount: Amount,
    ) -> Result<TransferTxResult, AppError> {
        let mut uow = self.store.begin().await?;

        let transfer = uow
            .create_transfer(CreateTransferParams {
                from_account_id,
                to_account_id,
                amount: amount.value(),
            })
            .await?;

        let from_entry = uow
            .create_entry(CreateEntryParams {
                account_id: from_account_id,
                amount: amount.as_debit(),
            })
            .await?;

        let to_entry = uow
            .create_entry(CreateEntryParams {
                account_id: to_account_id,
                amount: amount.as_credit(),
            })
            .await?;

        let (from_account, to_account) = if from_account_id < to_account_id {
            move_money(
                uow.as_mut(),
                from_account_id,
                amount.as_debit(),
                to_account_id,
                amount.as_credit(),
            )
            .await?
        } else {
            let (to_account, from_account) = move_money(
                uow.as_mut(),
                to_account_id,
                amount.as_credit(),
                from_account_id,
                amount.as_debit(),
            )
            .await?;
            (from_account, to_account)
        };

        // Both rows are locked here; the debit is undone by the rollback.
        if from_account.balance < 0 {
            uow.rollback().await?;
            return Err(DomainError::InsufficientFunds {
                account_id: from_account_id,
                resulting_balance: from_account.balance,
            }
            .into());
        }

        uow.commit().await?;

        Ok(TransferTxResult {
            transfer,
            from_entry,
            to_entry,
            from_account,
            to_account,
        })
    }
}

/// Apply two balance deltas in the given order. Callers pass the lower
/// account id first.
async fn move_money(
    uow: &mut dyn UnitOfWork,
    first_account_id: i64,
    first_delta: i64,
    second_account_id: i64,
    second_delta: i64,
) -> Result<(Account, Account), StoreError> {
    let first = uow
        .add_account_balance(first_account_id, first_delta)
        .await?;
    let second = uow
        .add_account_balance(second_account_id, second_delta)
        .await?;
    Ok((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_validation_happens_before_storage() {
        // No accounts exist: a storage access would fail with NotFound.
        let handler = TransferHandler::new(Arc::new(MemoryStore::new()));
        let context = OperationContext::new();

        let err = handler
            .execute(TransferCommand::new(1, 1, 10), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::SameAccountTransfer)));

        let err = handler
            .execute(TransferCommand::new(1, 2, 0), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::InvalidAmount(_))));
    }

    #[test]
    fn test_with_timeout() {
        let handler = TransferHandler::new(Arc::new(MemoryStore::new()))
            .with_timeout(Duration::from_millis(250));
        assert_eq!(handler.timeout, Duration::from_millis(250));
    }
}
