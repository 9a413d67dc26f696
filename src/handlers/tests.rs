//! Handler scenarios against the in-memory store and broker
//!
//! The Postgres-backed versions of the transfer scenarios live in
//! `tests/integration_store.rs`.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::domain::{
        Account, CreateAccountParams, CreateUserParams, Currency, DomainError, OperationContext,
    };
    use crate::error::AppError;
    use crate::handlers::{CreateUserCommand, CreateUserHandler, TransferCommand, TransferHandler};
    use crate::mail::MemorySender;
    use crate::store::{MemoryStore, Store, StoreError, UnitOfWork, UserStore};
    use crate::worker::{
        MemoryBroker, PayloadSendVerifyEmail, Queue, SendVerifyEmailHandler, Task, TaskBroker,
        TaskDistributor, TaskOptions, TaskProcessor, TaskState, TASK_SEND_VERIFY_EMAIL,
    };

    const VERIFY_URL: &str = "http://localhost:8080/v1/verify_email";

    async fn create_user(store: &MemoryStore, username: &str) {
        store
            .create_user(CreateUserParams {
                username: username.to_string(),
                hashed_password: "x".to_string(),
                full_name: "Test User".to_string(),
                email: format!("{}@example.com", username),
            })
            .await
            .unwrap();
    }

    async fn open_account(
        store: &MemoryStore,
        owner: &str,
        balance: i64,
        currency: Currency,
    ) -> Account {
        store
            .create_account(CreateAccountParams {
                owner: owner.to_string(),
                balance,
                currency,
            })
            .await
            .unwrap()
    }

    /// Two users with one USD account each
    async fn two_accounts(balance: i64) -> (MemoryStore, Account, Account) {
        let store = MemoryStore::new();
        create_user(&store, "alice").await;
        create_user(&store, "bob").await;
        let a = open_account(&store, "alice", balance, Currency::Usd).await;
        let b = open_account(&store, "bob", balance, Currency::Usd).await;
        (store, a, b)
    }

    async fn balance(store: &MemoryStore, id: i64) -> i64 {
        store.get_account(id).await.unwrap().balance
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    #[tokio::test]
    async fn test_transfer_moves_money_and_records_ledger() {
        let (store, a, b) = two_accounts(100).await;
        let handler = TransferHandler::new(Arc::new(store.clone()));

        let result = handler
            .execute(TransferCommand::new(a.id, b.id, 10), &OperationContext::new())
            .await
            .unwrap();

        assert_eq!(result.transfer.from_account_id, a.id);
        assert_eq!(result.transfer.to_account_id, b.id);
        assert_eq!(result.transfer.amount, 10);
        assert_eq!(result.from_entry.account_id, a.id);
        assert_eq!(result.from_entry.amount, -10);
        assert_eq!(result.to_entry.account_id, b.id);
        assert_eq!(result.to_entry.amount, 10);
        assert_eq!(result.from_account.balance, 90);
        assert_eq!(result.to_account.balance, 110);

        assert_eq!(balance(&store, a.id).await, 90);
        assert_eq!(balance(&store, b.id).await, 110);
        assert_eq!(store.transfer_count().await, 1);
        assert_eq!(store.entry_count().await, 2);
        assert_eq!(store.get_transfer(result.transfer.id).await.unwrap(), result.transfer);
    }

    #[tokio::test]
    async fn test_transfer_from_higher_id_to_lower_id() {
        let (store, a, b) = two_accounts(100).await;
        let handler = TransferHandler::new(Arc::new(store.clone()));

        let result = handler
            .execute(TransferCommand::new(b.id, a.id, 25), &OperationContext::new())
            .await
            .unwrap();

        assert_eq!(result.from_account.id, b.id);
        assert_eq!(result.from_account.balance, 75);
        assert_eq!(result.to_account.id, a.id);
        assert_eq!(result.to_account.balance, 125);
    }

    #[tokio::test]
    async fn test_rejected_transfers_leave_no_trace() {
        let (store, a, b) = two_accounts(100).await;
        let handler = TransferHandler::new(Arc::new(store.clone()));
        let context = OperationContext::new();

        let same = handler
            .execute(TransferCommand::new(a.id, a.id, 10), &context)
            .await
            .unwrap_err();
        assert!(matches!(same, AppError::Domain(DomainError::SameAccountTransfer)));

        for amount in [0, -5] {
            let err = handler
                .execute(TransferCommand::new(a.id, b.id, amount), &context)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Domain(DomainError::InvalidAmount(_))));
        }

        assert_eq!(store.transfer_count().await, 0);
        assert_eq!(store.entry_count().await, 0);
        assert_eq!(balance(&store, a.id).await, 100);
        assert_eq!(balance(&store, b.id).await, 100);
    }

    #[tokio::test]
    async fn test_insufficient_funds_rolls_back() {
        let (store, a, b) = two_accounts(50).await;
        let handler = TransferHandler::new(Arc::new(store.clone()));

        let err = handler
            .execute(TransferCommand::new(a.id, b.id, 80), &OperationContext::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Domain(DomainError::InsufficientFunds {
                resulting_balance: -30,
                ..
            })
        ));
        assert_eq!(balance(&store, a.id).await, 50);
        assert_eq!(balance(&store, b.id).await, 50);
        assert_eq!(store.transfer_count().await, 0);
        assert_eq!(store.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_currency_mismatch_is_rejected() {
        let (store, a, _) = two_accounts(100).await;
        let eur = open_account(&store, "bob", 100, Currency::Eur).await;
        let handler = TransferHandler::new(Arc::new(store.clone()));

        let err = handler
            .execute(
                TransferCommand::new(a.id, eur.id, 10).with_currency(Currency::Usd),
                &OperationContext::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Domain(DomainError::CurrencyMismatch {
                expected: Currency::Usd,
                actual: Currency::Eur,
                ..
            })
        ));
        assert_eq!(store.transfer_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_account_violates_foreign_key() {
        let (store, a, _) = two_accounts(100).await;
        let handler = TransferHandler::new(Arc::new(store.clone()));

        let err = handler
            .execute(TransferCommand::new(a.id, 9_999, 10), &OperationContext::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Store(StoreError::ForeignKeyViolation(_))
        ));
        assert_eq!(balance(&store, a.id).await, 100);
        assert_eq!(store.transfer_count().await, 0);
    }

    #[tokio::test]
    async fn test_deadline_rolls_back_blocked_transfer() {
        let (store, a, b) = two_accounts(100).await;
        let handler = TransferHandler::new(Arc::new(store.clone()))
            .with_timeout(Duration::from_millis(100));

        // Another unit of work holds the row lock on the lower id.
        let mut blocker = store.begin().await.unwrap();
        blocker.add_account_balance(a.id, 0).await.unwrap();

        let err = handler
            .execute(TransferCommand::new(a.id, b.id, 10), &OperationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::Timeout(_))));

        blocker.rollback().await.unwrap();
        assert_eq!(balance(&store, a.id).await, 100);
        assert_eq!(store.transfer_count().await, 0);
        assert_eq!(store.entry_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transfers_same_direction() {
        let (store, a, b) = two_accounts(100).await;
        let handler = Arc::new(TransferHandler::new(Arc::new(store.clone())));
        let n = 5;
        let amount = 10;

        let mut tasks = Vec::new();
        for _ in 0..n {
            let handler = handler.clone();
            tasks.push(tokio::spawn(async move {
                handler
                    .execute(TransferCommand::new(a.id, b.id, amount), &OperationContext::new())
                    .await
            }));
        }

        let mut seen_from_balances = Vec::new();
        for task in tasks {
            let result = task.await.unwrap().unwrap();
            // Each committed transfer observes a distinct multiple of the amount
            let diff = 100 - result.from_account.balance;
            assert_eq!(diff % amount, 0);
            assert!(diff >= amount && diff <= n * amount);
            seen_from_balances.push(result.from_account.balance);
        }
        seen_from_balances.sort_unstable();
        seen_from_balances.dedup();
        assert_eq!(seen_from_balances.len(), n as usize);

        assert_eq!(balance(&store, a.id).await, 100 - n * amount);
        assert_eq!(balance(&store, b.id).await, 100 + n * amount);
        assert_eq!(store.transfer_count().await, n as usize);
        assert_eq!(store.entry_count().await, 2 * n as usize);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_transfers_do_not_deadlock() {
        let (store, a, b) = two_accounts(100).await;
        let handler = Arc::new(TransferHandler::new(Arc::new(store.clone())));
        let n = 10;

        let mut tasks = Vec::new();
        for i in 0..n {
            let handler = handler.clone();
            let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
            tasks.push(tokio::spawn(async move {
                handler
                    .execute(TransferCommand::new(from, to, 10), &OperationContext::new())
                    .await
            }));
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            for task in tasks {
                task.await.unwrap().unwrap();
            }
        })
        .await
        .expect("opposite transfers deadlocked");

        assert_eq!(balance(&store, a.id).await, 100);
        assert_eq!(balance(&store, b.id).await, 100);
        assert_eq!(store.transfer_count().await, n);
    }

    // =========================================================================
    // Verify-email pipeline
    // =========================================================================

    fn pipeline(store: &MemoryStore) -> (Arc<MemoryBroker>, MemorySender, TaskProcessor) {
        let broker = Arc::new(MemoryBroker::new());
        let mailer = MemorySender::new();
        let processor = TaskProcessor::new(broker.clone()).handle(
            TASK_SEND_VERIFY_EMAIL,
            Arc::new(SendVerifyEmailHandler::new(
                Arc::new(store.clone()),
                Arc::new(mailer.clone()),
                VERIFY_URL,
            )),
        );
        (broker, mailer, processor)
    }

    fn after_backoff() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now() + chrono::Duration::hours(2)
    }

    #[tokio::test]
    async fn test_malformed_payload_is_attempted_once() {
        let store = MemoryStore::new();
        let (broker, mailer, processor) = pipeline(&store);

        let task = Task::new(
            TASK_SEND_VERIFY_EMAIL,
            b"{\"user\":".to_vec(),
            &TaskOptions::new().max_retry(10),
        );
        broker.enqueue(task.clone()).await.unwrap();

        assert_eq!(processor.process_next().await.unwrap(), Some(TaskState::Failed));
        broker
            .forward_scheduled(&Queue::PRIORITY_ORDER, after_backoff())
            .await
            .unwrap();
        assert_eq!(processor.process_next().await.unwrap(), None);

        assert_eq!(broker.deliveries(task.id).await, 1);
        assert_eq!(broker.state_of(task.id).await, Some(TaskState::Failed));
        assert!(mailer.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_user_not_yet_visible_is_retried_until_it_appears() {
        let store = MemoryStore::new();
        create_user(&store, "alice").await;
        store.hide_user("alice").await;
        let (broker, mailer, processor) = pipeline(&store);

        let info = TaskDistributor::new(broker.clone())
            .distribute_task_send_verify_email(
                &PayloadSendVerifyEmail {
                    username: "alice".to_string(),
                },
                TaskOptions::new().queue(Queue::Critical).max_retry(10),
            )
            .await
            .unwrap();

        assert_eq!(
            processor.process_next().await.unwrap(),
            Some(TaskState::RetryScheduled)
        );
        assert!(store.verify_emails_for("alice").await.is_empty());

        store.reveal_user("alice").await;
        broker
            .forward_scheduled(&Queue::PRIORITY_ORDER, after_backoff())
            .await
            .unwrap();
        assert_eq!(
            processor.process_next().await.unwrap(),
            Some(TaskState::Succeeded)
        );

        assert_eq!(broker.deliveries(info.id).await, 2);
        assert_eq!(store.verify_emails_for("alice").await.len(), 1);
        assert_eq!(mailer.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_registration_to_email_end_to_end() {
        let store = MemoryStore::new();
        let (broker, mailer, processor) = pipeline(&store);
        let users = CreateUserHandler::new(Arc::new(store.clone()))
            .with_distributor(TaskDistributor::new(broker.clone()));

        users
            .execute(
                CreateUserCommand::new(
                    "carol".to_string(),
                    "Carol Danvers".to_string(),
                    "carol@example.com".to_string(),
                    "secret123".to_string(),
                ),
                &OperationContext::new(),
            )
            .await
            .unwrap();

        // Delayed task: nothing is due yet
        assert_eq!(processor.process_next().await.unwrap(), None);

        broker
            .forward_scheduled(&Queue::PRIORITY_ORDER, after_backoff())
            .await
            .unwrap();
        assert_eq!(
            processor.process_next().await.unwrap(),
            Some(TaskState::Succeeded)
        );

        let records = store.verify_emails_for("carol").await;
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_used);

        let sent = mailer.sent().await;
        assert_eq!(sent[0].to, vec!["carol@example.com"]);
        assert!(sent[0].html_body.contains(&records[0].secret_code));
    }
}
