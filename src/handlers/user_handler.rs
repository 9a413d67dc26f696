//! User Handlers
//!
//! Registration persists the user, then asks the worker to send the
//! verification email. Updates and credential checks go straight to the
//! user store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::domain::{
    check_password, hash_password, CreateUserParams, DomainError, OperationContext,
    UpdateUserParams, User,
};
use crate::error::AppError;
use crate::store::UserStore;
use crate::worker::{PayloadSendVerifyEmail, Queue, TaskDistributor, TaskOptions};

use super::{CreateUserCommand, LoginUserCommand, UpdateUserCommand};

/// Retries granted to the verification email task
pub const VERIFY_EMAIL_MAX_RETRY: u32 = 10;

/// Delay before the first attempt, leaving the user row time to commit
pub const VERIFY_EMAIL_DELAY: Duration = Duration::from_secs(10);

/// Handler for user creation
pub struct CreateUserHandler {
    store: Arc<dyn UserStore>,
    distributor: Option<TaskDistributor>,
}

impl CreateUserHandler {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self {
            store,
            distributor: None,
        }
    }

    /// Enqueue a verification email for every created user
    pub fn with_distributor(mut self, distributor: TaskDistributor) -> Self {
        self.distributor = Some(distributor);
        self
    }

    /// Execute the create user command.
    ///
    /// Enqueueing the verification email is best-effort: a broker failure is
    /// logged and the created user is still returned.
    pub async fn execute(
        &self,
        command: CreateUserCommand,
        context: &OperationContext,
    ) -> Result<User, AppError> {
        command.validate()?;
        let hashed_password = hash_password(&command.password)?;

        let user = self
            .store
            .create_user(CreateUserParams {
                username: command.username,
                hashed_password,
                full_name: command.full_name,
                email: command.email,
            })
            .await?;

        tracing::info!(
            username = %user.username,
            correlation_id = %context.correlation_id,
            "User created"
        );

        if let Some(distributor) = &self.distributor {
            let payload = PayloadSendVerifyEmail {
                username: user.username.clone(),
            };
            let options = TaskOptions::new()
                .queue(Queue::Critical)
                .max_retry(VERIFY_EMAIL_MAX_RETRY)
                .process_in(VERIFY_EMAIL_DELAY);

            if let Err(e) = distributor
                .distribute_task_send_verify_email(&payload, options)
                .await
            {
                tracing::error!(
                    username = %user.username,
                    correlation_id = %context.correlation_id,
                    error = %e,
                    "Failed to distribute verify email task"
                );
            }
        }

        Ok(user)
    }
}

/// Handler for partial profile updates
pub struct UpdateUserHandler {
    store: Arc<dyn UserStore>,
}

impl UpdateUserHandler {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Changing the password rehashes it and bumps `password_changed_at`.
    pub async fn execute(
        &self,
        command: UpdateUserCommand,
        context: &OperationContext,
    ) -> Result<User, AppError> {
        command.validate()?;

        let (hashed_password, password_changed_at) = match &command.password {
            Some(password) => (Some(hash_password(password)?), Some(Utc::now())),
            None => (None, None),
        };

        let user = self
            .store
            .update_user(UpdateUserParams {
                username: command.username,
                full_name: command.full_name,
                email: command.email,
                hashed_password,
                password_changed_at,
            })
            .await?;

        tracing::info!(
            username = %user.username,
            password_changed = password_changed_at.is_some(),
            correlation_id = %context.correlation_id,
            "User updated"
        );

        Ok(user)
    }
}

/// Handler checking a user's credentials
pub struct LoginUserHandler {
    store: Arc<dyn UserStore>,
}

impl LoginUserHandler {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Returns the user when the password matches. Session tokens are not issued.
    pub async fn execute(
        &self,
        command: LoginUserCommand,
        context: &OperationContext,
    ) -> Result<User, AppError> {
        command.validate()?;

        let user = self.store.get_user(&command.username).await?;
        if !check_password(&command.password, &user.hashed_password) {
            tracing::warn!(
                username = %user.username,
                correlation_id = %context.correlation_id,
                "Login rejected"
            );
            return Err(DomainError::IncorrectPassword.into());
        }

        Ok(user)
    }
}
