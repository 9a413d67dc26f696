//! Verify-email task
//!
//! Created when a user registers. Processing stores a fresh verification
//! record for the user and mails them a link carrying its id and secret.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{CreateVerifyEmailParams, User, VerifyEmail};
use crate::mail::{Email, EmailSender};
use crate::store::UserStore;

use super::error::TaskError;
use super::processor::TaskHandler;
use super::task::Task;

pub const TASK_SEND_VERIFY_EMAIL: &str = "task:send_verify_email";

const VERIFY_EMAIL_SUBJECT: &str = "Welcome to Simple Bank";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSendVerifyEmail {
    pub username: String,
}

pub struct SendVerifyEmailHandler {
    store: Arc<dyn UserStore>,
    mailer: Arc<dyn EmailSender>,
    verify_url: String,
}

impl SendVerifyEmailHandler {
    pub fn new(
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn EmailSender>,
        verify_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            mailer,
            verify_url: verify_url.into(),
        }
    }

    fn verification_link(&self, verify_email: &VerifyEmail) -> String {
        format!(
            "{}?email_id={}&secret_code={}",
            self.verify_url, verify_email.id, verify_email.secret_code
        )
    }

    fn compose(&self, user: &User, verify_email: &VerifyEmail) -> Email {
        let body = format!(
            "Hello {},<br/>\
             Thanks for signing up with Simple Bank.<br/>\
             Confirm your email address by following <a href=\"{}\">this link</a>.<br/>",
            user.full_name,
            self.verification_link(verify_email)
        );
        Email::new(VERIFY_EMAIL_SUBJECT, body).to(user.email.clone())
    }
}

#[async_trait]
impl TaskHandler for SendVerifyEmailHandler {
    async fn process_task(&self, task: &Task) -> Result<(), TaskError> {
        let payload: PayloadSendVerifyEmail = task
            .decode_payload()
            .map_err(|e| TaskError::permanent(format!("failed to unmarshal payload: {}", e)))?;

        // The row may not be visible yet if this runs before the
        // registering transaction commits.
        let user = self
            .store
            .get_user(&payload.username)
            .await
            .map_err(|e| TaskError::retriable(format!("failed to get user: {}", e)))?;

        let verify_email = self
            .store
            .create_verify_email(CreateVerifyEmailParams::for_user(&user))
            .await
            .map_err(|e| TaskError::retriable(format!("failed to create verify email: {}", e)))?;

        self.mailer
            .send(&self.compose(&user, &verify_email))
            .await
            .map_err(|e| TaskError::retriable(format!("failed to send verify email: {}", e)))?;

        tracing::info!(
            task_id = %task.id,
            username = %user.username,
            email = %user.email,
            verify_email_id = verify_email.id,
            "Verify email sent"
        );

        Ok(())
    }
}
