//! SMTP delivery through an authenticated STARTTLS relay

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{Email, EmailSender, MailError};
use crate::config::EmailConfig;

const ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

pub struct SmtpSender {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpSender {
    pub fn new(config: &EmailConfig) -> Result<Self, MailError> {
        let address: Address = config
            .sender_address
            .parse()
            .map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
                address: config.sender_address.clone(),
                reason: e.to_string(),
            })?;
        let from = Mailbox::new(Some(config.sender_name.clone()), address);

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_relay)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .credentials(Credentials::new(
                config.sender_address.clone(),
                config.sender_password.clone(),
            ))
            .build();

        Ok(Self { from, transport })
    }
}

#[async_trait]
impl EmailSender for SmtpSender {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let mut attachments = Vec::with_capacity(email.attachments.len());
        for path in &email.attachments {
            let body = tokio::fs::read(path)
                .await
                .map_err(|source| MailError::Attachment {
                    path: path.clone(),
                    source,
                })?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "attachment".to_string());
            attachments.push((name, body));
        }

        let message = build_message(&self.from, email, attachments)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        tracing::debug!(
            subject = %email.subject,
            recipients = email.to.len() + email.cc.len() + email.bcc.len(),
            "Email sent"
        );
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| {
        MailError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Assemble a multipart message with an HTML body and loaded attachments
fn build_message(
    from: &Mailbox,
    email: &Email,
    attachments: Vec<(String, Vec<u8>)>,
) -> Result<Message, MailError> {
    if email.to.is_empty() {
        return Err(MailError::NoRecipients);
    }

    let mut builder = Message::builder()
        .from(from.clone())
        .subject(email.subject.clone());
    for address in &email.to {
        builder = builder.to(parse_mailbox(address)?);
    }
    for address in &email.cc {
        builder = builder.cc(parse_mailbox(address)?);
    }
    for address in &email.bcc {
        builder = builder.bcc(parse_mailbox(address)?);
    }

    let content_type = ContentType::parse(ATTACHMENT_CONTENT_TYPE)
        .map_err(|e| MailError::Build(e.to_string()))?;

    let mut body = MultiPart::mixed().singlepart(SinglePart::html(email.html_body.clone()));
    for (name, bytes) in attachments {
        body = body.singlepart(Attachment::new(name).body(bytes, content_type.clone()));
    }

    builder
        .multipart(body)
        .map_err(|e| MailError::Build(e.to_string()))
}
