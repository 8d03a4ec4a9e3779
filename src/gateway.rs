//! The three user-facing operations.
//!
//! Every call returns a [`ResultEnvelope`]; protocol, parsing and
//! validation failures never escape as errors past this layer.

use std::fmt::Display;
use std::path::PathBuf;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::error::{AddressRole, MailboxError, SendError, ValidationError};
use crate::mail_reader::imap::{self, MailboxSession, SearchCriterion};
use crate::mail_reader::pop3::{self, SequentialMailbox};
use crate::mail_reader::Inbox;
use crate::mail_sender::address::{format_address, validate, validate_all, Address};
use crate::mail_sender::builder::{build_message, BodyKind, Draft, Sender};
use crate::mail_sender::smtp::{MailTransport, SmtpSubmission};
use crate::settings::{EmailSettings, ImapSettings, Pop3Settings, Settings};

pub const DEFAULT_MAILBOX: &str = "INBOX";
pub const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultEnvelope<T> {
    Success(T),
    Error { message: String },
}

impl<T> ResultEnvelope<T> {
    pub fn error(message: impl Into<String>) -> Self {
        ResultEnvelope::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultEnvelope::Success(_))
    }
}

/// What was sent. `cc`/`bcc` echo the normalized lists when the caller
/// supplied them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReport {
    pub recipient: String,
    pub subject: String,
    pub cc: Option<Vec<String>>,
    pub bcc: Option<Vec<String>>,
    pub attachments: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRequest {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Option<Vec<PathBuf>>,
    #[serde(default)]
    pub cc: Option<Vec<String>>,
    #[serde(default)]
    pub bcc: Option<Vec<String>>,
    #[serde(default)]
    pub is_html: bool,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImapRequest {
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub unread_only: bool,
}

impl Default for ImapRequest {
    fn default() -> Self {
        ImapRequest {
            mailbox: default_mailbox(),
            limit: DEFAULT_LIMIT,
            unread_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Pop3Request {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for Pop3Request {
    fn default() -> Self {
        Pop3Request {
            limit: DEFAULT_LIMIT,
        }
    }
}

fn default_mailbox() -> String {
    DEFAULT_MAILBOX.to_string()
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn validated(raw: &str, role: AddressRole) -> Result<Address, ValidationError> {
    validate(raw).map_err(|source| ValidationError { role, source })
}

// The first rejected entry fails the whole list
fn validated_list(raw: Option<&[String]>, role: AddressRole) -> Result<Vec<Address>, ValidationError> {
    let (valid, invalid) = validate_all(raw.unwrap_or_default());
    match invalid.into_iter().next() {
        Some(source) => Err(ValidationError { role, source }),
        None => Ok(valid),
    }
}

fn as_strings(addresses: &[Address]) -> Vec<String> {
    addresses.iter().map(ToString::to_string).collect()
}

pub struct EmailSender<T: MailTransport = SmtpSubmission> {
    transport: T,
    email: EmailSettings,
}

impl EmailSender<SmtpSubmission> {
    pub fn from_settings(settings: &Settings) -> Self {
        EmailSender::new(
            SmtpSubmission::new(settings.smtp.clone()),
            settings.email.clone(),
        )
    }
}

impl<T: MailTransport> EmailSender<T> {
    pub fn new(transport: T, email: EmailSettings) -> Self {
        EmailSender { transport, email }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn send_email(&self, request: &SendRequest) -> ResultEnvelope<SendReport> {
        match self.try_send(request).await {
            Ok(report) => ResultEnvelope::Success(report),
            Err(e) => {
                error!("Error sending email to {}: {}", request.recipient, e);
                ResultEnvelope::error(e.to_string())
            }
        }
    }

    /// Validation and attachment loading both happen before the transport
    /// is touched.
    pub async fn try_send(&self, request: &SendRequest) -> Result<SendReport, SendError> {
        let recipient = validated(&request.recipient, AddressRole::Recipient)?;
        let cc = validated_list(request.cc.as_deref(), AddressRole::Cc)?;
        let bcc = validated_list(request.bcc.as_deref(), AddressRole::Bcc)?;

        // Blank overrides mean "use the configured default"
        let from_email = request
            .from_email
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.email.default_from_email);
        if from_email.trim().is_empty() {
            return Err(SendError::MissingSender);
        }
        let sender = Sender {
            address: validated(from_email, AddressRole::Sender)?,
            name: request
                .from_name
                .as_deref()
                .filter(|name| !name.trim().is_empty())
                .or(Some(self.email.default_from_name.as_str()))
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        };

        debug!(
            "Sending as {}",
            format_address(sender.address.as_str(), sender.name.as_deref())
        );

        let attachments = request.attachments.as_deref().unwrap_or_default();
        let message = build_message(
            Draft {
                sender,
                recipient: recipient.clone(),
                cc: cc.clone(),
                bcc: bcc.clone(),
                subject: &request.subject,
                body: &request.body,
                kind: if request.is_html {
                    BodyKind::Html
                } else {
                    BodyKind::Plain
                },
                attachments,
            },
            self.email.max_attachment_bytes(),
        )?;

        self.transport.deliver(&message).await?;
        info!(
            "Email sent to {} ({} cc, {} bcc, {} attachment(s), {} bytes attached)",
            recipient,
            cc.len(),
            bcc.len(),
            message.attachments().len(),
            message.attachments().iter().map(|a| a.size).sum::<usize>()
        );

        Ok(SendReport {
            recipient: recipient.to_string(),
            subject: request.subject.clone(),
            cc: request.cc.as_ref().map(|_| as_strings(&cc)),
            bcc: request.bcc.as_ref().map(|_| as_strings(&bcc)),
            attachments: message.attachments().len(),
        })
    }
}

fn inbox_envelope<E: Display>(result: Result<Inbox, E>, protocol: &str) -> ResultEnvelope<Inbox> {
    match result {
        Ok(inbox) => {
            info!(
                "Retrieved {} email(s) via {} ({} skipped)",
                inbox.count,
                protocol,
                inbox.skipped.len()
            );
            ResultEnvelope::Success(inbox)
        }
        Err(e) => {
            error!("Error receiving emails via {}: {}", protocol, e);
            ResultEnvelope::error(format!("Failed to receive emails via {}: {}", protocol, e))
        }
    }
}

/// Reads from the configured IMAP and POP3 servers, one connection per call.
pub struct EmailReceiver {
    imap: ImapSettings,
    pop3: Pop3Settings,
}

impl EmailReceiver {
    pub fn new(imap: ImapSettings, pop3: Pop3Settings) -> Self {
        EmailReceiver { imap, pop3 }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        EmailReceiver::new(settings.imap.clone(), settings.pop3.clone())
    }

    pub async fn receive_emails_imap(&self, request: &ImapRequest) -> ResultEnvelope<Inbox> {
        match imap::open_session(&self.imap).await {
            Ok(mut session) => receive_from_session(session.as_mut(), request).await,
            Err(e) => inbox_envelope(Err(e), "IMAP"),
        }
    }

    /// The POP3 client blocks, so it runs on tokio's blocking pool.
    pub async fn receive_emails_pop3(&self, request: &Pop3Request) -> ResultEnvelope<Inbox> {
        let settings = self.pop3.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || match pop3::open_session(&settings) {
            Ok(mut mailbox) => receive_from_mailbox(mailbox.as_mut(), &request),
            Err(e) => inbox_envelope(Err(e), "POP3"),
        })
        .await
        .unwrap_or_else(|e| inbox_envelope(Err(MailboxError::Worker(e.to_string())), "POP3"))
    }
}

/// Runs an IMAP receive against an already authenticated session.
pub async fn receive_from_session(
    session: &mut dyn MailboxSession,
    request: &ImapRequest,
) -> ResultEnvelope<Inbox> {
    let criterion = SearchCriterion::from_unread_only(request.unread_only);
    let result = imap::fetch_recent(session, &request.mailbox, criterion, request.limit).await;
    inbox_envelope(result, "IMAP")
}

/// Runs a POP3 receive against an already authenticated mailbox.
pub fn receive_from_mailbox(mailbox: &mut dyn SequentialMailbox, request: &Pop3Request) -> ResultEnvelope<Inbox> {
    inbox_envelope(pop3::fetch_recent(mailbox, request.limit), "POP3")
}
