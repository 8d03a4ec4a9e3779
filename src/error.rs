//! Error types shared by the sender, the readers and the settings loader.
//!
//! None of these reach the tool caller as a fault: the gateway facade turns
//! each of them into the error side of a result envelope.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which slot of an outgoing message an address was supplied for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRole {
    Recipient,
    Cc,
    Bcc,
    Sender,
}

impl fmt::Display for AddressRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AddressRole::Recipient => "recipient",
            AddressRole::Cc => "CC",
            AddressRole::Bcc => "BCC",
            AddressRole::Sender => "sender",
        };
        f.write_str(label)
    }
}

/// Syntax rejection produced by the address validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct InvalidAddress {
    pub address: String,
    pub reason: String,
}

/// An address failed validation while preparing a send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {role} email '{}': {}", .source.address, .source.reason)]
pub struct ValidationError {
    pub role: AddressRole,
    pub source: InvalidAddress,
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Attachment file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Attachment {} exceeds maximum size of {limit_mb}MB", .path.display())]
    TooLarge { path: PathBuf, limit_mb: u64 },

    #[error("Error adding attachment {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failure anywhere on the submission path: relay setup, connect, TLS,
/// authentication or transmission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("cannot set up connection to {server}: {reason}")]
    Setup { server: String, reason: String },

    #[error("{0}")]
    Delivery(String),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error("No sender email configured")]
    MissingSender,

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Failed to send email: {0}")]
    Transport(#[from] TransportError),
}

/// Failures of the two mailbox readers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailboxError {
    #[error("cannot connect to {server}:{port}: {reason}")]
    Connect {
        server: String,
        port: u16,
        reason: String,
    },

    #[error("authentication failed for {username}: {reason}")]
    Auth { username: String, reason: String },

    #[error("cannot select mailbox {mailbox}: {reason}")]
    Folder { mailbox: String, reason: String },

    #[error("search failed: {0}")]
    Search(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("cannot fetch message {id}: {reason}")]
    Fetch { id: String, reason: String },

    #[error("mailbox worker stopped: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read settings file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse settings: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{key} must be between 1 and 65535, got {value}")]
    InvalidPort { key: String, value: String },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
