use log::warn;
use serde::{Deserialize, Serialize};

use crate::mail_reader::message::{parse_message, RetrievedMessage};

pub mod display;
pub mod imap;
pub mod message;
pub mod pop3;

/// Messages collected by one receive call.
///
/// `skipped` lists the identifiers that could not be fetched; they are not
/// part of `count`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inbox {
    pub count: usize,
    pub emails: Vec<RetrievedMessage>,
    pub skipped: Vec<String>,
}

impl Inbox {
    pub fn push_raw(&mut self, raw: &[u8], id: &str) {
        self.emails.push(parse_message(raw, id));
        self.count = self.emails.len();
    }

    pub fn skip(&mut self, id: &str, reason: &str) {
        warn!("-- skipping message {}: {}", id, reason);
        self.skipped.push(id.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}
