use std::fs;
use std::path::{Path, PathBuf};

use lettre::address::Envelope;
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment, Body, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use log::debug;

use crate::error::{AttachmentError, SendError};
use crate::mail_sender::address::Address;

/// Every attachment is sent with this generic content type.
pub const ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyKind {
    #[default]
    Plain,
    Html,
}

#[derive(Debug, Clone)]
pub struct Sender {
    pub address: Address,
    pub name: Option<String>,
}

/// Validated inputs for one outgoing message.
#[derive(Debug, Clone)]
pub struct Draft<'a> {
    pub sender: Sender,
    pub recipient: Address,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub subject: &'a str,
    pub body: &'a str,
    pub kind: BodyKind,
    pub attachments: &'a [PathBuf],
}

/// A file read from disk, ready to be encoded into the message.
#[derive(Debug)]
pub struct AttachmentFile {
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub filename: String,
    pub size: usize,
}

/// The assembled message plus the envelope it is submitted with.
///
/// Blind copies only exist in the envelope: the headers carry the primary
/// recipient and the CC list.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    sender: Address,
    recipients: Vec<Address>,
    attachments: Vec<AttachmentInfo>,
    message: Message,
}

impl OutboundMessage {
    pub fn sender(&self) -> &Address {
        &self.sender
    }

    /// Primary recipient, then CC, then BCC.
    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    pub fn attachments(&self) -> &[AttachmentInfo] {
        &self.attachments
    }

    pub fn as_lettre(&self) -> &Message {
        &self.message
    }

    /// The message exactly as it goes over the wire.
    pub fn formatted(&self) -> Vec<u8> {
        self.message.formatted()
    }
}

/// Checks existence and size, then reads the whole file.
pub fn load_attachment(path: &Path, max_bytes: u64) -> Result<AttachmentFile, AttachmentError> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Err(AttachmentError::NotFound(path.to_path_buf())),
    };
    if metadata.len() > max_bytes {
        return Err(AttachmentError::TooLarge {
            path: path.to_path_buf(),
            limit_mb: max_bytes / (1024 * 1024),
        });
    }

    let content = fs::read(path).map_err(|source| AttachmentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    debug!("-- attached {} ({} bytes)", filename, content.len());

    Ok(AttachmentFile { filename, content })
}

/// All attachments are loaded before anything is assembled, so one bad
/// path fails the whole message up front.
pub fn build_message(draft: Draft<'_>, max_attachment_bytes: u64) -> Result<OutboundMessage, SendError> {
    let files = draft
        .attachments
        .iter()
        .map(|path| load_attachment(path, max_attachment_bytes))
        .collect::<Result<Vec<_>, _>>()?;

    let recipients: Vec<Address> = std::iter::once(draft.recipient.clone())
        .chain(draft.cc.iter().cloned())
        .chain(draft.bcc.iter().cloned())
        .collect();
    let envelope = Envelope::new(
        Some(draft.sender.address.as_lettre().clone()),
        recipients.iter().map(|a| a.as_lettre().clone()).collect(),
    )
    .map_err(|e| SendError::Build(e.to_string()))?;

    let mut builder = Message::builder()
        .from(Mailbox::new(
            draft.sender.name.clone(),
            draft.sender.address.as_lettre().clone(),
        ))
        .to(Mailbox::new(None, draft.recipient.as_lettre().clone()))
        .subject(draft.subject)
        .envelope(envelope);
    for cc in &draft.cc {
        builder = builder.cc(Mailbox::new(None, cc.as_lettre().clone()));
    }

    let text = match draft.kind {
        BodyKind::Plain => SinglePart::plain(draft.body.to_string()),
        BodyKind::Html => SinglePart::html(draft.body.to_string()),
    };
    let mut multipart = MultiPart::mixed().singlepart(text);

    let content_type =
        ContentType::parse(ATTACHMENT_CONTENT_TYPE).map_err(|e| SendError::Build(e.to_string()))?;
    let mut attachments = Vec::with_capacity(files.len());
    for file in files {
        attachments.push(AttachmentInfo {
            filename: file.filename.clone(),
            size: file.content.len(),
        });
        let body = Body::new_with_encoding(file.content, ContentTransferEncoding::Base64)
            .map_err(|_| SendError::Build(format!("cannot encode {}", file.filename)))?;
        multipart =
            multipart.singlepart(Attachment::new(file.filename).body(body, content_type.clone()));
    }

    let message = builder
        .multipart(multipart)
        .map_err(|e| SendError::Build(e.to_string()))?;

    Ok(OutboundMessage {
        sender: draft.sender.address,
        recipients,
        attachments,
        message,
    })
}
