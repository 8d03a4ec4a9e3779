use mailparse::{parse_mail, DispositionType, MailHeaderMap, ParsedMail};
use serde::{Deserialize, Serialize};
use log::warn;

/// Characters of body text kept on a retrieved message.
pub const BODY_LIMIT: usize = 1000;

/// Normalized view of one message fetched from a mailbox.
///
/// `body` is capped at [`BODY_LIMIT`] characters; `body_length` is the
/// length of the full decoded text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedMessage {
    pub id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub body: String,
    pub body_length: usize,
    pub attachments: Vec<AttachmentInfo>,
    pub has_attachments: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub filename: String,
    pub content_type: String,
}

impl RetrievedMessage {
    fn new(id: &str, headers: Headers, body: String, attachments: Vec<AttachmentInfo>) -> Self {
        let body_length = body.chars().count();
        let body = if body_length > BODY_LIMIT {
            body.chars().take(BODY_LIMIT).collect()
        } else {
            body
        };
        RetrievedMessage {
            id: id.to_string(),
            subject: headers.subject,
            from: headers.from,
            to: headers.to,
            date: headers.date,
            body,
            body_length,
            has_attachments: !attachments.is_empty(),
            attachments,
        }
    }
}

#[derive(Default)]
struct Headers {
    subject: String,
    from: String,
    to: String,
    date: String,
}

/// Best-effort decode of a raw RFC 5322 message; never fails.
///
/// Decoding is lossy on purpose: bad encoded words or bytes outside the
/// declared charset become U+FFFD instead of aborting the message.
pub fn parse_message(raw: &[u8], id: &str) -> RetrievedMessage {
    match parse_mail(raw) {
        Ok(parsed) => process_message(&parsed, id),
        Err(e) => {
            warn!("Message {} is not valid MIME ({}), keeping raw text", id, e);
            RetrievedMessage::new(
                id,
                Headers::default(),
                String::from_utf8_lossy(raw).into_owned(),
                Vec::new(),
            )
        }
    }
}

fn process_message(parsed: &ParsedMail, id: &str) -> RetrievedMessage {
    // get_first_value decodes RFC 2047 encoded words
    let header = |name: &str| parsed.headers.get_first_value(name).unwrap_or_default();
    let headers = Headers {
        subject: header("Subject"),
        from: header("From"),
        to: header("To"),
        date: header("Date"),
    };

    let (body, attachments) = if is_multipart(parsed) {
        let mut attachments = Vec::new();
        collect_attachments(parsed, &mut attachments);
        (find_plain_text(parsed).unwrap_or_default(), attachments)
    } else {
        (decode_single_part(parsed), Vec::new())
    };

    RetrievedMessage::new(id, headers, body, attachments)
}

fn is_multipart(part: &ParsedMail) -> bool {
    part.ctype.mimetype.starts_with("multipart/")
}

// Depth-first, first text/plain part wins
fn find_plain_text(part: &ParsedMail) -> Option<String> {
    if part.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
        match part.get_body() {
            Ok(text) => return Some(text),
            Err(e) => warn!("Cannot decode text part: {}", e),
        }
    }

    part.subparts.iter().find_map(find_plain_text)
}

fn decode_single_part(part: &ParsedMail) -> String {
    match part.get_body() {
        Ok(text) => text,
        Err(e) => {
            warn!("Cannot decode body with declared charset: {}", e);
            part.get_body_raw()
                .map(|raw| String::from_utf8_lossy(&raw).into_owned())
                .unwrap_or_default()
        }
    }
}

fn collect_attachments(part: &ParsedMail, attachments: &mut Vec<AttachmentInfo>) {
    let disposition = part.get_content_disposition();
    if disposition.disposition == DispositionType::Attachment {
        let filename = disposition
            .params
            .get("filename")
            .or_else(|| part.ctype.params.get("name"))
            .filter(|name| !name.is_empty());
        if let Some(filename) = filename {
            attachments.push(AttachmentInfo {
                filename: filename.clone(),
                content_type: part.ctype.mimetype.clone(),
            });
        }
    }

    // Recursively process subparts
    for subpart in &part.subparts {
        collect_attachments(subpart, attachments);
    }
}
