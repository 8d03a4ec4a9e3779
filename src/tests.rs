use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{MailboxError, TransportError};
use crate::gateway::{
    receive_from_mailbox, receive_from_session, EmailSender, ImapRequest, Pop3Request,
    ResultEnvelope, SendReport, SendRequest,
};
use crate::mail_reader::display::render_inbox;
use crate::mail_reader::imap::{MailboxSession, SearchCriterion};
use crate::mail_reader::message::{parse_message, AttachmentInfo};
use crate::mail_reader::pop3::SequentialMailbox;
use crate::mail_sender::builder::{OutboundMessage, ATTACHMENT_CONTENT_TYPE};
use crate::mail_sender::smtp::MailTransport;
use crate::settings::EmailSettings;

/// Keeps every delivered message so tests can count and inspect them.
#[derive(Default)]
struct RecordingTransport {
    delivered: Mutex<Vec<OutboundMessage>>,
    refuse: bool,
}

impl RecordingTransport {
    fn calls(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.delivered.lock().unwrap().push(message.clone());
        if self.refuse {
            return Err(TransportError::Delivery("535 authentication failed".to_string()));
        }
        Ok(())
    }
}

fn sender(transport: RecordingTransport, max_mb: u64) -> EmailSender<RecordingTransport> {
    EmailSender::new(
        transport,
        EmailSettings {
            default_from_email: "gateway@example.com".to_string(),
            default_from_name: "Gateway".to_string(),
            max_attachment_size_mb: max_mb,
        },
    )
}

fn request(recipient: &str) -> SendRequest {
    SendRequest {
        recipient: recipient.to_string(),
        subject: "Hi".to_string(),
        body: "Test".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn plain_send_reports_what_was_sent() {
    let sender = sender(RecordingTransport::default(), 25);
    let envelope = sender.send_email(&request("user@example.com")).await;

    assert_eq!(
        envelope,
        ResultEnvelope::Success(SendReport {
            recipient: "user@example.com".to_string(),
            subject: "Hi".to_string(),
            cc: None,
            bcc: None,
            attachments: 0,
        })
    );
    assert_eq!(sender.transport().calls(), 1);
}

#[tokio::test]
async fn invalid_addresses_never_reach_the_transport() {
    let sender = sender(RecordingTransport::default(), 25);

    let cases = [
        (request("userexample.com"), "Invalid recipient email"),
        (
            SendRequest {
                cc: Some(vec!["ok@example.com".to_string(), "bad@".to_string()]),
                ..request("user@example.com")
            },
            "Invalid CC email 'bad@'",
        ),
        (
            SendRequest {
                bcc: Some(vec!["nodomain@localhost".to_string()]),
                ..request("user@example.com")
            },
            "Invalid BCC email",
        ),
        (
            SendRequest {
                from_email: Some("sender".to_string()),
                ..request("user@example.com")
            },
            "Invalid sender email",
        ),
    ];

    for (request, expected) in cases {
        match sender.send_email(&request).await {
            ResultEnvelope::Error { message } => assert!(message.starts_with(expected), "{message}"),
            other => panic!("expected an error, got {other:?}"),
        }
    }
    assert_eq!(sender.transport().calls(), 0);
}

#[tokio::test]
async fn recipient_is_checked_before_sender() {
    let sender = EmailSender::new(RecordingTransport::default(), EmailSettings::default());

    let envelope = sender.send_email(&request("not-an-address")).await;
    assert!(matches!(envelope, ResultEnvelope::Error { ref message } if message.starts_with("Invalid recipient")));

    let envelope = sender.send_email(&request("user@example.com")).await;
    assert_eq!(envelope, ResultEnvelope::error("No sender email configured"));
    assert_eq!(sender.transport().calls(), 0);
}

#[tokio::test]
async fn blank_sender_overrides_fall_back_to_defaults() {
    let sender = sender(RecordingTransport::default(), 25);
    let request = SendRequest {
        from_email: Some(String::new()),
        from_name: Some("  ".to_string()),
        ..request("user@example.com")
    };

    let envelope = sender.send_email(&request).await;
    assert!(envelope.is_success(), "{envelope:?}");

    let delivered = sender.transport().delivered.lock().unwrap();
    assert_eq!(delivered[0].sender().as_str(), "gateway@example.com");
    let wire = String::from_utf8(delivered[0].formatted()).unwrap();
    let from = wire.lines().find(|line| line.starts_with("From:")).unwrap();
    assert!(from.contains("Gateway") && from.contains("<gateway@example.com>"), "{from}");
}

#[tokio::test]
async fn attachment_problems_never_reach_the_transport() {
    let sender = sender(RecordingTransport::default(), 1);
    let mut oversize = tempfile::NamedTempFile::new().unwrap();
    oversize.write_all(&vec![0u8; 1024 * 1024 + 1]).unwrap();

    let too_large = SendRequest {
        attachments: Some(vec![oversize.path().to_path_buf()]),
        ..request("user@example.com")
    };
    match sender.send_email(&too_large).await {
        ResultEnvelope::Error { message } => assert!(message.ends_with("exceeds maximum size of 1MB")),
        other => panic!("expected an error, got {other:?}"),
    }

    let missing = SendRequest {
        attachments: Some(vec!["/no/such/file.txt".into()]),
        ..request("user@example.com")
    };
    assert_eq!(
        sender.send_email(&missing).await,
        ResultEnvelope::error("Attachment file not found: /no/such/file.txt")
    );
    assert_eq!(sender.transport().calls(), 0);
}

#[tokio::test]
async fn relay_failure_becomes_an_error_envelope() {
    let sender = sender(
        RecordingTransport {
            refuse: true,
            ..Default::default()
        },
        25,
    );
    assert_eq!(
        sender.send_email(&request("user@example.com")).await,
        ResultEnvelope::error("Failed to send email: 535 authentication failed")
    );
}

#[tokio::test]
async fn blind_copies_are_delivered_but_not_shown() {
    let sender = sender(RecordingTransport::default(), 25);
    let request = SendRequest {
        cc: Some(vec!["b@example.com".to_string()]),
        bcc: Some(vec!["c@example.com".to_string()]),
        ..request("a@example.com")
    };
    let envelope = sender.send_email(&request).await;
    assert!(envelope.is_success());

    let delivered = sender.transport().delivered.lock().unwrap();
    let recipients: Vec<String> = delivered[0].recipients().iter().map(ToString::to_string).collect();
    assert_eq!(recipients, ["a@example.com", "b@example.com", "c@example.com"]);

    let wire = String::from_utf8(delivered[0].formatted()).unwrap();
    assert!(wire.contains("b@example.com"));
    assert!(!wire.contains("c@example.com"));
}

#[tokio::test]
async fn built_message_parses_back() {
    let sender = sender(RecordingTransport::default(), 25);
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    file.write_all(b"a,b\n1,2\n").unwrap();
    let filename = file.path().file_name().unwrap().to_string_lossy().into_owned();

    let request = SendRequest {
        subject: "Quarterly numbers".to_string(),
        body: "Figures attached.".to_string(),
        attachments: Some(vec![file.path().to_path_buf()]),
        ..request("user@example.com")
    };
    let envelope = sender.send_email(&request).await;
    assert!(envelope.is_success());

    let raw = sender.transport().delivered.lock().unwrap()[0].formatted();
    let parsed = parse_message(&raw, "1");

    assert_eq!(parsed.subject, "Quarterly numbers");
    assert_eq!(parsed.body.trim_end(), "Figures attached.");
    assert_eq!(parsed.to, "user@example.com");
    assert_eq!(
        parsed.attachments,
        vec![AttachmentInfo {
            filename,
            content_type: ATTACHMENT_CONTENT_TYPE.to_string(),
        }]
    );
}

struct EmptyMailbox;

#[async_trait]
impl MailboxSession for EmptyMailbox {
    async fn select(&mut self, _mailbox: &str) -> Result<(), MailboxError> {
        Ok(())
    }

    async fn search(&mut self, _criterion: SearchCriterion) -> Result<Vec<u32>, MailboxError> {
        Ok(Vec::new())
    }

    async fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>, MailboxError> {
        Err(MailboxError::Fetch {
            id: id.to_string(),
            reason: "empty mailbox".to_string(),
        })
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        Ok(())
    }
}

#[tokio::test]
async fn empty_imap_mailbox_renders_no_emails() {
    let envelope = receive_from_session(&mut EmptyMailbox, &ImapRequest::default()).await;

    match &envelope {
        ResultEnvelope::Success(inbox) => {
            assert_eq!(inbox.count, 0);
            assert!(inbox.emails.is_empty());
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(render_inbox(&envelope), "📭 No emails found.");
}

struct UnreachableCount;

impl SequentialMailbox for UnreachableCount {
    fn count(&mut self) -> Result<u32, MailboxError> {
        Err(MailboxError::Protocol("-ERR maildrop locked".to_string()))
    }

    fn retrieve(&mut self, _position: u32) -> Result<Vec<u8>, MailboxError> {
        unreachable!("nothing to retrieve without a count")
    }

    fn quit(&mut self) -> Result<(), MailboxError> {
        Ok(())
    }
}

#[test]
fn pop3_count_failure_is_an_error_envelope() {
    let envelope = receive_from_mailbox(&mut UnreachableCount, &Pop3Request::default());
    assert_eq!(
        render_inbox(&envelope),
        "❌ Error: Failed to receive emails via POP3: protocol error: -ERR maildrop locked"
    );
}
