use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::gateway::{EmailReceiver, EmailSender, ImapRequest, Pop3Request, SendRequest};
use crate::mail_reader::display::{render_inbox, render_send};
use crate::mail_sender::smtp::{MailTransport, SmtpSubmission};
use crate::mcp::{CallToolResult, ToolDefinition, ToolError, ToolProvider};
use crate::settings::Settings;

pub const SEND_EMAIL: &str = "send_email";
pub const RECEIVE_IMAP: &str = "receive_emails_imap";
pub const RECEIVE_POP3: &str = "receive_emails_pop3";

/// The gateway's three operations exposed as tools. Results are rendered
/// to display text; an error envelope sets `isError`.
pub struct GatewayTools<T: MailTransport = SmtpSubmission> {
    sender: EmailSender<T>,
    receiver: EmailReceiver,
}

impl GatewayTools<SmtpSubmission> {
    pub fn from_settings(settings: &Settings) -> Self {
        GatewayTools::new(
            EmailSender::from_settings(settings),
            EmailReceiver::from_settings(settings),
        )
    }
}

impl<T: MailTransport> GatewayTools<T> {
    pub fn new(sender: EmailSender<T>, receiver: EmailReceiver) -> Self {
        GatewayTools { sender, receiver }
    }
}

fn arguments<A: DeserializeOwned>(tool: &str, args: Value) -> Result<A, ToolError> {
    // Clients may omit arguments entirely for all-default calls
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

fn rendered(text: String, success: bool) -> CallToolResult {
    if success {
        CallToolResult::text(text)
    } else {
        CallToolResult::error(text)
    }
}

#[async_trait]
impl<T: MailTransport> ToolProvider for GatewayTools<T> {
    fn list_tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: SEND_EMAIL.to_string(),
                description: "Send an email via SMTP. Addresses are validated and attachments \
                              are checked against the size limit before connecting."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "recipient": { "type": "string", "description": "Email address of the recipient" },
                        "subject": { "type": "string", "description": "Email subject" },
                        "body": { "type": "string", "description": "Email body content" },
                        "attachments": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Local file paths to attach"
                        },
                        "cc": { "type": "array", "items": { "type": "string" }, "description": "CC recipients" },
                        "bcc": { "type": "array", "items": { "type": "string" }, "description": "BCC recipients" },
                        "is_html": { "type": "boolean", "default": false, "description": "Whether the body is HTML" },
                        "from_email": { "type": "string", "description": "Sender address, overrides the configured default" },
                        "from_name": { "type": "string", "description": "Sender display name" }
                    },
                    "required": ["recipient", "subject", "body"]
                }),
            },
            ToolDefinition {
                name: RECEIVE_IMAP.to_string(),
                description: "Receive the most recent emails from a mailbox using IMAP.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "mailbox": { "type": "string", "default": "INBOX", "description": "Mailbox to read from" },
                        "limit": { "type": "integer", "minimum": 0, "default": 10, "description": "Maximum number of emails" },
                        "unread_only": { "type": "boolean", "default": false, "description": "Only unread emails" }
                    }
                }),
            },
            ToolDefinition {
                name: RECEIVE_POP3.to_string(),
                description: "Receive the most recent emails using POP3.".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "limit": { "type": "integer", "minimum": 0, "default": 10, "description": "Maximum number of emails" }
                    }
                }),
            },
        ]
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<CallToolResult, ToolError> {
        debug!("-- tool call {}", name);
        match name {
            SEND_EMAIL => {
                let request: SendRequest = arguments(name, args)?;
                let envelope = self.sender.send_email(&request).await;
                Ok(rendered(render_send(&envelope), envelope.is_success()))
            }
            RECEIVE_IMAP => {
                let request: ImapRequest = arguments(name, args)?;
                let envelope = self.receiver.receive_emails_imap(&request).await;
                Ok(rendered(render_inbox(&envelope), envelope.is_success()))
            }
            RECEIVE_POP3 => {
                let request: Pop3Request = arguments(name, args)?;
                let envelope = self.receiver.receive_emails_pop3(&request).await;
                Ok(rendered(render_inbox(&envelope), envelope.is_success()))
            }
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}
