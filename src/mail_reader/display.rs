use std::fmt::Write;

use crate::gateway::{ResultEnvelope, SendReport};
use crate::mail_reader::message::RetrievedMessage;
use crate::mail_reader::Inbox;

/// Characters of body shown per message in a listing.
pub const PREVIEW_CHARS: usize = 200;

fn render_error(message: &str) -> String {
    format!("❌ Error: {}", message)
}

fn address_list(addresses: Option<&Vec<String>>) -> String {
    match addresses {
        Some(list) if !list.is_empty() => list.join(", "),
        _ => "None".to_string(),
    }
}

pub fn render_send(envelope: &ResultEnvelope<SendReport>) -> String {
    match envelope {
        ResultEnvelope::Success(report) => format!(
            "✅ Email sent successfully!\n\
             Recipient: {}\n\
             Subject: {}\n\
             CC: {}\n\
             BCC: {}\n\
             Attachments: {}",
            report.recipient,
            report.subject,
            address_list(report.cc.as_ref()),
            address_list(report.bcc.as_ref()),
            report.attachments
        ),
        ResultEnvelope::Error { message } => render_error(message),
    }
}

pub fn render_inbox(envelope: &ResultEnvelope<Inbox>) -> String {
    let inbox = match envelope {
        ResultEnvelope::Success(inbox) => inbox,
        ResultEnvelope::Error { message } => return render_error(message),
    };

    let mut output = String::new();
    if inbox.is_empty() {
        output.push_str("📭 No emails found.");
    } else {
        let _ = write!(output, "📬 Retrieved {} email(s):\n\n", inbox.count);
        for (index, message) in inbox.emails.iter().enumerate() {
            render_message(&mut output, index + 1, message);
        }
    }

    if !inbox.skipped.is_empty() {
        if !output.ends_with('\n') {
            output.push('\n');
        }
        let _ = write!(output, "Skipped: {}", inbox.skipped.join(", "));
    }
    output
}

fn render_message(output: &mut String, index: usize, message: &RetrievedMessage) {
    let _ = writeln!(output, "--- Email {} ---", index);
    let _ = writeln!(output, "ID: {}", message.id);
    let _ = writeln!(output, "From: {}", message.from);
    let _ = writeln!(output, "To: {}", message.to);
    let _ = writeln!(output, "Subject: {}", message.subject);
    let _ = writeln!(output, "Date: {}", message.date);

    if message.has_attachments {
        let _ = writeln!(output, "Attachments: {}", message.attachments.len());
        for attachment in &message.attachments {
            let _ = writeln!(output, "  - {} ({})", attachment.filename, attachment.content_type);
        }
    }

    let _ = writeln!(output, "Body Preview: {}", preview(&message.body));
    let _ = write!(output, "Body Length: {} characters\n\n", message.body_length);
}

fn preview(body: &str) -> String {
    match body.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
