//! Blocking POP3 client and the newest-N retrieval window.
//!
//! POP3 has no search: messages are addressed by position, 1 being the
//! oldest. Callers on an async runtime should run this on a blocking
//! worker.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::ops::RangeInclusive;

use log::{debug, info, warn};

use crate::error::MailboxError;
use crate::mail_reader::Inbox;
use crate::settings::Pop3Settings;

/// A mailbox that can only be counted and read by position.
pub trait SequentialMailbox {
    fn count(&mut self) -> Result<u32, MailboxError>;

    fn retrieve(&mut self, position: u32) -> Result<Vec<u8>, MailboxError>;

    fn quit(&mut self) -> Result<(), MailboxError>;
}

/// Positions of the newest `limit` messages out of `total`, oldest first.
pub fn window(total: u32, limit: usize) -> RangeInclusive<u32> {
    let limit = u32::try_from(limit).unwrap_or(u32::MAX);
    let start = total.saturating_add(1).saturating_sub(limit).max(1);
    start..=total
}

/// Counts, retrieves the window in ascending order and quits. Positions
/// that fail to retrieve are recorded as skipped.
pub fn fetch_recent<M>(mailbox: &mut M, limit: usize) -> Result<Inbox, MailboxError>
where
    M: SequentialMailbox + ?Sized,
{
    let total = match mailbox.count() {
        Ok(total) => total,
        Err(e) => {
            if let Err(quit_error) = mailbox.quit() {
                debug!("-- quit after failed count: {}", quit_error);
            }
            return Err(e);
        }
    };
    info!("-- {} message(s) in mailbox", total);

    let mut inbox = Inbox::default();
    for position in window(total, limit) {
        let id = position.to_string();
        match mailbox.retrieve(position) {
            Ok(raw) => inbox.push_raw(&raw, &id),
            Err(e) => inbox.skip(&id, &e.to_string()),
        }
    }

    if let Err(e) = mailbox.quit() {
        warn!("-- quit failed: {}", e);
    }
    Ok(inbox)
}

pub struct Pop3Client<S: Read + Write> {
    stream: BufReader<S>,
}

impl<S: Read + Write> Pop3Client<S> {
    /// Wraps an open connection and consumes the server greeting.
    pub fn connect(stream: S) -> Result<Self, MailboxError> {
        let mut client = Pop3Client {
            stream: BufReader::new(stream),
        };
        client.read_status().map_err(MailboxError::Protocol)?;
        Ok(client)
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), MailboxError> {
        let auth_error = |reason: String| MailboxError::Auth {
            username: username.to_string(),
            reason,
        };
        self.command(&format!("USER {}", username)).map_err(auth_error)?;
        self.command(&format!("PASS {}", password)).map_err(auth_error)?;

        info!("-- logged in as {}", username);
        Ok(())
    }

    fn command(&mut self, line: &str) -> Result<String, String> {
        let stream = self.stream.get_mut();
        stream
            .write_all(format!("{}\r\n", line).as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|e| e.to_string())?;
        self.read_status()
    }

    // One status line: "+OK ..." or "-ERR ..."
    fn read_status(&mut self) -> Result<String, String> {
        let mut line = String::new();
        let read = self.stream.read_line(&mut line).map_err(|e| e.to_string())?;
        if read == 0 {
            return Err("connection closed by server".to_string());
        }

        let line = line.trim_end();
        if let Some(rest) = line.strip_prefix("+OK") {
            Ok(rest.trim().to_string())
        } else if let Some(rest) = line.strip_prefix("-ERR") {
            Err(rest.trim().to_string())
        } else {
            Err(format!("unexpected reply: {}", line))
        }
    }

    // Dot-terminated body with leading dots unstuffed
    fn read_multiline(&mut self) -> Result<Vec<u8>, String> {
        let mut content = Vec::new();
        loop {
            let mut line = Vec::new();
            let read = self
                .stream
                .read_until(b'\n', &mut line)
                .map_err(|e| e.to_string())?;
            if read == 0 {
                return Err("connection closed in the middle of a message".to_string());
            }

            let text = line
                .strip_suffix(b"\r\n")
                .or_else(|| line.strip_suffix(b"\n"))
                .unwrap_or(&line);
            if text == b"." {
                return Ok(content);
            }
            let text = text.strip_prefix(b".").unwrap_or(text);
            content.extend_from_slice(text);
            content.extend_from_slice(b"\r\n");
        }
    }

    #[cfg(test)]
    fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }
}

impl<S: Read + Write> SequentialMailbox for Pop3Client<S> {
    fn count(&mut self) -> Result<u32, MailboxError> {
        let reply = self.command("STAT").map_err(MailboxError::Protocol)?;
        reply
            .split_whitespace()
            .next()
            .and_then(|count| count.parse().ok())
            .ok_or_else(|| MailboxError::Protocol(format!("malformed STAT reply: {}", reply)))
    }

    fn retrieve(&mut self, position: u32) -> Result<Vec<u8>, MailboxError> {
        let fetch_error = |reason: String| MailboxError::Fetch {
            id: position.to_string(),
            reason,
        };
        self.command(&format!("RETR {}", position)).map_err(fetch_error)?;
        self.read_multiline().map_err(fetch_error)
    }

    fn quit(&mut self) -> Result<(), MailboxError> {
        self.command("QUIT").map(|_| ()).map_err(MailboxError::Protocol)
    }
}

fn authenticated<S: Read + Write>(
    stream: S,
    settings: &Pop3Settings,
) -> Result<Pop3Client<S>, MailboxError> {
    let mut client = Pop3Client::connect(stream)?;
    client.login(&settings.username, settings.password.expose())?;
    Ok(client)
}

/// Connects (TLS from the first byte when `use_tls` is set) and
/// authenticates.
pub fn open_session(settings: &Pop3Settings) -> Result<Box<dyn SequentialMailbox + Send>, MailboxError> {
    let server = settings.server.as_str();
    let connect_error = |reason: String| MailboxError::Connect {
        server: server.to_string(),
        port: settings.port,
        reason,
    };

    let tcp_stream =
        TcpStream::connect((server, settings.port)).map_err(|e| connect_error(e.to_string()))?;

    if settings.use_tls {
        let connector = native_tls::TlsConnector::new().map_err(|e| connect_error(e.to_string()))?;
        let tls_stream = connector
            .connect(server, tcp_stream)
            .map_err(|e| connect_error(e.to_string()))?;
        info!("-- connected to {}:{} over TLS", server, settings.port);
        Ok(Box::new(authenticated(tls_stream, settings)?))
    } else {
        info!("-- connected to {}:{}", server, settings.port);
        Ok(Box::new(authenticated(tcp_stream, settings)?))
    }
}
