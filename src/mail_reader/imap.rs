use std::fmt::Debug;

use async_imap::{Client, Session};
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use futures::TryStreamExt;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::error::MailboxError;
use crate::mail_reader::Inbox;
use crate::settings::ImapSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCriterion {
    All,
    Unseen,
}

impl SearchCriterion {
    pub fn from_unread_only(unread_only: bool) -> Self {
        if unread_only {
            SearchCriterion::Unseen
        } else {
            SearchCriterion::All
        }
    }

    fn query(self) -> &'static str {
        match self {
            SearchCriterion::All => "ALL",
            SearchCriterion::Unseen => "UNSEEN",
        }
    }
}

/// An authenticated connection to a folder-based mailbox.
#[async_trait]
pub trait MailboxSession: Send {
    async fn select(&mut self, mailbox: &str) -> Result<(), MailboxError>;

    /// Matching message numbers, in no particular order.
    async fn search(&mut self, criterion: SearchCriterion) -> Result<Vec<u32>, MailboxError>;

    async fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>, MailboxError>;

    async fn logout(&mut self) -> Result<(), MailboxError>;
}

/// The `limit` highest identifiers, ascending.
pub fn most_recent(mut ids: Vec<u32>, limit: usize) -> Vec<u32> {
    ids.sort_unstable();
    ids.dedup();
    ids.split_off(ids.len().saturating_sub(limit))
}

/// Selects `mailbox`, searches it and fetches the most recent `limit`
/// matches one by one. A message that fails to fetch is recorded as
/// skipped. The session is logged out whatever the outcome; a failed
/// logout only produces a warning.
pub async fn fetch_recent<S>(
    session: &mut S,
    mailbox: &str,
    criterion: SearchCriterion,
    limit: usize,
) -> Result<Inbox, MailboxError>
where
    S: MailboxSession + ?Sized,
{
    let result = fetch_selected(session, mailbox, criterion, limit).await;

    if let Err(e) = session.logout().await {
        warn!("-- logout failed: {}", e);
    }
    result
}

async fn fetch_selected<S>(
    session: &mut S,
    mailbox: &str,
    criterion: SearchCriterion,
    limit: usize,
) -> Result<Inbox, MailboxError>
where
    S: MailboxSession + ?Sized,
{
    session.select(mailbox).await?;
    info!("-- {} selected", mailbox);

    let ids = most_recent(session.search(criterion).await?, limit);
    debug!("-- fetching {} message(s)", ids.len());

    let mut inbox = Inbox::default();
    for id in ids {
        let id_label = id.to_string();
        match session.fetch_raw(id).await {
            Ok(raw) => inbox.push_raw(&raw, &id_label),
            Err(e) => inbox.skip(&id_label, &e.to_string()),
        }
    }
    Ok(inbox)
}

/// `async_imap` session over any byte stream.
pub struct ImapSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    session: Session<T>,
}

#[async_trait]
impl<T> MailboxSession for ImapSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    async fn select(&mut self, mailbox: &str) -> Result<(), MailboxError> {
        self.session
            .select(mailbox)
            .await
            .map(|_| ())
            .map_err(|e| MailboxError::Folder {
                mailbox: mailbox.to_string(),
                reason: e.to_string(),
            })
    }

    async fn search(&mut self, criterion: SearchCriterion) -> Result<Vec<u32>, MailboxError> {
        let found = self
            .session
            .search(criterion.query())
            .await
            .map_err(|e| MailboxError::Search(e.to_string()))?;
        Ok(found.into_iter().collect())
    }

    async fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>, MailboxError> {
        let fetch_error = |reason: String| MailboxError::Fetch {
            id: id.to_string(),
            reason,
        };

        let messages: Vec<_> = self
            .session
            .fetch(id.to_string(), "RFC822")
            .await
            .map_err(|e| fetch_error(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        messages
            .iter()
            .find_map(|message| message.body())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| fetch_error("server returned no body".to_string()))
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        self.session
            .logout()
            .await
            .map_err(|e| MailboxError::Protocol(e.to_string()))
    }
}

// Login to the IMAP server and return an authenticated session
async fn login_to_server<T>(
    client: Client<T>,
    settings: &ImapSettings,
) -> Result<ImapSession<T>, MailboxError>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    let session = client
        .login(&settings.username, settings.password.expose())
        .await
        .map_err(|(e, _client)| MailboxError::Auth {
            username: settings.username.clone(),
            reason: e.to_string(),
        })?;

    info!("-- logged in as {}", settings.username);
    Ok(ImapSession { session })
}

/// Connects (TLS from the first byte when `use_tls` is set), authenticates
/// and hands back a session ready for [`fetch_recent`].
pub async fn open_session(settings: &ImapSettings) -> Result<Box<dyn MailboxSession>, MailboxError> {
    let server = settings.server.as_str();
    let connect_error = |reason: String| MailboxError::Connect {
        server: server.to_string(),
        port: settings.port,
        reason,
    };

    let tcp_stream = TcpStream::connect((server, settings.port))
        .await
        .map_err(|e| connect_error(e.to_string()))?;

    if settings.use_tls {
        let connector = native_tls::TlsConnector::new().map_err(|e| connect_error(e.to_string()))?;
        let tls_stream = tokio_native_tls::TlsConnector::from(connector)
            .connect(server, tcp_stream)
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        info!("-- connected to {}:{} over TLS", server, settings.port);

        let session = login_to_server(Client::new(tls_stream.compat()), settings).await?;
        Ok(Box::new(session))
    } else {
        info!("-- connected to {}:{}", server, settings.port);
        let session = login_to_server(Client::new(tcp_stream.compat()), settings).await?;
        Ok(Box::new(session))
    }
}
