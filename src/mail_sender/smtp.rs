use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use log::{debug, info};

use crate::error::TransportError;
use crate::mail_sender::builder::OutboundMessage;
use crate::settings::{SmtpSecurity, SmtpSettings};

/// Hands a finished message to a relay.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// All-or-nothing: either every envelope recipient was accepted in one
    /// transaction or an error describes why not.
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError>;
}

/// STARTTLS is mandatory once configured; a relay that does not offer it
/// fails the send instead of falling back to plaintext.
fn tls_for(security: SmtpSecurity, server: &str) -> Result<Tls, lettre::transport::smtp::Error> {
    Ok(match security {
        SmtpSecurity::ImplicitTls => Tls::Wrapper(TlsParameters::new(server.to_string())?),
        SmtpSecurity::OpportunisticUpgrade => Tls::Required(TlsParameters::new(server.to_string())?),
        SmtpSecurity::Plaintext => Tls::None,
    })
}

/// Submission client. Opens a fresh connection for every message and
/// closes it when the transaction ends, successful or not.
pub struct SmtpSubmission {
    settings: SmtpSettings,
}

impl SmtpSubmission {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let server = &self.settings.server;
        let setup_error = |e: lettre::transport::smtp::Error| TransportError::Setup {
            server: server.clone(),
            reason: e.to_string(),
        };

        let tls = tls_for(self.settings.security(), server).map_err(setup_error)?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(server.as_str())
            .port(self.settings.port)
            .tls(tls);
        if !self.settings.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.settings.username.clone(),
                self.settings.password.expose().to_string(),
            ));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl MailTransport for SmtpSubmission {
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let transport = self.transport()?;
        debug!(
            "-- submitting from {} to {}:{} ({:?})",
            message.sender(),
            self.settings.server,
            self.settings.port,
            self.settings.security()
        );

        let response = transport
            .send(message.as_lettre().clone())
            .await
            .map_err(|e| TransportError::Delivery(e.to_string()))?;

        info!(
            "-- relay accepted message for {} recipient(s): {}",
            message.recipients().len(),
            response.code()
        );
        Ok(())
    }
}
