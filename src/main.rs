mod error;
mod gateway;
mod logging;
mod mail_reader;
mod mail_sender;
mod mcp;
mod settings;
mod web;

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{error, info, warn, LevelFilter};
use tokio::net::TcpListener;

use crate::gateway::{EmailReceiver, EmailSender, ImapRequest, Pop3Request, SendRequest};
use crate::mail_reader::display::{render_inbox, render_send};
use crate::mcp::server::McpServer;
use crate::mcp::tools::GatewayTools;
use crate::settings::Settings;

/// Email gateway: send over SMTP, read over IMAP or POP3.
#[derive(Parser)]
#[command(name = "mail-gateway", version)]
struct Cli {
    /// YAML settings file; environment variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (repeatable).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Also serve GET /api/health on this address.
    #[arg(long, global = true)]
    http: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the tools over stdio (default).
    Serve,
    /// Send one message.
    Send(SendArgs),
    /// Read the most recent messages over IMAP.
    Imap(ImapArgs),
    /// Read the most recent messages over POP3.
    Pop3(Pop3Args),
}

#[derive(Args)]
struct SendArgs {
    #[arg(long)]
    to: String,
    #[arg(long)]
    subject: String,
    #[arg(long)]
    body: String,
    #[arg(long)]
    cc: Vec<String>,
    #[arg(long)]
    bcc: Vec<String>,
    #[arg(long = "attach")]
    attachments: Vec<PathBuf>,
    /// Send the body as HTML.
    #[arg(long)]
    html: bool,
    #[arg(long)]
    from: Option<String>,
    #[arg(long)]
    from_name: Option<String>,
}

#[derive(Args)]
struct ImapArgs {
    #[arg(long, default_value = gateway::DEFAULT_MAILBOX)]
    mailbox: String,
    #[arg(long, default_value_t = gateway::DEFAULT_LIMIT)]
    limit: usize,
    #[arg(long)]
    unread_only: bool,
}

#[derive(Args)]
struct Pop3Args {
    #[arg(long, default_value_t = gateway::DEFAULT_LIMIT)]
    limit: usize,
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

impl From<SendArgs> for SendRequest {
    fn from(args: SendArgs) -> Self {
        SendRequest {
            recipient: args.to,
            subject: args.subject,
            body: args.body,
            attachments: non_empty(args.attachments),
            cc: non_empty(args.cc),
            bcc: non_empty(args.bcc),
            is_html: args.html,
            from_email: args.from,
            from_name: args.from_name,
        }
    }
}

async fn serve(settings: &Settings, http: Option<String>) -> anyhow::Result<()> {
    if let Some(bind) = http.or_else(|| settings.http_bind.clone()) {
        let listener = TcpListener::bind(&bind)
            .await
            .with_context(|| format!("cannot bind health endpoint to {}", bind))?;
        tokio::spawn(async move {
            if let Err(e) = web::serve(listener).await {
                error!("Health endpoint stopped: {}", e);
            }
        });
    }

    info!("Serving tools on stdio");
    let mut server = McpServer::new(GatewayTools::from_settings(settings));
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    server.run(stdin, tokio::io::stdout()).await?;
    Ok(())
}

fn report(text: String, success: bool) -> ExitCode {
    println!("{}", text);
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Settings errors are logged, so start at the command-line level
    logging::init(logging::effective_level(LevelFilter::Info, cli.verbose))?;
    let settings = Settings::load(cli.config.as_deref()).context("invalid configuration")?;
    logging::set_level(logging::effective_level(settings.log_level(), cli.verbose));

    if settings.smtp.missing_credentials() {
        warn!("SMTP username or password not configured; sending will fail at the relay");
    }

    let code = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            serve(&settings, cli.http).await?;
            ExitCode::SUCCESS
        }
        Command::Send(args) => {
            let envelope = EmailSender::from_settings(&settings)
                .send_email(&args.into())
                .await;
            report(render_send(&envelope), envelope.is_success())
        }
        Command::Imap(args) => {
            let request = ImapRequest {
                mailbox: args.mailbox,
                limit: args.limit,
                unread_only: args.unread_only,
            };
            let envelope = EmailReceiver::from_settings(&settings)
                .receive_emails_imap(&request)
                .await;
            report(render_inbox(&envelope), envelope.is_success())
        }
        Command::Pop3(args) => {
            let envelope = EmailReceiver::from_settings(&settings)
                .receive_emails_pop3(&Pop3Request { limit: args.limit })
                .await;
            report(render_inbox(&envelope), envelope.is_success())
        }
    };
    Ok(code)
}
