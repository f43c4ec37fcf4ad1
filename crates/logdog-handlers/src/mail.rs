use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use logdog_types::Handler;

/// Implicit TLS (SMTPS)
const SSL_PORT: u16 = 465;
const PLAIN_PORT: u16 = 25;

fn default_port(ssl: bool) -> u16 {
    if ssl { SSL_PORT } else { PLAIN_PORT }
}

/// Mails every batch as a plain-text message
///
/// The subject is `[logdog]<path>` and the body is the lines as read. The
/// transport keeps a pooled connection; a pooled connection that no longer
/// answers is replaced before the next send.
pub struct MailHandler {
    transport: SmtpTransport,
    server: String,
    port: u16,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl MailHandler {
    pub fn builder(server: impl Into<String>) -> MailHandlerBuilder {
        MailHandlerBuilder {
            server: server.into(),
            port: None,
            ssl: true,
            credentials: None,
            from: None,
            to: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }

    fn message(&self, path: &Path, lines: &[String]) -> anyhow::Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(format!("[logdog]{}", path.display()));
        for to in &self.to {
            builder = builder.to(to.clone());
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(lines.concat())
            .context("failed to build mail")
    }
}

impl Handler for MailHandler {
    fn handle(&self, path: &Path, lines: &[String]) -> anyhow::Result<()> {
        let message = self.message(path, lines)?;
        self.transport
            .send(&message)
            .with_context(|| format!("failed to send mail via {}:{}", self.server, self.port))?;

        tracing::debug!(server = %self.server, path = %path.display(), lines = lines.len(), "mail sent");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("mail:{}:{}", self.server, self.port)
    }
}

/// Settings for a [`MailHandler`]; `build` validates addresses
pub struct MailHandlerBuilder {
    server: String,
    port: Option<u16>,
    ssl: bool,
    credentials: Option<(String, String)>,
    from: Option<String>,
    to: Vec<String>,
    timeout: Duration,
}

impl MailHandlerBuilder {
    /// Defaults to 465 with SSL and 25 without
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Implicit TLS from the first byte (default on)
    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Log in before sending. `user` doubles as the sender unless `from` is set.
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    pub fn to<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to.extend(addresses.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> anyhow::Result<MailHandler> {
        let sender = match (&self.from, &self.credentials) {
            (Some(from), _) => from.clone(),
            (None, Some((user, _))) => user.clone(),
            (None, None) => bail!("mail handler needs a sender: set from or user"),
        };
        let from: Mailbox = sender
            .parse()
            .with_context(|| format!("invalid sender address '{}'", sender))?;

        if self.to.is_empty() {
            bail!("mail handler needs at least one recipient");
        }
        let to = self
            .to
            .iter()
            .map(|address| {
                address
                    .parse::<Mailbox>()
                    .with_context(|| format!("invalid recipient address '{}'", address))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let port = self.port.unwrap_or_else(|| default_port(self.ssl));
        let mut builder = if self.ssl {
            SmtpTransport::relay(&self.server)
                .with_context(|| format!("failed to set up TLS for {}", self.server))?
        } else {
            SmtpTransport::builder_dangerous(&self.server)
        };
        builder = builder.port(port).timeout(Some(self.timeout));
        if let Some((user, password)) = self.credentials {
            builder = builder.credentials(Credentials::new(user, password));
        }

        Ok(MailHandler {
            transport: builder.build(),
            server: self.server,
            port,
            from,
            to,
        })
    }
}
