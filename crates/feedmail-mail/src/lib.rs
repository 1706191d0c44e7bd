pub mod recipient;
pub mod smtp;

use anyhow::Result;
use async_trait::async_trait;

pub use recipient::{RecipientError, normalize_recipient};
pub use smtp::{SmtpConfig, SmtpMailer, SmtpSecurity};

/// A plain-text message ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Anything that can deliver an [`OutgoingEmail`].
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<()>;
}
