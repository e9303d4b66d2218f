//! Outbound email.
//!
//! Messages leave the application through a [`Transport`]. Which one is used
//! is decided by configuration, see [`from_config`].

pub mod api;
pub mod memory;
pub mod render;
pub mod smtp;

pub use memory::MemoryTransport;

use std::sync::Arc;

use base64::Engine;

use crate::config::{self, TransportKind};
use crate::{ErrorKind, Result};

/// Single message addressed to a single recipient.
#[derive(Clone, Debug, Default)]
pub struct OutgoingEmail {
    pub sender: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub plain_text: String,
    pub attachments: Vec<Attachment>,
}

/// File attached to a campaign message. Only ever held in memory for the
/// duration of a dispatch.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    /// Content encoded with standard base64.
    #[serde(default)]
    pub base64: String,
}

impl Attachment {
    /// Entries missing any of the fields are ignored.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.content_type.is_empty() && !self.base64.is_empty()
    }

    /// Approximate decoded size, derived from the encoded length.
    pub fn size_bytes(&self) -> usize {
        self.base64.len() * 3 / 4
    }

    pub fn content(&self) -> Result<Vec<u8>> {
        Ok(base64::engine::general_purpose::STANDARD.decode(&self.base64)?)
    }
}

/// Email transport boundary.
///
/// `send` resolves once the provider has accepted (or refused) the message
/// and yields the provider's message identifier.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, email: &OutgoingEmail) -> Result<String>;

    /// Probes the current delivery status of an accepted message. `None` if
    /// the provider has nothing to say about it.
    async fn status(&self, message_id: &str) -> Result<Option<String>>;
}

/// Builds the transport selected in the email config.
///
/// Fails with `Misconfigured` if the settings the transport needs are
/// missing.
pub fn from_config(config: &config::Email) -> Result<Arc<dyn Transport>> {
    match config.transport {
        TransportKind::Smtp => Ok(Arc::new(smtp::SmtpTransport::new(config)?)),
        TransportKind::Api => Ok(Arc::new(api::ApiTransport::new(config)?)),
        TransportKind::Memory => Ok(Arc::new(MemoryTransport::default())),
    }
}

pub(crate) fn require<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
        Err(ErrorKind::Misconfigured(format!("missing {}", what)).into())
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transports_require_credentials() {
        let smtp = config::Email {
            transport: TransportKind::Smtp,
            ..Default::default()
        };
        let err = from_config(&smtp).err().unwrap();
        assert!(matches!(err.kind, ErrorKind::Misconfigured(_)));

        let api = config::Email {
            transport: TransportKind::Api,
            api_endpoint: "https://mail.example.org".to_string(),
            ..Default::default()
        };
        let err = from_config(&api).err().unwrap();
        assert!(matches!(err.kind, ErrorKind::Misconfigured(_)));

        let memory = config::Email {
            transport: TransportKind::Memory,
            ..Default::default()
        };
        assert_eq!(from_config(&memory).unwrap().name(), "memory");
    }

    #[test]
    fn attachment_size_and_completeness() {
        let attachment = Attachment {
            name: "notes.txt".to_string(),
            content_type: "text/plain".to_string(),
            base64: "aGVsbG8gd29ybGQh".to_string(),
        };
        assert!(attachment.is_complete());
        assert_eq!(attachment.size_bytes(), 12);
        assert_eq!(attachment.content().unwrap(), b"hello world!");

        let partial = Attachment {
            name: "notes.txt".to_string(),
            ..Default::default()
        };
        assert!(!partial.is_complete());
    }
}
