use lettre::address::AddressError;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use uuid::Uuid;

use crate::{config, Error, ErrorKind, Result};

use super::{require, OutgoingEmail, Transport};

/// Sends through an SMTP relay over STARTTLS.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(config: &config::Email) -> Result<Self> {
        let server = require(&config.smtp_server, "smtp server")?;
        let user = require(&config.smtp_user, "smtp user")?;
        let password = require(&config.smtp_password, "smtp password")?;

        let creds = Credentials::new(user.to_string(), password.to_string());
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server)
            .map_err(|e| Error::new(ErrorKind::Misconfigured(e.to_string())))?
            .credentials(creds);
        if config.smtp_port != 0 {
            builder = builder.port(config.smtp_port);
        }

        Ok(Self {
            mailer: builder.build(),
        })
    }
}

fn mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e: AddressError| Error::new(ErrorKind::EmailParseError(e.to_string())))
}

/// Builds the MIME message, returning it along with the generated
/// `Message-ID`.
fn message(email: &OutgoingEmail) -> Result<(Message, String)> {
    let sender = mailbox(&email.sender)?;
    let message_id = format!("<{}@{}>", Uuid::new_v4(), sender.email.domain());

    let body = MultiPart::alternative()
        .singlepart(SinglePart::plain(email.plain_text.clone()))
        .singlepart(SinglePart::html(email.html.clone()));

    let builder = Message::builder()
        .from(sender)
        .to(mailbox(&email.to)?)
        .subject(email.subject.clone())
        .message_id(Some(message_id.clone()));

    let attachments = email
        .attachments
        .iter()
        .filter(|a| a.is_complete())
        .collect::<Vec<_>>();
    let message = if attachments.is_empty() {
        builder.multipart(body)?
    } else {
        let mut mixed = MultiPart::mixed().multipart(body);
        for attachment in attachments {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|e| ErrorKind::BadInput(format!("attachment content type: {}", e)))?;
            mixed = mixed.singlepart(
                lettre::message::Attachment::new(attachment.name.clone())
                    .body(attachment.content()?, content_type),
            );
        }
        builder.multipart(mixed)?
    };

    Ok((message, message_id))
}

#[async_trait::async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        let (message, message_id) = message(email)?;

        let response = self.mailer.send(message).await?;
        if response.is_positive() {
            Ok(message_id)
        } else {
            Err(ErrorKind::EmailBadResponse(response.code().to_string()).into())
        }
    }

    /// Relays don't report on delivery after accepting a message.
    async fn status(&self, _message_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::Attachment;

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            sender: "Council <news@council.example>".to_string(),
            to: "a@x.com".to_string(),
            subject: "Hello".to_string(),
            html: "<html><body><p>Hi</p></body></html>".to_string(),
            plain_text: "Hi".to_string(),
            attachments: vec![],
        }
    }

    #[test]
    fn message_id_uses_sender_domain() {
        let (message, id) = message(&email()).unwrap();
        assert!(id.ends_with("@council.example>"));
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Hello"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[test]
    fn attachments_switch_to_mixed() {
        let mut email = email();
        email.attachments.push(Attachment {
            name: "agenda.txt".to_string(),
            content_type: "text/plain".to_string(),
            base64: "YWdlbmRh".to_string(),
        });
        // incomplete entries are skipped
        email.attachments.push(Attachment::default());
        let (message, _) = message(&email).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("agenda.txt"));
    }

    #[test]
    fn bad_recipient_is_a_parse_error() {
        let mut email = email();
        email.to = "not an address".to_string();
        let err = message(&email).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::EmailParseError(_)));
    }

    #[test]
    fn missing_credentials_are_misconfiguration() {
        let err = SmtpTransport::new(&config::Email {
            smtp_server: "smtp.example.org".to_string(),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err.kind, ErrorKind::Misconfigured(_)));
    }
}
