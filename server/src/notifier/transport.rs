//! Mail transports

use super::NotificationError;
use crate::config::SmtpSettings;
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::debug;

/// One rendered message addressed to every email recipient
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Check that the mail server is reachable and accepts our credentials
    async fn verify(&self) -> Result<(), NotificationError>;

    async fn send(&self, mail: OutgoingMail) -> Result<(), NotificationError>;
}

/// SMTP relay with STARTTLS and login credentials
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotificationError> {
        let address = settings.user.parse::<Address>().map_err(|e| {
            NotificationError::InvalidAddress {
                address: settings.user.clone(),
                reason: e.to_string(),
            }
        })?;
        let from = Mailbox::new(Some(settings.from_name.clone()), address);

        let credentials = Credentials::new(settings.user.clone(), settings.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| {
                NotificationError::Connection(format!("Failed to create SMTP transport: {}", e))
            })?
            .credentials(credentials)
            .port(settings.port)
            .timeout(Some(Duration::from_secs(settings.timeout_sec)))
            .build();

        debug!("SMTP transport configured for {}:{}", settings.host, settings.port);

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn verify(&self) -> Result<(), NotificationError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(NotificationError::Connection(
                "SMTP server did not accept the connection".to_string(),
            )),
            Err(e) => Err(NotificationError::Connection(e.to_string())),
        }
    }

    async fn send(&self, mail: OutgoingMail) -> Result<(), NotificationError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(mail.subject);

        for recipient in &mail.to {
            let mailbox = recipient.parse::<Mailbox>().map_err(|e| {
                NotificationError::InvalidAddress {
                    address: recipient.clone(),
                    reason: e.to_string(),
                }
            })?;
            builder = builder.to(mailbox);
        }

        let message = builder
            .multipart(MultiPart::alternative_plain_html(mail.text, mail.html))
            .map_err(|e| NotificationError::Send(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotificationError::Send(e.to_string()))?;

        Ok(())
    }
}

/// Stand-in used when SMTP settings are incomplete
#[derive(Debug, Default)]
pub struct DisabledMailer;

#[async_trait]
impl MailTransport for DisabledMailer {
    async fn verify(&self) -> Result<(), NotificationError> {
        Err(NotificationError::Connection(
            "mail transport is not configured".to_string(),
        ))
    }

    async fn send(&self, _mail: OutgoingMail) -> Result<(), NotificationError> {
        Err(NotificationError::Connection(
            "mail transport is not configured".to_string(),
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn settings(user: &str) -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            user: user.to_string(),
            password: "secret".to_string(),
            from_name: "Blood Sugar Monitor".to_string(),
            timeout_sec: 5,
        }
    }

    #[tokio::test]
    async fn test_disabled_mailer_refuses() {
        let mailer = DisabledMailer;
        assert!(matches!(mailer.verify().await, Err(NotificationError::Connection(_))));

        let mail = OutgoingMail {
            to: vec!["a@example.com".to_string()],
            subject: "s".to_string(),
            text: "t".to_string(),
            html: "h".to_string(),
        };
        assert!(matches!(mailer.send(mail).await, Err(NotificationError::Connection(_))));
    }

    #[tokio::test]
    async fn test_smtp_mailer_from_address() {
        let mailer = SmtpMailer::new(&settings("alerts@example.com")).unwrap();
        assert_eq!(mailer.from.name.as_deref(), Some("Blood Sugar Monitor"));
        assert_eq!(mailer.from.email.to_string(), "alerts@example.com");

        assert!(matches!(
            SmtpMailer::new(&settings("not an address")),
            Err(NotificationError::InvalidAddress { .. })
        ));
    }
}
