//! Outgoing email: password reset links and invoices.
//!
//! SMTP when `SMTP_HOST` is configured, otherwise every message is written as
//! an `.eml` file under `EMAIL_DIR` for local development.

use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Address, AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailConfig;

/// Port used for implicit TLS; every other port negotiates STARTTLS
const SMTPS_PORT: u16 = 465;

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Failed to build email: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("File delivery failed: {0}")]
    File(#[from] lettre::transport::file::Error),

    #[error("Failed to prepare email directory: {0}")]
    Io(#[from] std::io::Error),
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

pub struct EmailService {
    transport: EmailTransport,
    from: Mailbox,
    frontend_url: String,
}

impl EmailService {
    pub fn new(config: &EmailConfig) -> Result<Self, EmailError> {
        let transport = match &config.smtp {
            Some(smtp) => {
                let builder = if smtp.port == SMTPS_PORT {
                    AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?
                }
                .port(smtp.port);

                let builder = match (&smtp.username, &smtp.password) {
                    (Some(username), Some(password)) => {
                        builder.credentials(Credentials::new(username.clone(), password.clone()))
                    }
                    _ => builder,
                };

                tracing::info!(host = %smtp.host, port = smtp.port, "Using SMTP email transport");
                EmailTransport::Smtp(builder.build())
            }
            None => {
                std::fs::create_dir_all(&config.file_dir)?;
                tracing::info!(dir = %config.file_dir.display(), "SMTP not configured, writing emails to disk");
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(&config.file_dir))
            }
        };

        Ok(Self {
            transport,
            from: Mailbox::new(Some(config.from_name.clone()), config.from_email.parse()?),
            frontend_url: config.frontend_url.clone(),
        })
    }

    /// Link the frontend turns into the reset form
    pub fn reset_link(&self, token: &str) -> String {
        format!("{}/reset-password?token={}", self.frontend_url, token)
    }

    pub async fn send_password_reset(
        &self,
        to_email: &str,
        to_name: Option<&str>,
        token: &str,
    ) -> Result<(), EmailError> {
        let body = password_reset_body(to_name, &self.reset_link(token));
        let message = self
            .builder(to_email, to_name)?
            .subject("Reset your CoachHub password")
            .header(ContentType::TEXT_HTML)
            .body(body)?;

        self.send(message).await
    }

    /// Sends `invoice_html` as an attachment with a short cover note.
    pub async fn send_invoice(
        &self,
        to_email: &str,
        to_name: Option<&str>,
        invoice_number: &str,
        invoice_html: String,
    ) -> Result<(), EmailError> {
        let cover = format!(
            "<p>{}</p><p>Please find invoice {} attached.</p>",
            greeting(to_name),
            invoice_number
        );

        let attachment = Attachment::new(format!("invoice-{}.html", invoice_number))
            .body(invoice_html, ContentType::TEXT_HTML);

        let message = self
            .builder(to_email, to_name)?
            .subject(format!("Invoice {}", invoice_number))
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::html(cover))
                    .singlepart(attachment),
            )?;

        self.send(message).await
    }

    fn builder(
        &self,
        to_email: &str,
        to_name: Option<&str>,
    ) -> Result<lettre::message::MessageBuilder, EmailError> {
        let to = Mailbox::new(to_name.map(str::to_string), to_email.parse::<Address>()?);
        Ok(Message::builder().from(self.from.clone()).to(to))
    }

    async fn send(&self, message: Message) -> Result<(), EmailError> {
        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await?;
            }
            EmailTransport::File(file) => {
                file.send(message).await?;
            }
        }
        Ok(())
    }
}

fn greeting(to_name: Option<&str>) -> String {
    match to_name {
        Some(name) => format!("Hello {},", crate::services::invoice::escape_html(name)),
        None => "Hello,".to_string(),
    }
}

fn password_reset_body(to_name: Option<&str>, reset_link: &str) -> String {
    let greeting = greeting(to_name);

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Password Reset Request</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>Password Reset Request</h2>
        <p>{greeting}</p>
        <p>We received a request to reset your CoachHub password. If you didn't make this request, you can ignore this email.</p>
        <p><a href="{reset_link}">Reset your password</a></p>
        <p>Or paste this link into your browser:</p>
        <p>{reset_link}</p>
        <p>The link expires in 15 minutes.</p>
        <div class="footer">
            <p>This is an automated message, please do not reply.</p>
        </div>
    </div>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config(dir: &Path) -> EmailConfig {
        EmailConfig {
            smtp: None,
            file_dir: dir.to_path_buf(),
            from_email: "noreply@coachhub.local".to_string(),
            from_name: "CoachHub".to_string(),
            frontend_url: "https://app.example.com".to_string(),
        }
    }

    fn written(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect()
    }

    #[test]
    fn test_password_reset_body() {
        let body = password_reset_body(Some("Ada <Admin>"), "https://example.com/reset-password?token=abc123");

        assert!(body.contains("Hello Ada &lt;Admin&gt;,"));
        assert!(body.contains("https://example.com/reset-password?token=abc123"));
        assert!(password_reset_body(None, "x").contains("Hello,"));
    }

    #[test]
    fn test_reset_link() {
        let dir = tempfile::tempdir().unwrap();
        let service = EmailService::new(&config(dir.path())).unwrap();
        assert_eq!(
            service.reset_link("abc"),
            "https://app.example.com/reset-password?token=abc"
        );
    }

    #[test]
    fn test_invalid_sender_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.from_email = "not an address".to_string();
        assert!(matches!(EmailService::new(&config), Err(EmailError::Address(_))));
    }

    #[tokio::test]
    async fn test_file_transport_writes_messages() {
        let dir = tempfile::tempdir().unwrap();
        let service = EmailService::new(&config(dir.path())).unwrap();

        service
            .send_password_reset("coach@example.com", Some("Casey Coach"), "token")
            .await
            .unwrap();
        service
            .send_invoice("coach@example.com", None, "INV-000042", "<html></html>".to_string())
            .await
            .unwrap();

        let messages = written(dir.path());
        assert_eq!(messages.len(), 2);
        assert!(messages
            .iter()
            .any(|m| m.contains("Subject: Reset your CoachHub password")));
        assert!(messages.iter().any(|m| m.contains("Subject: Invoice INV-000042")));
    }

    #[tokio::test]
    async fn test_invalid_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let service = EmailService::new(&config(dir.path())).unwrap();

        let result = service.send_password_reset("nope", None, "token").await;
        assert!(matches!(result, Err(EmailError::Address(_))));
    }
}
