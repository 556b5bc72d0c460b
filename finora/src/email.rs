//! Email service for account verification, password reset and email change mails.

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::{path::Path, time::Duration};

use crate::{
    config::{Config, EmailTransportConfig},
    errors::Error,
};

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
    frontend_url: String,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        Ok(Self {
            transport,
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
            frontend_url: config.frontend_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn link(&self, path: &str, token: &str) -> String {
        format!("{}/{path}?token={token}", self.frontend_url)
    }

    pub async fn send_verification_email(&self, to_email: &str, to_name: &str, token: &str, valid_for: Duration) -> Result<(), Error> {
        let link = self.link("verify-email", token);
        let body = render(
            "E-Mail-Adresse bestätigen",
            to_name,
            "Willkommen bei Finora! Bitte bestätige deine E-Mail-Adresse, um dein Konto zu aktivieren.",
            "E-Mail-Adresse bestätigen",
            &link,
            valid_for,
            "Falls du dich nicht bei Finora registriert hast, kannst du diese E-Mail ignorieren.",
        );
        self.send_email(to_email, to_name, "Bestätige deine E-Mail-Adresse", &body).await
    }

    pub async fn send_password_reset_email(&self, to_email: &str, to_name: &str, token: &str, valid_for: Duration) -> Result<(), Error> {
        let link = self.link("reset-password", token);
        let body = render(
            "Passwort zurücksetzen",
            to_name,
            "Wir haben eine Anfrage erhalten, das Passwort für dein Finora-Konto zurückzusetzen.",
            "Neues Passwort festlegen",
            &link,
            valid_for,
            "Falls du diese Anfrage nicht gestellt hast, kannst du diese E-Mail ignorieren. Dein Passwort bleibt unverändert.",
        );
        self.send_email(to_email, to_name, "Passwort zurücksetzen", &body).await
    }

    /// Sent to the new address; confirming the link applies the change.
    pub async fn send_email_change_email(&self, new_email: &str, to_name: &str, token: &str, valid_for: Duration) -> Result<(), Error> {
        let link = self.link("confirm-email-change", token);
        let body = render(
            "Neue E-Mail-Adresse bestätigen",
            to_name,
            "Du möchtest die E-Mail-Adresse deines Finora-Kontos auf diese Adresse ändern.",
            "Änderung bestätigen",
            &link,
            valid_for,
            "Falls du diese Änderung nicht angefordert hast, kannst du diese E-Mail ignorieren.",
        );
        self.send_email(new_email, to_name, "Bestätige deine neue E-Mail-Adresse", &body).await
    }

    async fn send_email(&self, to_email: &str, to_name: &str, subject: &str, body: &str) -> Result<(), Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let to = Mailbox::new(
            Some(to_name.to_string()),
            to_email.parse().map_err(|e| Error::Internal {
                operation: format!("parse to email: {e}"),
            })?,
        );

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }
}

/// "24 Stunden", "1 Stunde", "30 Minuten"
fn describe_validity(valid_for: Duration) -> String {
    let minutes = valid_for.as_secs() / 60;
    match (minutes / 60, minutes % 60) {
        (1, 0) => "1 Stunde".to_string(),
        (hours, 0) if hours > 0 => format!("{hours} Stunden"),
        _ if minutes == 1 => "1 Minute".to_string(),
        _ => format!("{minutes} Minuten"),
    }
}

fn render(title: &str, name: &str, intro: &str, action: &str, link: &str, valid_for: Duration, footer: &str) -> String {
    let validity = describe_validity(valid_for);
    format!(
        r#"<!DOCTYPE html>
<html lang="de">
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>{title}</h2>

        <p>Hallo {name},</p>

        <p>{intro}</p>

        <p><a href="{link}">{action}</a></p>

        <p>Oder kopiere diesen Link in deinen Browser:</p>
        <p>{link}</p>

        <p>Der Link ist {validity} gültig.</p>

        <div class="footer">
            <p>{footer}</p>
            <p>Dies ist eine automatische Nachricht, bitte antworte nicht auf diese E-Mail.</p>
        </div>
    </div>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;

    fn service(dir: &tempfile::TempDir) -> EmailService {
        let mut config = create_test_config();
        config.email.transport = EmailTransportConfig::File {
            path: dir.path().to_string_lossy().to_string(),
        };
        config.frontend_url = "https://app.finora.test/".parse().unwrap();
        EmailService::new(&config).unwrap()
    }

    #[test]
    fn test_links_use_frontend_url() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);
        assert_eq!(
            service.link("verify-email", "abc123"),
            "https://app.finora.test/verify-email?token=abc123"
        );
    }

    #[test]
    fn test_describe_validity() {
        assert_eq!(describe_validity(Duration::from_secs(3600)), "1 Stunde");
        assert_eq!(describe_validity(Duration::from_secs(24 * 3600)), "24 Stunden");
        assert_eq!(describe_validity(Duration::from_secs(30 * 60)), "30 Minuten");
        assert_eq!(describe_validity(Duration::from_secs(90 * 60)), "90 Minuten");
    }

    #[test]
    fn test_body_content() {
        let body = render(
            "Passwort zurücksetzen",
            "Anna",
            "Intro",
            "Neues Passwort festlegen",
            "https://app.finora.test/reset-password?token=abc",
            Duration::from_secs(3600),
            "Footer",
        );
        assert!(body.contains("Hallo Anna,"));
        assert!(body.contains(r#"<a href="https://app.finora.test/reset-password?token=abc">Neues Passwort festlegen</a>"#));
        assert!(body.contains("Der Link ist 1 Stunde gültig."));
    }

    #[tokio::test]
    async fn test_file_transport_writes_messages() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);

        service
            .send_verification_email("anna@example.com", "Anna", "tok", Duration::from_secs(3600))
            .await
            .unwrap();
        service
            .send_password_reset_email("anna@example.com", "Anna", "tok", Duration::from_secs(3600))
            .await
            .unwrap();

        let written = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(written, 2);
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);
        let result = service
            .send_email_change_email("not an address", "Anna", "tok", Duration::from_secs(3600))
            .await;
        assert!(matches!(result, Err(Error::Internal { .. })));
    }
}
