use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use crate::config::MailConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> anyhow::Result<()>;
}

/// Delivers through the Mailgun messages API.
pub struct MailgunMailer {
    http: reqwest::Client,
    config: MailConfig,
}

impl MailgunMailer {
    pub fn new(config: MailConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Mailer for MailgunMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        let url = format!("https://api.mailgun.net/v3/{}/messages", self.config.domain);
        let form = [
            ("from", self.config.from.as_str()),
            ("to", email.to.as_str()),
            ("subject", email.subject.as_str()),
            ("text", email.text.as_str()),
            ("html", email.html.as_str()),
        ];
        self.http
            .post(&url)
            .basic_auth("api", Some(&self.config.api_key))
            .form(&form)
            .send()
            .await
            .context("mailgun request")?
            .error_for_status()
            .context("mailgun rejected message")?;
        info!(to = %email.to, subject = %email.subject, "mail sent");
        Ok(())
    }
}

/// Used when no mail provider is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        info!(to = %email.to, subject = %email.subject, body = %email.text, "mail delivery disabled; logging message");
        Ok(())
    }
}

pub fn activation_email(to: &str, link: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Please confirm your registration.".into(),
        text: format!(
            "Hi,\nThanks for using SmileCook! Please confirm your registration by clicking on the link:\n{link}"
        ),
        html: format!(
            "<p>Hi,</p><p>Thanks for using SmileCook! Please confirm your registration by clicking on the link below.</p>\
             <p><a href=\"{link}\">Confirm my account</a></p>"
        ),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        pub(crate) sent: Mutex<Vec<Email>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: Email) -> anyhow::Result<()> {
            self.sent.lock().push(email);
            Ok(())
        }
    }

    #[test]
    fn activation_email_carries_link() {
        let mail = activation_email("ann@example.com", "http://x/users/confirm/abc");
        assert_eq!(mail.to, "ann@example.com");
        assert!(mail.text.contains("http://x/users/confirm/abc"));
        assert!(mail.html.contains("href=\"http://x/users/confirm/abc\""));
    }
}
