use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::MailConfig;

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("mail transport is not configured")]
    NotConfigured,

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: Status: {status}, Body: {body}")]
    Api { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: Mail) -> Result<(), EmailError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct MailAddress {
    email: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Personalization {
    to: Vec<MailAddress>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MailContent {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MailRequest {
    personalizations: Vec<Personalization>,
    from: MailAddress,
    subject: String,
    content: Vec<MailContent>,
}

/// Sends plain-text mail through an HTTP mail API at `EMAIL_HOST`.
pub struct HttpMailer {
    config: MailConfig,
    client: reqwest::Client,
}

impl HttpMailer {
    pub fn new(config: MailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, mail: Mail) -> MailRequest {
        MailRequest {
            personalizations: vec![Personalization {
                to: vec![MailAddress { email: mail.to }],
            }],
            from: MailAddress {
                email: self.config.from.clone(),
            },
            subject: mail.subject,
            content: vec![MailContent {
                content_type: "text/plain".to_string(),
                value: mail.text,
            }],
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, mail: Mail) -> Result<(), EmailError> {
        let url = self.config.host.as_deref().ok_or(EmailError::NotConfigured)?;

        let mut request = self.client.post(url).json(&self.request(mail));
        if let Some(user) = &self.config.user {
            request = request.basic_auth(user, self.config.password.as_ref());
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(EmailError::Api { status, body })
        }
    }
}
