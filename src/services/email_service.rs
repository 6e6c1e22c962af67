use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};

/// Template parameters understood by the onboarding email template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub subject: String,
    pub to_email: String,
    pub from_name: String,
    pub message: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct EmailJsRequest<'a> {
    service_id: &'a str,
    template_id: &'a str,
    user_id: &'a str,
    #[serde(rename = "accessToken", skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
    template_params: &'a EmailMessage,
}

#[derive(Clone)]
pub struct EmailJsMailer {
    client: Client,
    api_url: String,
    service_id: String,
    template_id: String,
    public_key: String,
    private_key: Option<String>,
}

impl EmailJsMailer {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            api_url: config.emailjs_api_url.clone(),
            service_id: config.emailjs_service_id.clone(),
            template_id: config.emailjs_template_id.clone(),
            public_key: config.emailjs_public_key.clone(),
            private_key: config.emailjs_private_key.clone(),
        })
    }

    fn request_body<'a>(&'a self, message: &'a EmailMessage) -> EmailJsRequest<'a> {
        EmailJsRequest {
            service_id: &self.service_id,
            template_id: &self.template_id,
            user_id: &self.public_key,
            access_token: self.private_key.as_deref(),
            template_params: message,
        }
    }
}

#[async_trait]
impl Mailer for EmailJsMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let resp = self
            .client
            .post(&self.api_url)
            .json(&self.request_body(message))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Email(format!("status {}: {}", status, body)));
        }

        info!(to = %message.to_email, subject = %message.subject, "email sent");
        Ok(())
    }
}
