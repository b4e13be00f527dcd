use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument};

use super::{MailError, MailVars, Mailer, Recipient, RetryPolicy, Template, FROM_NAME};

const SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// SendGrid v3 HTTP transport.
#[derive(Clone)]
pub struct SendGridMailer {
    client: reqwest::Client,
    api_key: String,
    from_email: String,
    retry: RetryPolicy,
}

impl SendGridMailer {
    pub fn new(api_key: &str, from_email: &str, retry: RetryPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            from_email: from_email.to_string(),
            retry,
        })
    }

    async fn send_once(&self, message: &serde_json::Value) -> Result<u16, MailError> {
        let res = self
            .client
            .post(SEND_URL)
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = res.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(MailError::Rejected(status.as_u16()))
        }
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    #[instrument(skip(self, vars), fields(template = template.name(), recipient = %to.email))]
    async fn send(
        &self,
        template: Template,
        to: &Recipient,
        vars: &MailVars,
        sandbox: bool,
    ) -> Result<u16, MailError> {
        let rendered = template.render(vars);
        // Sandbox mode: the provider answers 200 and drops the message.
        let message = json!({
            "personalizations": [{ "to": [{ "email": to.email, "name": to.name }] }],
            "from": { "email": self.from_email, "name": FROM_NAME },
            "subject": rendered.subject,
            "content": [{ "type": "text/plain", "value": rendered.body }],
            "mail_settings": { "sandbox_mode": { "enable": sandbox } },
        });

        let status = self.retry.run(|_| self.send_once(&message)).await?;
        debug!(status, "mail accepted by provider");
        Ok(status)
    }
}
