//! Outbound mail capability.
//!
//! Callers see a single `send(template, recipient, vars)` returning the
//! provider status code. Transports retry on their own with
//! [`RetryPolicy`], which drives `backoff::future::retry_notify`.

mod sendgrid;

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use backoff::{backoff::Backoff, future::retry_notify};
use thiserror::Error;
use tracing::{info, warn};

pub use sendgrid::SendGridMailer;

pub const FROM_NAME: &str = "SocialNet";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport error: {0}")]
    Transport(String),
    #[error("mail provider rejected the message with status {0}")]
    Rejected(u16),
    #[error("failed to send email after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<MailError> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    UserInvitation,
}

#[derive(Debug, Clone)]
pub struct Recipient {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct MailVars {
    pub username: String,
    pub activation_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
}

impl Template {
    pub fn name(&self) -> &'static str {
        match self {
            Template::UserInvitation => "user_invitation",
        }
    }

    pub fn render(&self, vars: &MailVars) -> Rendered {
        match self {
            Template::UserInvitation => Rendered {
                subject: format!("Finish registration with {FROM_NAME}"),
                body: format!(
                    "Hi {},\n\n\
                     Thanks for signing up for {FROM_NAME}. To activate your account, open:\n\n\
                     {}\n\n\
                     If you did not sign up you can safely ignore this email.\n\n\
                     Thanks,\nThe {FROM_NAME} team\n",
                    vars.username, vars.activation_url
                ),
            },
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Delivers `template` to `to`, returning the provider status code.
    async fn send(
        &self,
        template: Template,
        to: &Recipient,
        vars: &MailVars,
        sandbox: bool,
    ) -> Result<u16, MailError>;
}

/// Bounded attempts with a delay that grows linearly: `base`, `2*base`, ...
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// [`Backoff`] that waits `base * n` after the n-th failure and gives up
/// once `max_attempts` attempts have failed.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base: Duration,
    max_attempts: u32,
    failures: u32,
}

impl Backoff for LinearBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            None
        } else {
            Some(self.base * self.failures)
        }
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

impl MailError {
    /// Transport failures, throttling and provider 5xx are worth another
    /// attempt; any other rejection is final.
    pub fn is_transient(&self) -> bool {
        match self {
            MailError::Transport(_) => true,
            MailError::Rejected(status) => *status == 429 || *status >= 500,
            MailError::Exhausted { .. } => false,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> LinearBackoff {
        LinearBackoff {
            base: self.base_delay,
            max_attempts: self.max_attempts.max(1),
            failures: 0,
        }
    }

    /// Runs `op` with the 1-based attempt number until it succeeds or a
    /// retry is no longer allowed.
    pub async fn run<F, Fut>(&self, mut op: F) -> Result<u16, MailError>
    where
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = Result<u16, MailError>> + Send,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0u32;
        let outcome = retry_notify(
            self.backoff(),
            || {
                attempts += 1;
                let fut = op(attempts);
                async move {
                    fut.await.map_err(|e| {
                        if e.is_transient() {
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
                }
            },
            |e: MailError, wait: Duration| {
                warn!(
                    max_attempts,
                    error = %e,
                    retry_in_ms = wait.as_millis() as u64,
                    "mail attempt failed"
                );
            },
        )
        .await;

        match outcome {
            Ok(status) => Ok(status),
            Err(e) if e.is_transient() => Err(MailError::Exhausted {
                attempts,
                last: Box::new(e),
            }),
            Err(e) => Err(e),
        }
    }
}

/// Transport used when no provider is configured. Nothing leaves the process;
/// the activation link is not logged.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(
        &self,
        template: Template,
        to: &Recipient,
        _vars: &MailVars,
        sandbox: bool,
    ) -> Result<u16, MailError> {
        info!(
            template = template.name(),
            recipient = %to.email,
            sandbox,
            "no mail transport configured; message dropped"
        );
        Ok(200)
    }
}
