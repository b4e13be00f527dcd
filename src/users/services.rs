use std::sync::Arc;

use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    repo::UserStore,
    repo_types::{NewInvitation, NewUser, User},
};
use crate::{
    auth::password::hash_password_blocking,
    error::{AppError, StoreError},
    mailer::{MailVars, Mailer, Recipient, Template},
    saga::Saga,
};

pub const DEFAULT_ROLE: &str = "user";

#[derive(Debug, Clone)]
pub struct InvitationSettings {
    pub ttl: Duration,
    pub frontend_url: String,
    pub sandbox: bool,
}

impl InvitationSettings {
    pub fn activation_url(&self, token: &str) -> String {
        format!("{}/confirm/{}", self.frontend_url.trim_end_matches('/'), token)
    }
}

/// Already-validated registration input.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Registered {
    pub user: User,
    /// Plaintext invitation token. Handed out once and never stored.
    pub invitation_token: String,
}

/// SHA-256 hex digest; the only form in which invitation tokens are persisted.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn new_invitation_token() -> String {
    Uuid::new_v4().to_string()
}

/// Registration (user + invitation, then delivery with compensation) and
/// activation.
#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UserStore>,
    mailer: Arc<dyn Mailer>,
    settings: Arc<InvitationSettings>,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        settings: InvitationSettings,
    ) -> Self {
        Self {
            users,
            mailer,
            settings: Arc::new(settings),
        }
    }

    #[instrument(skip(self, reg), fields(email = %reg.email))]
    pub async fn register(&self, reg: Registration) -> Result<Registered, AppError> {
        let Registration {
            username,
            email,
            password,
        } = reg;
        let password_hash = hash_password_blocking(password)
            .await
            .map_err(AppError::Internal)?;

        let token = new_invitation_token();
        let token_hash = hash_token(&token);
        let invitation = NewInvitation {
            token_hash: token_hash.clone(),
            expires_at: OffsetDateTime::now_utc() + self.settings.ttl,
        };
        let created = self
            .users
            .create_and_invite(
                NewUser {
                    username,
                    email,
                    password_hash,
                    role_name: DEFAULT_ROLE.to_string(),
                },
                invitation,
            )
            .await;
        let user = match created {
            Ok(user) => user,
            Err(StoreError::Timeout(op)) => {
                self.discard_unconfirmed(&token_hash).await;
                return Err(StoreError::Timeout(op).into());
            }
            Err(e) => return Err(e.into()),
        };
        info!(user_id = user.id, "user created with pending invitation");

        // Detached from the request task: once the account exists, delivery
        // and its compensation run to completion even if the client goes away.
        let service = self.clone();
        let pending = user.clone();
        let activation_url = self.settings.activation_url(&token);
        tokio::spawn(async move { service.deliver_invitation(&pending, activation_url).await })
            .await
            .map_err(|e| AppError::Internal(e.into()))??;

        Ok(Registered {
            user,
            invitation_token: token,
        })
    }

    /// The deadline may have fired after the commit landed. Without this the
    /// account would exist with no mail sent and its email taken.
    async fn discard_unconfirmed(&self, token_hash: &str) {
        match self.users.delete_pending(token_hash).await {
            Ok(()) => warn!("registration timed out after commit; pending user removed"),
            Err(StoreError::NotFound) => {}
            Err(e) => error!(error = %e, "failed to remove pending user after timeout"),
        }
    }

    async fn deliver_invitation(&self, user: &User, activation_url: String) -> Result<(), AppError> {
        let mut saga = Saga::new("registration");
        let users = Arc::clone(&self.users);
        let user_id = user.id;
        saga.completed("create_user_and_invitation", move || async move {
            users.delete(user_id).await.map_err(anyhow::Error::from)
        });

        let to = Recipient {
            name: user.username.clone(),
            email: user.email.clone(),
        };
        let vars = MailVars {
            username: user.username.clone(),
            activation_url,
        };
        match self
            .mailer
            .send(Template::UserInvitation, &to, &vars, self.settings.sandbox)
            .await
        {
            Ok(status) => {
                info!(user_id, status, "invitation delivered");
                saga.commit();
                Ok(())
            }
            Err(e) => {
                error!(user_id, error = %e, "invitation delivery failed; removing pending user");
                // Compensation failures are logged by the saga; the caller
                // still sees the delivery error.
                let _ = saga.compensate().await;
                Err(e.into())
            }
        }
    }

    /// Consumes an invitation. Wrong, expired and already-used tokens all
    /// come back as not found.
    #[instrument(skip_all)]
    pub async fn activate(&self, token: &str) -> Result<User, AppError> {
        let user = self.users.activate(&hash_token(token)).await?;
        info!(user_id = user.id, "user activated");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: i64) -> Result<(), AppError> {
        self.users.delete(user_id).await?;
        info!(user_id, "user deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::StoreError, memory::{MemoryStore, RecordingMailer}};
    use axum::http::StatusCode;

    fn service(store: &Arc<MemoryStore>, mailer: &Arc<RecordingMailer>) -> AccountService {
        AccountService::new(
            store.clone(),
            mailer.clone(),
            InvitationSettings {
                ttl: Duration::hours(72),
                frontend_url: "http://front.test/".into(),
                sandbox: true,
            },
        )
    }

    fn registration(email: &str) -> Registration {
        Registration {
            username: "ada".into(),
            email: email.into(),
            password: "analytical".into(),
        }
    }

    #[test]
    fn token_hash_is_stable_hex_sha256() {
        let h = hash_token("abc");
        assert_eq!(h, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_ne!(hash_token("abd"), h);
    }

    #[tokio::test]
    async fn register_stores_hash_and_mails_plaintext_link() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let svc = service(&store, &mailer);

        let out = svc.register(registration("ada@example.com")).await.unwrap();
        assert!(!out.user.is_active);
        assert_eq!(out.user.role.name, DEFAULT_ROLE);
        assert_ne!(out.user.password_hash, "analytical");
        assert_eq!(store.invitation_hashes(out.user.id).await, vec![hash_token(&out.invitation_token)]);

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to.email, "ada@example.com");
        assert_eq!(
            sent[0].vars.activation_url,
            format!("http://front.test/confirm/{}", out.invitation_token)
        );
        assert!(sent[0].sandbox);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_without_a_second_row() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let svc = service(&store, &mailer);

        svc.register(registration("dup@example.com")).await.unwrap();
        let err = svc.register(registration("dup@example.com")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.to_string().contains("email"));
        assert_eq!(store.user_count().await, 1);
        assert_eq!(mailer.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_removes_the_new_user() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::failing());
        let svc = service(&store, &mailer);

        let err = svc.register(registration("lost@example.com")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("mail"));
        assert_eq!(store.user_count().await, 0);
        assert!(matches!(
            store.get_by_email("lost@example.com").await,
            Err(StoreError::NotFound)
        ));
        assert_eq!(store.invitation_count().await, 0);
    }

    #[tokio::test]
    async fn timed_out_registration_leaves_no_account() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        store.lose_commit_replies();
        let svc = service(&store, &mailer);

        let err = svc.register(registration("slow@example.com")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(store.user_count().await, 0);
        assert_eq!(store.invitation_count().await, 0);
        assert!(mailer.sent().await.is_empty());
    }

    #[tokio::test]
    async fn activation_is_consumed_once() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let svc = service(&store, &mailer);
        let out = svc.register(registration("once@example.com")).await.unwrap();

        let activated = svc.activate(&out.invitation_token).await.unwrap();
        assert!(activated.is_active);
        assert!(store.get_by_id(out.user.id).await.unwrap().is_active);
        assert_eq!(store.invitation_count().await, 0);

        let err = svc.activate(&out.invitation_token).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn expired_and_unknown_tokens_look_the_same() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let svc = service(&store, &mailer);
        let out = svc.register(registration("late@example.com")).await.unwrap();
        store.expire_invitations(out.user.id).await;

        let expired = svc.activate(&out.invitation_token).await.unwrap_err();
        let unknown = svc.activate("not-a-token").await.unwrap_err();
        assert_eq!(expired.status(), StatusCode::NOT_FOUND);
        assert_eq!(expired.to_string(), unknown.to_string());
        assert!(!store.get_by_id(out.user.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn deleting_a_user_drops_its_invitations() {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let svc = service(&store, &mailer);
        let out = svc.register(registration("gone@example.com")).await.unwrap();

        svc.delete(out.user.id).await.unwrap();
        assert_eq!(store.invitation_count().await, 0);
        let err = svc.activate(&out.invitation_token).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(svc.delete(out.user.id).await.unwrap_err().status(), StatusCode::NOT_FOUND);
    }
}
