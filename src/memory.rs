//! In-process stores and a recording mailer. Backs `AppState::fake()` and
//! the tests; every operation holds the lock for its whole body, so each one
//! is all-or-nothing the same way the Postgres transactions are.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::{
    error::StoreError,
    mailer::{MailError, MailVars, Mailer, Recipient, Template},
    posts::{
        repo::PostStore,
        repo_types::{NewPost, Post, PostPatch},
    },
    users::{
        repo::{RoleStore, UserStore},
        repo_types::{NewInvitation, NewUser, Role, User},
    },
};

#[derive(Debug, Clone)]
struct Invitation {
    token_hash: String,
    user_id: i64,
    expires_at: OffsetDateTime,
}

#[derive(Debug)]
struct Inner {
    roles: Vec<Role>,
    users: BTreeMap<i64, User>,
    invitations: Vec<Invitation>,
    posts: BTreeMap<i64, Post>,
    next_user_id: i64,
    next_post_id: i64,
}

impl Inner {
    fn role(&self, name: &str) -> Result<Role, StoreError> {
        self.roles
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn insert_user(&mut self, user: NewUser, active: bool) -> Result<User, StoreError> {
        if self.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let role = self.role(&user.role_name)?;
        self.next_user_id += 1;
        let created = User {
            id: self.next_user_id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            created_at: OffsetDateTime::now_utc(),
            is_active: active,
            role,
        };
        self.users.insert(created.id, created.clone());
        Ok(created)
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    lose_commit_reply: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with the three seeded roles.
    pub fn new() -> Self {
        let role = |id: i64, name: &str, level: i32, description: &str| Role {
            id,
            name: name.to_string(),
            level,
            description: description.to_string(),
        };
        Self {
            inner: Mutex::new(Inner {
                roles: vec![
                    role(1, "user", 1, "A user can create posts and comments"),
                    role(2, "moderator", 2, "A moderator can update other users posts"),
                    role(3, "admin", 3, "An admin can update and delete other users posts"),
                ],
                users: BTreeMap::new(),
                invitations: Vec::new(),
                posts: BTreeMap::new(),
                next_user_id: 0,
                next_post_id: 0,
            }),
            lose_commit_reply: AtomicBool::new(false),
        }
    }

    /// From now on `create_and_invite` keeps its writes but reports a
    /// deadline expiry, as when the commit reply never arrives.
    pub fn lose_commit_replies(&self) {
        self.lose_commit_reply.store(true, Ordering::SeqCst);
    }

    /// Inserts a user directly, without an invitation.
    pub async fn seed_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        role_name: &str,
        active: bool,
    ) -> Result<User, StoreError> {
        self.inner.lock().await.insert_user(
            NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                role_name: role_name.to_string(),
            },
            active,
        )
    }

    pub async fn user_count(&self) -> usize {
        self.inner.lock().await.users.len()
    }

    pub async fn invitation_count(&self) -> usize {
        self.inner.lock().await.invitations.len()
    }

    pub async fn invitation_hashes(&self, user_id: i64) -> Vec<String> {
        self.inner
            .lock()
            .await
            .invitations
            .iter()
            .filter(|i| i.user_id == user_id)
            .map(|i| i.token_hash.clone())
            .collect()
    }

    /// Moves every invitation of `user_id` into the past.
    pub async fn expire_invitations(&self, user_id: i64) {
        let past = OffsetDateTime::now_utc() - Duration::seconds(1);
        for inv in self
            .inner
            .lock()
            .await
            .invitations
            .iter_mut()
            .filter(|i| i.user_id == user_id)
        {
            inv.expires_at = past;
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_by_id(&self, id: i64) -> Result<User, StoreError> {
        self.inner
            .lock()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.inner
            .lock()
            .await
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create_and_invite(
        &self,
        user: NewUser,
        invitation: NewInvitation,
    ) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().await;
        let created = inner.insert_user(user, false)?;
        inner.invitations.push(Invitation {
            token_hash: invitation.token_hash,
            user_id: created.id,
            expires_at: invitation.expires_at,
        });
        if self.lose_commit_reply.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout("users.create_and_invite"));
        }
        Ok(created)
    }

    async fn activate(&self, token_hash: &str) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();
        let user_id = inner
            .invitations
            .iter()
            .find(|i| i.token_hash == token_hash && i.expires_at > now)
            .map(|i| i.user_id)
            .ok_or(StoreError::NotFound)?;

        let user = inner.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.is_active = true;
        let activated = user.clone();
        inner.invitations.retain(|i| i.user_id != user_id);
        Ok(activated)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.users.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        inner.invitations.retain(|i| i.user_id != id);
        Ok(())
    }

    async fn delete_pending(&self, token_hash: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let user_id = inner
            .invitations
            .iter()
            .find(|i| i.token_hash == token_hash)
            .map(|i| i.user_id)
            .filter(|id| inner.users.get(id).is_some_and(|u| !u.is_active))
            .ok_or(StoreError::NotFound)?;
        inner.users.remove(&user_id);
        inner.invitations.retain(|i| i.user_id != user_id);
        Ok(())
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn get_by_name(&self, name: &str) -> Result<Role, StoreError> {
        self.inner.lock().await.role(name)
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn create(&self, post: NewPost) -> Result<Post, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_post_id += 1;
        let now = OffsetDateTime::now_utc();
        let created = Post {
            id: inner.next_post_id,
            title: post.title,
            content: post.content,
            user_id: post.user_id,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        inner.posts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> Result<Post, StoreError> {
        self.inner
            .lock()
            .await
            .posts
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(
        &self,
        id: i64,
        expected_version: i32,
        patch: PostPatch,
    ) -> Result<Post, StoreError> {
        let mut inner = self.inner.lock().await;
        let post = inner.posts.get_mut(&id).ok_or(StoreError::NotFound)?;
        if post.version != expected_version {
            return Err(StoreError::VersionConflict);
        }
        if let Some(title) = patch.title {
            post.title = title;
        }
        if let Some(content) = patch.content {
            post.content = content;
        }
        post.version += 1;
        post.updated_at = OffsetDateTime::now_utc();
        Ok(post.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .posts
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub template: Template,
    pub to: Recipient,
    pub vars: MailVars,
    pub sandbox: bool,
}

/// Keeps every accepted message; `failing()` rejects all of them.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(
        &self,
        template: Template,
        to: &Recipient,
        vars: &MailVars,
        sandbox: bool,
    ) -> Result<u16, MailError> {
        if self.fail {
            return Err(MailError::Rejected(503));
        }
        self.sent.lock().await.push(SentMail {
            template,
            to: to.clone(),
            vars: vars.clone(),
            sandbox,
        });
        Ok(202)
    }
}
