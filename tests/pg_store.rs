//! Postgres-backed store tests. They need a reachable database in
//! `DATABASE_URL` and return early without one.

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use socialnet::{
    error::StoreError,
    posts::{
        repo::{PgPostStore, PostStore},
        repo_types::{NewPost, PostPatch},
    },
    users::{
        repo::{PgRoleStore, PgUserStore, RoleStore, UserStore},
        repo_types::{NewInvitation, NewUser, User},
    },
};

async fn pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let db = PgPool::connect(&url).await.expect("connect to DATABASE_URL");
    sqlx::migrate!("./migrations").run(&db).await.expect("run migrations");
    Some(db)
}

fn unique_email() -> String {
    format!("{}@store.test", Uuid::new_v4())
}

fn unique_hash() -> String {
    Uuid::new_v4().simple().to_string()
}

fn new_user(email: &str) -> NewUser {
    NewUser {
        username: "store".into(),
        email: email.into(),
        password_hash: "hash".into(),
        role_name: "user".into(),
    }
}

fn invitation(hash: &str, ttl: Duration) -> NewInvitation {
    NewInvitation {
        token_hash: hash.into(),
        expires_at: OffsetDateTime::now_utc() + ttl,
    }
}

async fn rows_with_email(db: &PgPool, email: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(db)
        .await
        .unwrap();
    n
}

async fn invitations_of(db: &PgPool, user_id: i64) -> i64 {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_invitations WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(db)
        .await
        .unwrap();
    n
}

async fn pending_user(store: &PgUserStore) -> (User, String) {
    let hash = unique_hash();
    let user = store
        .create_and_invite(new_user(&unique_email()), invitation(&hash, Duration::hours(1)))
        .await
        .unwrap();
    (user, hash)
}

#[tokio::test]
async fn duplicate_email_keeps_a_single_row() {
    let Some(db) = pool().await else { return };
    let store = PgUserStore::new(db.clone());
    let email = unique_email();

    let first = store
        .create_and_invite(new_user(&email), invitation(&unique_hash(), Duration::hours(1)))
        .await
        .unwrap();
    assert!(!first.is_active);
    assert_eq!(first.role.name, "user");

    let second = store
        .create_and_invite(new_user(&email), invitation(&unique_hash(), Duration::hours(1)))
        .await;
    assert!(matches!(second, Err(StoreError::DuplicateEmail)));
    assert_eq!(rows_with_email(&db, &email).await, 1);
    assert_eq!(invitations_of(&db, first.id).await, 1);
}

#[tokio::test]
async fn failed_invitation_insert_rolls_back_the_user() {
    let Some(db) = pool().await else { return };
    let store = PgUserStore::new(db.clone());
    let (_, hash) = pending_user(&store).await;

    // Same token hash, fresh email: the user insert succeeds, the invitation
    // insert violates the primary key.
    let email = unique_email();
    let err = store
        .create_and_invite(new_user(&email), invitation(&hash, Duration::hours(1)))
        .await;
    assert!(err.is_err());
    assert_eq!(rows_with_email(&db, &email).await, 0);
}

#[tokio::test]
async fn unknown_role_creates_no_user() {
    let Some(db) = pool().await else { return };
    let store = PgUserStore::new(db.clone());
    let email = unique_email();
    let mut user = new_user(&email);
    user.role_name = "root".into();

    let res = store.create_and_invite(user, invitation(&unique_hash(), Duration::hours(1))).await;
    assert!(matches!(res, Err(StoreError::NotFound)));
    assert_eq!(rows_with_email(&db, &email).await, 0);
}

#[tokio::test]
async fn activation_succeeds_once() {
    let Some(db) = pool().await else { return };
    let store = PgUserStore::new(db.clone());
    let (user, hash) = pending_user(&store).await;

    let activated = store.activate(&hash).await.unwrap();
    assert_eq!(activated.id, user.id);
    assert!(activated.is_active);
    assert!(store.get_by_id(user.id).await.unwrap().is_active);
    assert_eq!(invitations_of(&db, user.id).await, 0);

    assert!(matches!(store.activate(&hash).await, Err(StoreError::NotFound)));
}

#[tokio::test]
async fn expired_invitation_does_not_activate() {
    let Some(db) = pool().await else { return };
    let store = PgUserStore::new(db);
    let hash = unique_hash();
    let user = store
        .create_and_invite(new_user(&unique_email()), invitation(&hash, -Duration::seconds(1)))
        .await
        .unwrap();

    assert!(matches!(store.activate(&hash).await, Err(StoreError::NotFound)));
    assert!(!store.get_by_id(user.id).await.unwrap().is_active);
}

#[tokio::test]
async fn concurrent_activation_has_one_winner() {
    let Some(db) = pool().await else { return };
    let store = PgUserStore::new(db);
    let (_, hash) = pending_user(&store).await;

    let (a, b) = tokio::join!(store.activate(&hash), store.activate(&hash));
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(StoreError::NotFound)));
}

#[tokio::test]
async fn delete_cascades_to_invitations() {
    let Some(db) = pool().await else { return };
    let store = PgUserStore::new(db.clone());
    let (user, hash) = pending_user(&store).await;

    store.delete(user.id).await.unwrap();
    assert_eq!(invitations_of(&db, user.id).await, 0);
    assert!(matches!(store.get_by_id(user.id).await, Err(StoreError::NotFound)));
    assert!(matches!(store.activate(&hash).await, Err(StoreError::NotFound)));
    assert!(matches!(store.delete(user.id).await, Err(StoreError::NotFound)));
}

#[tokio::test]
async fn delete_pending_spares_active_users() {
    let Some(db) = pool().await else { return };
    let store = PgUserStore::new(db.clone());

    let (pending, pending_hash) = pending_user(&store).await;
    store.delete_pending(&pending_hash).await.unwrap();
    assert!(matches!(store.get_by_id(pending.id).await, Err(StoreError::NotFound)));
    assert_eq!(invitations_of(&db, pending.id).await, 0);

    // An active user keeps its row; a leftover invitation is enough to look it up.
    let (active, hash) = pending_user(&store).await;
    store.activate(&hash).await.unwrap();
    sqlx::query("INSERT INTO user_invitations (token_hash, user_id, expires_at) VALUES ($1, $2, now())")
        .bind(&hash)
        .bind(active.id)
        .execute(&db)
        .await
        .unwrap();
    assert!(matches!(store.delete_pending(&hash).await, Err(StoreError::NotFound)));
    assert!(store.get_by_id(active.id).await.unwrap().is_active);

    assert!(matches!(
        store.delete_pending(&unique_hash()).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn seeded_roles_are_ordered_by_level() {
    let Some(db) = pool().await else { return };
    let roles = PgRoleStore::new(db);
    let user = roles.get_by_name("user").await.unwrap();
    let moderator = roles.get_by_name("moderator").await.unwrap();
    let admin = roles.get_by_name("admin").await.unwrap();
    assert!(user.level < moderator.level && moderator.level < admin.level);
    assert!(matches!(roles.get_by_name("root").await, Err(StoreError::NotFound)));
}

#[tokio::test]
async fn post_update_tells_stale_from_missing() {
    let Some(db) = pool().await else { return };
    let (author, _) = pending_user(&PgUserStore::new(db.clone())).await;
    let posts = PgPostStore::new(db);

    let post = posts
        .create(NewPost {
            title: "first".into(),
            content: "body".into(),
            user_id: author.id,
        })
        .await
        .unwrap();
    assert_eq!(post.version, 0);

    let patch = PostPatch {
        title: Some("second".into()),
        content: None,
    };
    let updated = posts.update(post.id, 0, patch.clone()).await.unwrap();
    assert_eq!(updated.version, 1);
    assert_eq!(updated.title, "second");
    assert_eq!(updated.content, "body");

    assert!(matches!(
        posts.update(post.id, 0, patch.clone()).await,
        Err(StoreError::VersionConflict)
    ));
    posts.delete(post.id).await.unwrap();
    assert!(matches!(
        posts.update(post.id, 1, patch).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn concurrent_post_updates_bump_version_once() {
    let Some(db) = pool().await else { return };
    let (author, _) = pending_user(&PgUserStore::new(db.clone())).await;
    let posts = PgPostStore::new(db);
    let post = posts
        .create(NewPost {
            title: "race".into(),
            content: "body".into(),
            user_id: author.id,
        })
        .await
        .unwrap();

    let patch = |title: &str| PostPatch {
        title: Some(title.into()),
        content: None,
    };
    let (a, b) = tokio::join!(
        posts.update(post.id, 0, patch("a")),
        posts.update(post.id, 0, patch("b"))
    );
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(StoreError::VersionConflict)));
    assert_eq!(posts.get_by_id(post.id).await.unwrap().version, 1);
}
