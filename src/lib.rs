pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod mailer;
pub mod memory;
pub mod posts;
pub mod saga;
pub mod state;
pub mod users;
