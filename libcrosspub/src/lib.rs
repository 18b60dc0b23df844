//! Crosspub - Publish orchestration and credential lifecycle for
//! multi-platform social posting
//!
//! This library provides the scheduling, dispatch, credential vault, token
//! refresh, and media retention machinery behind an auto-publisher. Platform
//! wire formats stay outside, behind the adapter registry.

pub mod adapters;
pub mod aggregate;
pub mod channels;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod media;
pub mod refresh;
pub mod retention;
pub mod scheduler;
pub mod types;
pub mod vault;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use dispatcher::{DispatchSummary, PublishDispatcher};
pub use error::{CrosspubError, Result};
pub use types::{Channel, Post, PostStatus, PostType, PublishResult};
pub use vault::CredentialVault;
