//! Comment Service Library
//!
//! Stores threaded comments on posts and fans newly created comments out to
//! live subscribers.
//!
//! # Modules
//!
//! - `domain`: Post/comment models and the rank encoder used for ordering
//! - `repository`: The `ContentStore` seam with in-memory and PostgreSQL backends
//! - `subscription`: Per-post subscription broker with bounded delivery
//! - `services`: Caller-facing layer (validation, pagination defaults, save then broadcast)
//! - `error`: Error types and handling
//! - `config`: Configuration management
//! - `logging`: Tracing initialisation
//! - `metrics`: Prometheus collectors for comment fan-out
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod repository;
pub mod services;
pub mod subscription;

pub use config::Config;
pub use domain::models::{Comment, CommentId, NewComment, NewPost, Post, PostId, UserId};
pub use error::{ServiceError, ServiceResult, StoreError, StoreResult};
pub use repository::{connect_store, ContentStore, MemoryStore, PostgresStore};
pub use services::CommentService;
pub use subscription::{
    BroadcastReport, CommentEvents, OverflowPolicy, SubscriptionBroker, SubscriptionId,
};
