//! Caller-facing layer
//!
//! - Comment service: input validation, pagination defaults, save then broadcast
pub mod comments;

pub use comments::{parse_id, CommentService, DEFAULT_LIMIT, DEFAULT_OFFSET};
