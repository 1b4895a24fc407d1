//! Error types for comment-service
use crate::domain::models::{CommentId, PostId, UserId};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors returned by post/comment stores
///
/// Validation-shaped variants carry the offending ids. Backend failures are
/// collapsed into `Internal`; the details only go to the log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("post with id {0} does not exist")]
    PostNotFound(PostId),

    #[error("comment with id {0} does not exist")]
    CommentNotFound(CommentId),

    #[error("post {post_id} belongs to another user (owner id: {owner_id})")]
    AccessDenied { post_id: PostId, owner_id: UserId },

    #[error("comments already turned off; post id: {0}")]
    AlreadyDisabled(PostId),

    #[error("comments are turned off; post id: {0}")]
    PostCommentsDisabled(PostId),

    #[error("there is no comment with id {parent_comment_id} for post {post_id}")]
    InvalidParentCommentId {
        post_id: PostId,
        parent_comment_id: CommentId,
    },

    #[error("parent comment belongs to post {parent_post_id}, not post {post_id}")]
    ParentBelongsAnotherPost {
        post_id: PostId,
        parent_post_id: PostId,
    },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("internal storage error")]
    Internal,
}

impl StoreError {
    /// Returns whether the caller may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Internal)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::PostNotFound(_) | StoreError::CommentNotFound(_)
        )
    }
}

/// Errors surfaced by the caller-facing service layer
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Pool creation or migration failure while opening a durable store
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ServiceError {
    /// The underlying store error, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            ServiceError::Store(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_ids() {
        let err = StoreError::AccessDenied {
            post_id: 7,
            owner_id: 3,
        };
        assert_eq!(
            err.to_string(),
            "post 7 belongs to another user (owner id: 3)"
        );

        let err = StoreError::ParentBelongsAnotherPost {
            post_id: 2,
            parent_post_id: 1,
        };
        assert!(err.to_string().contains("post 1"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::Internal.is_retryable());
        assert!(StoreError::Timeout(Duration::from_secs(2)).is_retryable());
        assert!(!StoreError::PostNotFound(1).is_retryable());
        assert!(!StoreError::AlreadyDisabled(1).is_retryable());
    }

    #[test]
    fn test_service_error_wraps_store_error() {
        let err: ServiceError = StoreError::PostCommentsDisabled(5).into();
        assert_eq!(err.store_error(), Some(&StoreError::PostCommentsDisabled(5)));
        assert_eq!(err.to_string(), "comments are turned off; post id: 5");
    }
}
