use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Post identifier, assigned by the store in creation order
pub type PostId = i64;

/// Comment identifier, assigned by the store in creation order
pub type CommentId = i64;

/// Identifier of an already authenticated user
pub type UserId = i64;

/// Maximum comment length in characters
pub const MAX_COMMENT_CHARS: u64 = 2000;

/// Post entity - the anchor every comment thread hangs off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: PostId,
    pub text: String,
    pub user_id: UserId,
    /// One-way flag, only ever flipped by `disable_comments`
    pub comments_disabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Comment entity - a node in a post's comment tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: CommentId,
    pub text: String,
    pub user_id: UserId,
    pub post_id: PostId,
    pub parent_comment_id: Option<CommentId>,
    /// Materialized path; see `domain::rank`
    pub rank: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_root(&self) -> bool {
        self.parent_comment_id.is_none()
    }
}

/// Input for creating a post
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPost {
    #[validate(length(min = 1, message = "text value should not be empty"))]
    pub text: String,
    pub user_id: UserId,
}

/// Input for creating a comment
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewComment {
    #[validate(length(
        min = 1,
        max = MAX_COMMENT_CHARS,
        message = "comment text should be between 1 and 2000 characters"
    ))]
    pub text: String,
    pub user_id: UserId,
    pub post_id: PostId,
    pub parent_comment_id: Option<CommentId>,
}
