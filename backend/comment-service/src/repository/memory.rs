//! In-process content store
//!
//! Posts, comments and both ordering indexes sit under a single `RwLock`: a
//! comment insert and a concurrent `disable_comments` on the same post must
//! not interleave, so the two entity kinds share one lock.
use super::{with_deadline, ContentStore};
use crate::config::StorageConfig;
use crate::domain::models::{Comment, CommentId, Post, PostId, UserId};
use crate::domain::rank;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

pub struct MemoryStore {
    state: RwLock<StoreState>,
    query_timeout: Duration,
}

struct StoreState {
    next_post_id: PostId,
    next_comment_id: CommentId,
    posts: HashMap<PostId, Post>,
    // insertion order of `posts`
    post_order: Vec<PostId>,
    comments: HashMap<CommentId, Comment>,
    // post_id -> rank -> comment_id
    ranked_comments: HashMap<PostId, BTreeMap<String, CommentId>>,
}

impl StoreState {
    fn new() -> Self {
        Self {
            next_post_id: 1,
            next_comment_id: 1,
            posts: HashMap::new(),
            post_order: Vec::new(),
            comments: HashMap::new(),
            ranked_comments: HashMap::new(),
        }
    }

    fn insert_post(&mut self, text: &str, user_id: UserId) -> PostId {
        let id = self.next_post_id;
        self.next_post_id += 1;

        self.posts.insert(
            id,
            Post {
                id,
                text: text.to_string(),
                user_id,
                comments_disabled: false,
                created_at: Utc::now(),
            },
        );
        self.post_order.push(id);
        id
    }

    fn disable_comments(&mut self, user_id: UserId, post_id: PostId) -> StoreResult<()> {
        let post = self
            .posts
            .get_mut(&post_id)
            .ok_or(StoreError::PostNotFound(post_id))?;

        if post.user_id != user_id {
            return Err(StoreError::AccessDenied {
                post_id,
                owner_id: post.user_id,
            });
        }
        if post.comments_disabled {
            return Err(StoreError::AlreadyDisabled(post_id));
        }

        post.comments_disabled = true;
        Ok(())
    }

    fn insert_comment(
        &mut self,
        text: &str,
        user_id: UserId,
        post_id: PostId,
        parent_comment_id: Option<CommentId>,
    ) -> StoreResult<Comment> {
        let post = self
            .posts
            .get(&post_id)
            .ok_or(StoreError::PostNotFound(post_id))?;
        if post.comments_disabled {
            return Err(StoreError::PostCommentsDisabled(post_id));
        }

        let parent_rank = match parent_comment_id {
            Some(parent_id) => {
                let parent =
                    self.comments
                        .get(&parent_id)
                        .ok_or(StoreError::InvalidParentCommentId {
                            post_id,
                            parent_comment_id: parent_id,
                        })?;
                if parent.post_id != post_id {
                    return Err(StoreError::ParentBelongsAnotherPost {
                        post_id,
                        parent_post_id: parent.post_id,
                    });
                }
                parent.rank.clone()
            }
            None => String::new(),
        };

        let id = self.next_comment_id;
        let rank = rank::encode(&parent_rank, id).ok_or(StoreError::Internal)?;
        self.next_comment_id += 1;

        let comment = Comment {
            id,
            text: text.to_string(),
            user_id,
            post_id,
            parent_comment_id,
            rank: rank.clone(),
            created_at: Utc::now(),
        };

        self.ranked_comments
            .entry(post_id)
            .or_default()
            .insert(rank, id);
        self.comments.insert(id, comment.clone());

        Ok(comment)
    }

    fn page(&self, post_id: PostId, limit: usize, offset: usize) -> Vec<Comment> {
        let Some(index) = self.ranked_comments.get(&post_id) else {
            return Vec::new();
        };

        index
            .values()
            .skip(offset)
            .take(limit)
            .filter_map(|id| self.comments.get(id).cloned())
            .collect()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_query_timeout(DEFAULT_QUERY_TIMEOUT)
    }

    pub fn with_query_timeout(query_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(StoreState::new()),
            query_timeout,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::with_query_timeout(config.query_timeout())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn create_post(&self, text: &str, user_id: UserId) -> StoreResult<PostId> {
        with_deadline(self.query_timeout, "create_post", async {
            let mut state = self.state.write().await;
            let id = state.insert_post(text, user_id);
            debug!(post_id = id, user_id, "post created");
            Ok(id)
        })
        .await
    }

    async fn get_post(&self, post_id: PostId) -> StoreResult<Post> {
        with_deadline(self.query_timeout, "get_post", async {
            let state = self.state.read().await;
            state
                .posts
                .get(&post_id)
                .cloned()
                .ok_or(StoreError::PostNotFound(post_id))
        })
        .await
    }

    async fn list_posts(&self) -> StoreResult<Vec<Post>> {
        with_deadline(self.query_timeout, "list_posts", async {
            let state = self.state.read().await;
            Ok(state
                .post_order
                .iter()
                .filter_map(|id| state.posts.get(id).cloned())
                .collect())
        })
        .await
    }

    async fn disable_comments(&self, user_id: UserId, post_id: PostId) -> StoreResult<()> {
        with_deadline(self.query_timeout, "disable_comments", async {
            let mut state = self.state.write().await;
            state.disable_comments(user_id, post_id)?;
            debug!(post_id, user_id, "comments disabled");
            Ok(())
        })
        .await
    }

    async fn save_comment(
        &self,
        text: &str,
        user_id: UserId,
        post_id: PostId,
        parent_comment_id: Option<CommentId>,
    ) -> StoreResult<Comment> {
        with_deadline(self.query_timeout, "save_comment", async {
            let mut state = self.state.write().await;
            let comment = state.insert_comment(text, user_id, post_id, parent_comment_id)?;
            debug!(
                comment_id = comment.id,
                post_id,
                parent_comment_id = ?parent_comment_id,
                "comment saved"
            );
            Ok(comment)
        })
        .await
    }

    async fn list_comments(
        &self,
        post_id: PostId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Comment>> {
        with_deadline(self.query_timeout, "list_comments", async {
            let state = self.state.read().await;
            Ok(state.page(post_id, limit, offset))
        })
        .await
    }

    async fn comment_by_id(&self, comment_id: CommentId) -> StoreResult<Comment> {
        with_deadline(self.query_timeout, "comment_by_id", async {
            let state = self.state.read().await;
            state
                .comments
                .get(&comment_id)
                .cloned()
                .ok_or(StoreError::CommentNotFound(comment_id))
        })
        .await
    }
}
