//! Comment service - validates input, persists through a `ContentStore` and
//! forwards saved comments to the subscription broker
use crate::domain::models::{Comment, NewComment, NewPost, Post, PostId, UserId};
use crate::error::{ServiceError, ServiceResult};
use crate::config::Config;
use crate::repository::{connect_store, ContentStore};
use crate::subscription::{CommentEvents, SubscriptionBroker, SubscriptionId};
use std::sync::Arc;
use validator::Validate;

pub const DEFAULT_LIMIT: i64 = 10;
pub const DEFAULT_OFFSET: i64 = 0;

/// Parse a text-encoded identifier
pub fn parse_id(raw: &str) -> ServiceResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ServiceError::InvalidInput(format!("invalid id: '{}'", raw)))
}

pub struct CommentService {
    store: Arc<dyn ContentStore>,
    broker: SubscriptionBroker,
}

impl CommentService {
    pub fn new(store: Arc<dyn ContentStore>, broker: SubscriptionBroker) -> Self {
        Self { store, broker }
    }

    /// Open the configured store and build a broker from the subscription settings
    pub async fn from_config(config: &Config) -> ServiceResult<Self> {
        let store = connect_store(&config.storage).await?;
        Ok(Self::new(
            store,
            SubscriptionBroker::from_config(&config.subscriptions),
        ))
    }

    pub fn broker(&self) -> &SubscriptionBroker {
        &self.broker
    }

    /// Create a new post; returns the stored record
    pub async fn create_post(&self, input: NewPost) -> ServiceResult<Post> {
        input.validate()?;
        let post_id = self.store.create_post(&input.text, input.user_id).await?;
        Ok(self.store.get_post(post_id).await?)
    }

    pub async fn post(&self, post_id: PostId) -> ServiceResult<Post> {
        Ok(self.store.get_post(post_id).await?)
    }

    pub async fn posts(&self) -> ServiceResult<Vec<Post>> {
        Ok(self.store.list_posts().await?)
    }

    pub async fn disable_comments(&self, user_id: UserId, post_id: PostId) -> ServiceResult<()> {
        self.store.disable_comments(user_id, post_id).await?;
        tracing::info!(post_id, user_id, "comments turned off");
        Ok(())
    }

    /// Save a comment, then broadcast it to the post's subscribers.
    ///
    /// The broadcast happens only after the store call has returned, so
    /// subscribers never see a comment that was not persisted.
    pub async fn add_comment(&self, input: NewComment) -> ServiceResult<Comment> {
        input.validate()?;

        let comment = self
            .store
            .save_comment(
                &input.text,
                input.user_id,
                input.post_id,
                input.parent_comment_id,
            )
            .await?;

        let report = self.broker.broadcast(comment.post_id, &comment).await;
        tracing::debug!(
            comment_id = comment.id,
            post_id = comment.post_id,
            delivered = report.delivered,
            dropped = report.dropped,
            "comment broadcast"
        );

        Ok(comment)
    }

    /// Page through a post's comments; `limit`/`offset` default to 10/0
    pub async fn comments(
        &self,
        post_id: PostId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ServiceResult<Vec<Comment>> {
        let limit = non_negative("limit", limit.unwrap_or(DEFAULT_LIMIT))?;
        let offset = non_negative("offset", offset.unwrap_or(DEFAULT_OFFSET))?;

        Ok(self.store.list_comments(post_id, limit, offset).await?)
    }

    pub async fn comment(&self, comment_id: i64) -> ServiceResult<Comment> {
        Ok(self.store.comment_by_id(comment_id).await?)
    }

    pub async fn subscribe(&self, post_ids: Vec<PostId>) -> (SubscriptionId, CommentEvents) {
        self.broker.subscribe(post_ids).await
    }

    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) -> bool {
        self.broker.unsubscribe(subscription_id).await
    }
}

fn non_negative(name: &str, value: i64) -> ServiceResult<usize> {
    usize::try_from(value)
        .map_err(|_| ServiceError::InvalidInput(format!("{} must not be negative", name)))
}
