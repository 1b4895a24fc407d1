//! Post and comment storage
//!
//! Post records and comment records live behind one `ContentStore` object per
//! backend. Saving a comment reads the post's disabled flag and inserts the
//! comment in the same critical section that `disable_comments` uses to flip
//! the flag, so the two operations serialize per post.
use crate::config::{StorageBackend, StorageConfig};
use crate::domain::models::{Comment, CommentId, Post, PostId, UserId};
use crate::error::{ServiceResult, StoreError, StoreResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Storage operations for posts and their comment trees
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Create a post with comments enabled and return its id
    async fn create_post(&self, text: &str, user_id: UserId) -> StoreResult<PostId>;

    async fn get_post(&self, post_id: PostId) -> StoreResult<Post>;

    /// All posts in insertion order
    async fn list_posts(&self) -> StoreResult<Vec<Post>>;

    /// Turn comments off. Only the owner may do this, and only once.
    async fn disable_comments(&self, user_id: UserId, post_id: PostId) -> StoreResult<()>;

    /// Persist a comment and return it with its id and rank assigned.
    ///
    /// Post existence and the disabled flag are checked before the parent.
    async fn save_comment(
        &self,
        text: &str,
        user_id: UserId,
        post_id: PostId,
        parent_comment_id: Option<CommentId>,
    ) -> StoreResult<Comment>;

    /// Comments of a post in rank order, `offset` skipped, at most `limit`
    async fn list_comments(
        &self,
        post_id: PostId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Comment>>;

    async fn comment_by_id(&self, comment_id: CommentId) -> StoreResult<Comment>;
}

/// Open the backend selected by `config.backend`
pub async fn connect_store(config: &StorageConfig) -> ServiceResult<Arc<dyn ContentStore>> {
    let store: Arc<dyn ContentStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::from_config(config)),
        StorageBackend::Postgres => Arc::new(PostgresStore::connect(config).await?),
    };

    tracing::info!(backend = ?config.backend, "content store opened");
    Ok(store)
}

/// Run a store operation under the store's deadline.
///
/// The future is dropped when the deadline passes; backends only mutate state
/// at points where dropping is safe (synchronous critical sections or
/// uncommitted transactions).
pub(crate) async fn with_deadline<F, T>(
    timeout: Duration,
    op: &'static str,
    future: F,
) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                op,
                timeout_ms = timeout.as_millis() as u64,
                "store operation timed out"
            );
            Err(StoreError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_store_memory_backend() {
        let config = StorageConfig {
            query_timeout_ms: 500,
            ..StorageConfig::default()
        };
        let store = connect_store(&config).await.unwrap();

        let post_id = store.create_post("post", 1).await.unwrap();
        assert_eq!(store.get_post(post_id).await.unwrap().user_id, 1);
    }

    #[tokio::test]
    async fn test_connect_store_postgres_requires_database_config() {
        let config = StorageConfig {
            backend: StorageBackend::Postgres,
            ..StorageConfig::default()
        };

        let result = connect_store(&config).await;
        assert!(matches!(
            result,
            Err(crate::error::ServiceError::Database(sqlx::Error::Configuration(_)))
        ));
    }

    #[tokio::test]
    async fn test_with_deadline_passes_result_through() {
        let result = with_deadline(Duration::from_secs(1), "test", async {
            Ok::<_, StoreError>(42)
        })
        .await;
        assert_eq!(result, Ok(42));

        let result: StoreResult<()> = with_deadline(Duration::from_secs(1), "test", async {
            Err(StoreError::PostNotFound(9))
        })
        .await;
        assert_eq!(result, Err(StoreError::PostNotFound(9)));
    }

    #[tokio::test]
    async fn test_with_deadline_elapsed() {
        let result: StoreResult<()> = with_deadline(Duration::from_millis(10), "test", async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;

        assert_eq!(result, Err(StoreError::Timeout(Duration::from_millis(10))));
    }
}
