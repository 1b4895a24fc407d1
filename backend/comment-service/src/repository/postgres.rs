//! PostgreSQL content store
//!
//! The check-then-act sequences of `save_comment` and `disable_comments` run
//! in one transaction each, holding `FOR UPDATE` on the post row (and on the
//! parent comment row when one is given). Dropping an operation's future
//! before commit rolls the transaction back.
use super::{with_deadline, ContentStore};
use crate::config::StorageConfig;
use crate::domain::models::{Comment, CommentId, Post, PostId, UserId};
use crate::domain::rank;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, error, info};

pub struct PostgresStore {
    pool: PgPool,
    query_timeout: Duration,
}

/// Log a backend failure and collapse it into `StoreError::Internal`
fn internal(op: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| {
        error!(op, error = %err, "database operation failed");
        StoreError::Internal
    }
}

impl PostgresStore {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    /// Create a pool from configuration and apply pending migrations
    pub async fn connect(config: &StorageConfig) -> Result<Self, sqlx::Error> {
        let db = config.database.as_ref().ok_or_else(|| {
            sqlx::Error::Configuration("database configuration is missing".into())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(db.max_connections)
            .min_connections(db.min_connections)
            .acquire_timeout(Duration::from_secs(db.acquire_timeout_secs))
            .test_before_acquire(true)
            .connect(&db.url)
            .await?;

        let store = Self::new(pool, config.query_timeout());
        store.migrate().await?;

        info!(
            max_connections = db.max_connections,
            query_timeout_ms = config.query_timeout_ms,
            "PostgreSQL content store ready"
        );
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ContentStore for PostgresStore {
    async fn create_post(&self, text: &str, user_id: UserId) -> StoreResult<PostId> {
        with_deadline(self.query_timeout, "create_post", async {
            let id: PostId = sqlx::query_scalar(
                "INSERT INTO posts (text, user_id) VALUES ($1, $2) RETURNING id",
            )
            .bind(text)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal("create_post"))?;

            debug!(post_id = id, user_id, "post created");
            Ok(id)
        })
        .await
    }

    async fn get_post(&self, post_id: PostId) -> StoreResult<Post> {
        with_deadline(self.query_timeout, "get_post", async {
            sqlx::query_as::<_, Post>(
                r#"
                SELECT id, text, user_id, comments_disabled, created_at
                FROM posts
                WHERE id = $1
                "#,
            )
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal("get_post"))?
            .ok_or(StoreError::PostNotFound(post_id))
        })
        .await
    }

    async fn list_posts(&self) -> StoreResult<Vec<Post>> {
        with_deadline(self.query_timeout, "list_posts", async {
            sqlx::query_as::<_, Post>(
                r#"
                SELECT id, text, user_id, comments_disabled, created_at
                FROM posts
                ORDER BY id ASC
                "#,
            )
            .fetch_all(&self.pool)
            .await
            .map_err(internal("list_posts"))
        })
        .await
    }

    async fn disable_comments(&self, user_id: UserId, post_id: PostId) -> StoreResult<()> {
        let tx = with_deadline(self.query_timeout, "disable_comments", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(internal("disable_comments"))?;

            let row: Option<(UserId, bool)> = sqlx::query_as(
                "SELECT user_id, comments_disabled FROM posts WHERE id = $1 FOR UPDATE",
            )
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal("disable_comments"))?;

            let (owner_id, disabled) = row.ok_or(StoreError::PostNotFound(post_id))?;
            if owner_id != user_id {
                return Err(StoreError::AccessDenied { post_id, owner_id });
            }
            if disabled {
                return Err(StoreError::AlreadyDisabled(post_id));
            }

            sqlx::query("UPDATE posts SET comments_disabled = TRUE WHERE id = $1")
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .map_err(internal("disable_comments"))?;

            Ok(tx)
        })
        .await?;

        tx.commit().await.map_err(internal("disable_comments"))?;
        debug!(post_id, user_id, "comments disabled");
        Ok(())
    }

    /// The deadline covers everything up to `COMMIT`; the commit itself is
    /// not raced against it, so `Timeout` always means nothing was persisted.
    async fn save_comment(
        &self,
        text: &str,
        user_id: UserId,
        post_id: PostId,
        parent_comment_id: Option<CommentId>,
    ) -> StoreResult<Comment> {
        let (tx, comment) = with_deadline(self.query_timeout, "save_comment", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(internal("save_comment"))?;

            let disabled: Option<bool> = sqlx::query_scalar(
                "SELECT comments_disabled FROM posts WHERE id = $1 FOR UPDATE",
            )
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal("save_comment"))?;

            match disabled {
                None => return Err(StoreError::PostNotFound(post_id)),
                Some(true) => return Err(StoreError::PostCommentsDisabled(post_id)),
                Some(false) => {}
            }

            let parent_rank = match parent_comment_id {
                Some(parent_id) => {
                    let parent: Option<(PostId, String)> = sqlx::query_as(
                        "SELECT post_id, rank FROM comments WHERE id = $1 FOR UPDATE",
                    )
                    .bind(parent_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(internal("save_comment"))?;

                    let (parent_post_id, parent_rank) =
                        parent.ok_or(StoreError::InvalidParentCommentId {
                            post_id,
                            parent_comment_id: parent_id,
                        })?;
                    if parent_post_id != post_id {
                        return Err(StoreError::ParentBelongsAnotherPost {
                            post_id,
                            parent_post_id,
                        });
                    }
                    parent_rank
                }
                None => String::new(),
            };

            // The id is part of the rank, so it is drawn before the insert
            let id: CommentId =
                sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence('comments', 'id'))")
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(internal("save_comment"))?;
            let rank = rank::encode(&parent_rank, id).ok_or(StoreError::Internal)?;

            let comment = sqlx::query_as::<_, Comment>(
                r#"
                INSERT INTO comments (id, text, user_id, post_id, parent_comment_id, rank)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id, text, user_id, post_id, parent_comment_id, rank, created_at
                "#,
            )
            .bind(id)
            .bind(text)
            .bind(user_id)
            .bind(post_id)
            .bind(parent_comment_id)
            .bind(rank)
            .fetch_one(&mut *tx)
            .await
            .map_err(internal("save_comment"))?;

            Ok((tx, comment))
        })
        .await?;

        tx.commit().await.map_err(internal("save_comment"))?;

        debug!(
            comment_id = comment.id,
            post_id,
            parent_comment_id = ?parent_comment_id,
            "comment saved"
        );
        Ok(comment)
    }

    async fn list_comments(
        &self,
        post_id: PostId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Comment>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        with_deadline(self.query_timeout, "list_comments", async {
            sqlx::query_as::<_, Comment>(
                r#"
                SELECT id, text, user_id, post_id, parent_comment_id, rank, created_at
                FROM comments
                WHERE post_id = $1
                ORDER BY rank ASC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(post_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(internal("list_comments"))
        })
        .await
    }

    async fn comment_by_id(&self, comment_id: CommentId) -> StoreResult<Comment> {
        with_deadline(self.query_timeout, "comment_by_id", async {
            sqlx::query_as::<_, Comment>(
                r#"
                SELECT id, text, user_id, post_id, parent_comment_id, rank, created_at
                FROM comments
                WHERE id = $1
                "#,
            )
            .bind(comment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal("comment_by_id"))?
            .ok_or(StoreError::CommentNotFound(comment_id))
        })
        .await
    }
}
