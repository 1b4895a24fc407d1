use crate::config::SubscriptionConfig;
use crate::domain::models::{Comment, PostId};
use crate::metrics::{
    FANOUT_DELIVERED_TOTAL, FANOUT_DISCONNECTED_TOTAL, FANOUT_DROPPED_TOTAL, SUBSCRIPTIONS_ACTIVE,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

/// Unique identifier of a live comment subscription
pub type SubscriptionId = i64;

const DEFAULT_BUFFER_CAPACITY: usize = 64;

/// What `broadcast` does when a subscriber's buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the comment for that subscriber only
    #[default]
    DropNewest,
    /// Remove the slow subscriber; its stream ends after the buffered comments
    Disconnect,
}

impl OverflowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowPolicy::DropNewest => "drop_newest",
            OverflowPolicy::Disconnect => "disconnect",
        }
    }
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop_newest" | "drop" => Ok(OverflowPolicy::DropNewest),
            "disconnect" => Ok(OverflowPolicy::Disconnect),
            other => Err(format!("unknown overflow policy '{}'", other)),
        }
    }
}

/// Outcome of a single `broadcast`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the comment was buffered for
    pub delivered: usize,
    /// Subscribers whose buffer was full
    pub dropped: usize,
    /// Subscribers removed during this broadcast (slow or closed)
    pub disconnected: usize,
}

/// Consumer side of a subscription
///
/// Yields comments for the watched posts in broadcast order. Ends once the
/// subscription is removed and the buffered comments are drained. Dropping
/// the handle unsubscribes.
pub struct CommentEvents {
    id: SubscriptionId,
    receiver: mpsc::Receiver<Comment>,
    registry: Weak<RwLock<Registry>>,
}

impl std::fmt::Debug for CommentEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentEvents").field("id", &self.id).finish()
    }
}

impl Drop for CommentEvents {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let subscription_id = self.id;

        if let Ok(mut guard) = registry.try_write() {
            guard.remove(subscription_id);
            return;
        }

        // Registry busy: finish the removal on the runtime. Without one, the
        // next broadcast on a watched post prunes the closed sender.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.write().await.remove(subscription_id);
            });
        }
    }
}

impl CommentEvents {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next comment; `None` once the subscription is gone
    pub async fn recv(&mut self) -> Option<Comment> {
        self.receiver.recv().await
    }

    /// Take a buffered comment without waiting
    pub fn try_recv(&mut self) -> Option<Comment> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for CommentEvents {
    type Item = Comment;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Comment>> {
        self.receiver.poll_recv(cx)
    }
}

/// Subscriber entry with watched posts and channel
struct Subscriber {
    posts: Vec<PostId>,
    sender: mpsc::Sender<Comment>,
}

struct Registry {
    next_id: SubscriptionId,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    // post_id -> subscription ids watching it
    post_observers: HashMap<PostId, HashSet<SubscriptionId>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            next_id: 1,
            subscribers: HashMap::new(),
            post_observers: HashMap::new(),
        }
    }

    /// Drop a subscriber and every index entry pointing at it
    fn remove(&mut self, subscription_id: SubscriptionId) -> bool {
        let Some(subscriber) = self.subscribers.remove(&subscription_id) else {
            return false;
        };

        for post_id in &subscriber.posts {
            if let Some(observers) = self.post_observers.get_mut(post_id) {
                observers.remove(&subscription_id);
                if observers.is_empty() {
                    self.post_observers.remove(post_id);
                }
            }
        }

        SUBSCRIPTIONS_ACTIVE.dec();
        true
    }
}

/// Fans newly saved comments out to subscribers watching their post
///
/// Every subscriber owns a bounded buffer; `broadcast` never waits for a
/// consumer. A full buffer is handled per `OverflowPolicy`.
#[derive(Clone)]
pub struct SubscriptionBroker {
    inner: Arc<RwLock<Registry>>,
    buffer_capacity: usize,
    overflow_policy: OverflowPolicy,
}

impl SubscriptionBroker {
    pub fn new(buffer_capacity: usize, overflow_policy: OverflowPolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Registry::new())),
            // mpsc::channel panics on zero capacity
            buffer_capacity: buffer_capacity.max(1),
            overflow_policy,
        }
    }

    pub fn from_config(config: &SubscriptionConfig) -> Self {
        Self::new(config.buffer_capacity, config.overflow_policy)
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow_policy
    }

    /// Register interest in a set of posts
    ///
    /// Duplicate post ids are collapsed, so each comment reaches the
    /// subscription at most once per broadcast.
    pub async fn subscribe<I>(&self, post_ids: I) -> (SubscriptionId, CommentEvents)
    where
        I: IntoIterator<Item = PostId>,
    {
        let posts: BTreeSet<PostId> = post_ids.into_iter().collect();
        let (sender, receiver) = mpsc::channel(self.buffer_capacity);

        let mut guard = self.inner.write().await;
        let id = guard.next_id;
        guard.next_id += 1;

        for post_id in &posts {
            guard.post_observers.entry(*post_id).or_default().insert(id);
        }
        guard.subscribers.insert(
            id,
            Subscriber {
                posts: posts.into_iter().collect(),
                sender,
            },
        );
        SUBSCRIPTIONS_ACTIVE.inc();

        tracing::debug!(
            subscription_id = id,
            watched_posts = guard.subscribers.get(&id).map(|s| s.posts.len()).unwrap_or(0),
            total_subscriptions = guard.subscribers.len(),
            "subscription added"
        );

        let events = CommentEvents {
            id,
            receiver,
            registry: Arc::downgrade(&self.inner),
        };
        (id, events)
    }

    /// Remove a subscription from every post it watches
    ///
    /// Once this returns no later broadcast reaches the subscription. Returns
    /// false if the id was unknown (already removed or never issued).
    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) -> bool {
        let mut guard = self.inner.write().await;
        let removed = guard.remove(subscription_id);

        if removed {
            tracing::debug!(
                subscription_id,
                remaining = guard.subscribers.len(),
                watched_posts = guard.post_observers.len(),
                "subscription removed"
            );
        }
        removed
    }

    /// Deliver a comment to every subscription watching `post_id`
    ///
    /// Uses `try_send` only: a full or abandoned subscriber never delays the
    /// others or the caller.
    pub async fn broadcast(&self, post_id: PostId, comment: &Comment) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut evicted: Vec<(SubscriptionId, &'static str)> = Vec::new();

        {
            let guard = self.inner.read().await;
            let Some(observers) = guard.post_observers.get(&post_id) else {
                return report;
            };

            for subscription_id in observers {
                let Some(subscriber) = guard.subscribers.get(subscription_id) else {
                    continue;
                };

                match subscriber.sender.try_send(comment.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        report.dropped += 1;
                        FANOUT_DROPPED_TOTAL
                            .with_label_values(&[self.overflow_policy.as_str()])
                            .inc();
                        tracing::warn!(
                            subscription_id = *subscription_id,
                            post_id,
                            comment_id = comment.id,
                            policy = self.overflow_policy.as_str(),
                            "subscriber buffer full"
                        );
                        if self.overflow_policy == OverflowPolicy::Disconnect {
                            evicted.push((*subscription_id, "slow"));
                        }
                    }
                    Err(TrySendError::Closed(_)) => evicted.push((*subscription_id, "closed")),
                }
            }
        }

        FANOUT_DELIVERED_TOTAL.inc_by(report.delivered as u64);

        if !evicted.is_empty() {
            let mut guard = self.inner.write().await;
            for (subscription_id, reason) in evicted {
                if guard.remove(subscription_id) {
                    report.disconnected += 1;
                    FANOUT_DISCONNECTED_TOTAL.with_label_values(&[reason]).inc();
                    tracing::warn!(subscription_id, reason, "subscriber disconnected by broker");
                }
            }
        }

        report
    }

    /// Subscriptions currently watching a post (for debugging/metrics)
    pub async fn subscriber_count(&self, post_id: PostId) -> usize {
        let guard = self.inner.read().await;
        guard.post_observers.get(&post_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Posts with at least one subscription
    pub async fn watched_post_count(&self) -> usize {
        self.inner.read().await.post_observers.len()
    }

    pub async fn subscription_count(&self) -> usize {
        self.inner.read().await.subscribers.len()
    }
}

impl Default for SubscriptionBroker {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, OverflowPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use std::time::Duration;

    fn comment(id: i64, post_id: PostId) -> Comment {
        Comment {
            id,
            text: format!("comment {}", id),
            user_id: 1,
            post_id,
            parent_comment_id: None,
            rank: crate::domain::rank::encode("", id).unwrap(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber_once() {
        let broker = SubscriptionBroker::default();
        let (_, mut events) = broker.subscribe([1, 1, 2]).await;

        let report = broker.broadcast(1, &comment(10, 1)).await;
        assert_eq!(report.delivered, 1);

        assert_eq!(events.recv().await.map(|c| c.id), Some(10));
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_noop() {
        let broker = SubscriptionBroker::default();
        let report = broker.broadcast(7, &comment(1, 7)).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_only_watchers_of_the_post_receive() {
        let broker = SubscriptionBroker::default();
        let (_, mut watcher) = broker.subscribe([1]).await;
        let (_, mut other) = broker.subscribe([2]).await;

        broker.broadcast(1, &comment(5, 1)).await;

        assert_eq!(watcher.recv().await.map(|c| c.id), Some(5));
        let waited = tokio::time::timeout(Duration::from_millis(10), other.recv()).await;
        assert!(waited.is_err(), "subscriber of post 2 should not receive");
    }

    #[tokio::test]
    async fn test_unsubscribe_cleans_index_and_ends_stream() {
        let broker = SubscriptionBroker::default();
        let (id, mut events) = broker.subscribe([1, 2]).await;
        assert_eq!(broker.watched_post_count().await, 2);

        assert!(broker.unsubscribe(id).await);
        assert!(!broker.unsubscribe(id).await);
        assert_eq!(broker.watched_post_count().await, 0);
        assert_eq!(broker.subscription_count().await, 0);

        let report = broker.broadcast(1, &comment(3, 1)).await;
        assert_eq!(report.delivered, 0);
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_keeps_other_watchers() {
        let broker = SubscriptionBroker::default();
        let (first, _first_events) = broker.subscribe([1]).await;
        let (_, mut second_events) = broker.subscribe([1]).await;

        broker.unsubscribe(first).await;
        assert_eq!(broker.subscriber_count(1).await, 1);

        broker.broadcast(1, &comment(8, 1)).await;
        assert_eq!(second_events.recv().await.map(|c| c.id), Some(8));
    }

    #[tokio::test]
    async fn test_drop_newest_when_buffer_full() {
        let broker = SubscriptionBroker::new(1, OverflowPolicy::DropNewest);
        let (_, mut slow) = broker.subscribe([1]).await;
        let (_, mut fast) = broker.subscribe([1]).await;

        broker.broadcast(1, &comment(1, 1)).await;
        assert_eq!(fast.recv().await.map(|c| c.id), Some(1));

        let report = broker.broadcast(1, &comment(2, 1)).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.disconnected, 0);

        assert_eq!(fast.recv().await.map(|c| c.id), Some(2));
        // the slow subscriber keeps the older comment and stays registered
        assert_eq!(slow.recv().await.map(|c| c.id), Some(1));
        assert_eq!(broker.subscriber_count(1).await, 2);
    }

    #[tokio::test]
    async fn test_disconnect_slow_subscriber() {
        let broker = SubscriptionBroker::new(1, OverflowPolicy::Disconnect);
        let (_, mut slow) = broker.subscribe([1]).await;

        broker.broadcast(1, &comment(1, 1)).await;
        let report = broker.broadcast(1, &comment(2, 1)).await;
        assert_eq!(report.dropped, 1);
        assert_eq!(report.disconnected, 1);
        assert_eq!(broker.watched_post_count().await, 0);

        assert_eq!(slow.recv().await.map(|c| c.id), Some(1));
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_handles_leave_no_entries() {
        let broker = SubscriptionBroker::default();
        let (_, kept) = broker.subscribe([1]).await;

        for post_id in 0..1000 {
            let (_, events) = broker.subscribe([post_id, 5_000]).await;
            drop(events);
        }

        assert_eq!(broker.subscription_count().await, 1);
        assert_eq!(broker.watched_post_count().await, 1);
        assert_eq!(broker.subscriber_count(5_000).await, 0);

        drop(kept);
        assert_eq!(broker.watched_post_count().await, 0);
        assert_eq!(broker.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_drop_while_registry_busy_removes_later() {
        let broker = SubscriptionBroker::default();
        let (_, events) = broker.subscribe([4]).await;

        {
            let _busy = broker.inner.read().await;
            drop(events);
        }
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while broker.watched_post_count().await != 0 {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(drained.is_ok(), "deferred removal should run");
        let report = broker.broadcast(4, &comment(1, 4)).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_unsubscribe_then_drop_is_harmless() {
        let broker = SubscriptionBroker::default();
        let (id, events) = broker.subscribe([2]).await;
        let (_, mut other) = broker.subscribe([2]).await;

        assert!(broker.unsubscribe(id).await);
        drop(events);

        assert_eq!(broker.subscriber_count(2).await, 1);
        broker.broadcast(2, &comment(9, 2)).await;
        assert_eq!(other.recv().await.map(|c| c.id), Some(9));
    }

    #[tokio::test]
    async fn test_events_stream_in_broadcast_order() {
        let broker = SubscriptionBroker::default();
        let (_, events) = broker.subscribe([1]).await;

        for id in 1..=3 {
            broker.broadcast(1, &comment(id, 1)).await;
        }

        let ids: Vec<i64> = events.take(3).map(|c| c.id).collect().await;
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_overflow_policy_parsing() {
        assert_eq!(
            "disconnect".parse::<OverflowPolicy>(),
            Ok(OverflowPolicy::Disconnect)
        );
        assert_eq!(
            "DROP_NEWEST".parse::<OverflowPolicy>(),
            Ok(OverflowPolicy::DropNewest)
        );
        assert!("drop_oldest".parse::<OverflowPolicy>().is_err());
    }
}
