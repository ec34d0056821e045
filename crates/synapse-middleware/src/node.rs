//! [`Node`] – per-task bundle of bus handles with a single wait primitive.
//!
//! A control task builds its node once at startup through [`NodeBuilder`],
//! collecting the publishers and subscribers it needs.  Calling
//! [`NodeBuilder::build`] freezes the subscription set; from then on the task
//! suspends only inside [`Node::wait`], which returns as soon as any of its
//! subscriptions has unread data or the timeout expires.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use synapse_middleware::{Topic, node::{Node, WokenReason}};
//! use synapse_types::{Joy, Status};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), synapse_types::SynapseError> {
//! let joy = Topic::<Joy>::new("joy");
//! let status = Topic::<Status>::new("status");
//!
//! let mut builder = Node::builder("manual");
//! let mut sub_joy = builder.subscribe(&joy, 1);
//! let pub_status = builder.advertise(&status)?;
//! let node = builder.build();
//!
//! joy.advertise()?.publish(Joy::default());
//! match node.wait(Duration::from_millis(10)).await {
//!     WokenReason::Updated(ids) => assert_eq!(ids, vec![sub_joy.id().unwrap()]),
//!     WokenReason::TimedOut => unreachable!(),
//! }
//! let _ = sub_joy.update()?;
//! pub_status.publish(Status::default());
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::select_all;
use synapse_types::{Message, SynapseError};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tokio::time::Instant;
use tracing::debug;

use crate::bus::{Publisher, SubscriptionId, Subscriber, Topic};

/// Why [`Node::wait`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WokenReason {
    /// These subscriptions have unread data, in registration order.
    Updated(Vec<SubscriptionId>),
    /// Nothing new arrived before the timeout.
    TimedOut,
}

impl WokenReason {
    /// `true` if `id` is among the subscriptions that woke the node.
    pub fn contains(&self, id: SubscriptionId) -> bool {
        match self {
            WokenReason::Updated(ids) => ids.contains(&id),
            WokenReason::TimedOut => false,
        }
    }
}

/// Type-erased view of a topic: enough to test for and wait on new data.
trait Signal: Send + Sync {
    fn generation(&self) -> u64;
    fn notify(&self) -> &Notify;
}

impl<T: Message> Signal for Topic<T> {
    fn generation(&self) -> u64 {
        Topic::generation(self)
    }

    fn notify(&self) -> &Notify {
        Topic::notify(self)
    }
}

struct Watch {
    topic: &'static str,
    signal: Arc<dyn Signal>,
    cursor: Arc<AtomicU64>,
}

impl Watch {
    fn update_available(&self) -> bool {
        self.signal.generation() > self.cursor.load(Ordering::Acquire)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Collects a node's handles before the node starts waiting.
pub struct NodeBuilder {
    name: String,
    watches: Vec<Watch>,
    publishes: Vec<&'static str>,
}

impl NodeBuilder {
    /// Claim the publisher of `topic` for this node.
    ///
    /// # Errors
    ///
    /// [`SynapseError::AlreadyAdvertised`] if another node already publishes
    /// the topic.
    pub fn advertise<T: Message>(
        &mut self,
        topic: &Arc<Topic<T>>,
    ) -> Result<Publisher<T>, SynapseError> {
        let publisher = topic.advertise()?;
        self.publishes.push(topic.name());
        Ok(publisher)
    }

    /// Subscribe to `topic` and include it in this node's wait set.
    pub fn subscribe<T: Message>(
        &mut self,
        topic: &Arc<Topic<T>>,
        queue_depth_hint: usize,
    ) -> Subscriber<T> {
        let id = SubscriptionId(self.watches.len());
        let subscriber = topic.subscribe(queue_depth_hint).attach(id);
        self.watches.push(Watch {
            topic: topic.name(),
            signal: Arc::clone(topic) as Arc<dyn Signal>,
            cursor: subscriber.cursor(),
        });
        subscriber
    }

    /// Freeze the handle set.
    pub fn build(self) -> Node {
        debug!(
            node = %self.name,
            subscriptions = ?self.watches.iter().map(|w| w.topic).collect::<Vec<_>>(),
            publishes = ?self.publishes,
            "node initialised"
        );
        Node {
            name: self.name,
            watches: self.watches,
            publishes: self.publishes,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node
// ─────────────────────────────────────────────────────────────────────────────

/// A task's identity plus the wait set formed by its subscriptions.
pub struct Node {
    name: String,
    watches: Vec<Watch>,
    publishes: Vec<&'static str>,
}

impl Node {
    pub fn builder(name: impl Into<String>) -> NodeBuilder {
        NodeBuilder {
            name: name.into(),
            watches: Vec::new(),
            publishes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the topics this node advertised.
    pub fn publishes(&self) -> &[&'static str] {
        &self.publishes
    }

    /// Names of the subscribed topics, indexed by [`SubscriptionId`].
    pub fn subscriptions(&self) -> Vec<&'static str> {
        self.watches.iter().map(|w| w.topic).collect()
    }

    /// Subscriptions with unread data right now. Never blocks.
    pub fn pending(&self) -> Vec<SubscriptionId> {
        self.watches
            .iter()
            .enumerate()
            .filter(|(_, w)| w.update_available())
            .map(|(i, _)| SubscriptionId(i))
            .collect()
    }

    /// Block until a subscription has unread data or `timeout` elapses.
    ///
    /// Returns immediately when data is already pending.  A node without
    /// subscriptions simply sleeps for `timeout`.  Cancelling the returned
    /// future loses nothing: the cursors are only moved by
    /// [`Subscriber::update`].
    pub async fn wait(&self, timeout: Duration) -> WokenReason {
        let deadline = Instant::now() + timeout;
        if self.watches.is_empty() {
            tokio::time::sleep_until(deadline).await;
            return WokenReason::TimedOut;
        }

        loop {
            // Register interest before checking, so a publish landing between
            // the check and the await still wakes us.
            let mut notified: Vec<Pin<Box<Notified<'_>>>> = self
                .watches
                .iter()
                .map(|w| Box::pin(w.signal.notify().notified()))
                .collect();
            for n in &mut notified {
                n.as_mut().enable();
            }

            let ready = self.pending();
            if !ready.is_empty() {
                return WokenReason::Updated(ready);
            }

            if tokio::time::timeout_at(deadline, select_all(notified))
                .await
                .is_err()
            {
                return WokenReason::TimedOut;
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("subscriptions", &self.subscriptions())
            .field("publishes", &self.publishes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_types::{Imu, Joy, Status};

    #[tokio::test]
    async fn wait_times_out_without_publish() {
        let joy = Topic::<Joy>::new("joy");
        let mut builder = Node::builder("idle");
        let _sub = builder.subscribe(&joy, 1);
        let node = builder.build();

        let reason = node.wait(Duration::from_millis(20)).await;
        assert_eq!(reason, WokenReason::TimedOut);
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_data_pending() {
        let joy = Topic::<Joy>::new("joy");
        let publisher = joy.advertise().unwrap();
        let mut builder = Node::builder("manual");
        let sub = builder.subscribe(&joy, 1);
        let node = builder.build();

        publisher.publish(Joy::default());
        let reason = node.wait(Duration::from_secs(5)).await;
        assert_eq!(reason, WokenReason::Updated(vec![sub.id().unwrap()]));
    }

    #[tokio::test]
    async fn wait_is_woken_by_publish_from_another_task() {
        let joy = Topic::<Joy>::new("joy");
        let status = Topic::<Status>::new("status");
        let mut builder = Node::builder("mixer");
        let _sub_joy = builder.subscribe(&joy, 1);
        let sub_status = builder.subscribe(&status, 1);
        let node = builder.build();

        let publisher = status.advertise().unwrap();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(Status::default());
        });

        let reason = node.wait(Duration::from_secs(5)).await;
        assert_eq!(reason, WokenReason::Updated(vec![sub_status.id().unwrap()]));
        assert!(!reason.contains(SubscriptionId(0)));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn update_clears_pending_state() {
        let imu = Topic::<Imu>::new("imu");
        let publisher = imu.advertise().unwrap();
        let mut builder = Node::builder("estimator");
        let mut sub = builder.subscribe(&imu, 1);
        let node = builder.build();

        publisher.publish(Imu::default());
        assert_eq!(node.pending(), vec![SubscriptionId(0)]);

        sub.update().unwrap();
        assert!(node.pending().is_empty());
        assert_eq!(node.wait(Duration::from_millis(10)).await, WokenReason::TimedOut);
    }

    #[tokio::test]
    async fn clones_do_not_affect_node_pending_state() {
        let joy = Topic::<Joy>::new("joy");
        let publisher = joy.advertise().unwrap();
        let mut builder = Node::builder("manual");
        let sub = builder.subscribe(&joy, 1);
        let node = builder.build();

        publisher.publish(Joy::default());
        let mut copy = sub.clone();
        copy.update().unwrap();
        assert_eq!(node.pending(), vec![SubscriptionId(0)]);
    }

    #[tokio::test]
    async fn node_without_subscriptions_times_out() {
        let node = Node::builder("empty").build();
        assert_eq!(node.wait(Duration::from_millis(5)).await, WokenReason::TimedOut);
    }

    #[test]
    fn advertise_through_builder_records_topic() {
        let status = Topic::<Status>::new("status");
        let mut builder = Node::builder("status");
        let _pub = builder.advertise(&status).unwrap();
        assert!(builder.advertise(&status).is_err());
        let node = builder.build();
        assert_eq!(node.publishes(), &["status"]);
        assert_eq!(node.name(), "status");
    }
}
