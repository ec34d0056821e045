//! Latest-value topic bus.
//!
//! A [`Topic`] is a named slot holding the most recent value of one message
//! type.  Publishing overwrites the slot and bumps a generation counter;
//! nothing is queued.  Readers hold a [`Subscriber`] with a private cursor
//! (the last generation they consumed) and decide for themselves when to copy
//! the current value out.
//!
//! | Handle | Capability | Copyable |
//! |---|---|---|
//! | [`Publisher`] | overwrite the slot | no, one per topic |
//! | [`Subscriber`] | observe / copy the slot | yes, each copy has its own cursor |
//!
//! The slot lock is held only for the duration of a clone, so a slow reader
//! never delays a writer by more than one copy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use synapse_types::{Message, MessageKind, SynapseError};
use tokio::sync::Notify;

struct Slot<T> {
    value: T,
    generation: u64,
}

/// Named latest-value slot for messages of type `T`.
///
/// Topics are created once at startup (see
/// [`Topics`][crate::registry::Topics]) and shared by `Arc` between the tasks
/// that publish and subscribe to them.
pub struct Topic<T: Message> {
    name: &'static str,
    slot: RwLock<Slot<T>>,
    /// Mirror of `slot.generation` so that availability checks stay lock-free.
    generation: AtomicU64,
    notify: Notify,
    advertised: AtomicBool,
}

impl<T: Message> Topic<T> {
    /// Create a topic holding `T::default()` at generation 0.
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            slot: RwLock::new(Slot {
                value: T::default(),
                generation: 0,
            }),
            generation: AtomicU64::new(0),
            notify: Notify::new(),
            advertised: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Message kind (wire type tag) carried by this topic.
    pub fn kind(&self) -> MessageKind {
        T::KIND
    }

    /// Number of publishes since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Claim the single write capability for this topic.
    ///
    /// # Errors
    ///
    /// [`SynapseError::AlreadyAdvertised`] while another [`Publisher`] for
    /// this topic is alive.
    pub fn advertise(self: &Arc<Self>) -> Result<Publisher<T>, SynapseError> {
        if self
            .advertised
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SynapseError::AlreadyAdvertised {
                topic: self.name.to_string(),
            });
        }
        Ok(Publisher {
            topic: Arc::clone(self),
        })
    }

    /// Create a subscriber whose cursor starts at generation 0.
    ///
    /// `queue_depth_hint` is advisory: the topic never stores more than the
    /// latest value.  A hint of zero is treated as one.
    pub fn subscribe(self: &Arc<Self>, queue_depth_hint: usize) -> Subscriber<T> {
        Subscriber {
            topic: Arc::clone(self),
            cursor: Arc::new(AtomicU64::new(0)),
            queue_depth_hint: queue_depth_hint.max(1),
            id: None,
        }
    }

    pub(crate) fn notify(&self) -> &Notify {
        &self.notify
    }

    fn publish(&self, value: T) {
        let old = {
            let mut slot = self.slot.write();
            let old = std::mem::replace(&mut slot.value, value);
            slot.generation += 1;
            self.generation.store(slot.generation, Ordering::Release);
            old
        };
        self.notify.notify_waiters();
        // Freeing the previous value's buffers happens outside the lock.
        drop(old);
    }

    /// Copy the value and the generation it belongs to under one read lock.
    fn read(&self) -> (T, u64) {
        let slot = self.slot.read();
        (slot.value.clone(), slot.generation)
    }
}

impl<T: Message> std::fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("kind", &T::KIND)
            .field("generation", &self.generation())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Publisher
// ─────────────────────────────────────────────────────────────────────────────

/// Unique write capability for one topic.
///
/// Not `Clone`: at most one publisher per topic exists at a time.  Dropping
/// it releases the claim so the topic can be advertised again.
pub struct Publisher<T: Message> {
    topic: Arc<Topic<T>>,
}

impl<T: Message> Publisher<T> {
    /// Overwrite the topic's value and wake every task waiting on it.
    pub fn publish(&self, value: T) {
        self.topic.publish(value);
    }

    pub fn topic(&self) -> &Arc<Topic<T>> {
        &self.topic
    }
}

impl<T: Message> Drop for Publisher<T> {
    fn drop(&mut self) {
        self.topic.advertised.store(false, Ordering::Release);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscriber
// ─────────────────────────────────────────────────────────────────────────────

/// Position of a subscriber inside its [`Node`][crate::node::Node].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub usize);

/// Read capability for one topic with a private last-seen cursor.
pub struct Subscriber<T: Message> {
    topic: Arc<Topic<T>>,
    /// Shared with the owning node so `Node::wait` can see our position.
    cursor: Arc<AtomicU64>,
    queue_depth_hint: usize,
    id: Option<SubscriptionId>,
}

impl<T: Message> Subscriber<T> {
    /// `true` when the topic has been published since our last [`update`].
    ///
    /// [`update`]: Subscriber::update
    pub fn update_available(&self) -> bool {
        self.topic.generation() > self.cursor.load(Ordering::Acquire)
    }

    /// Copy the latest value and advance the cursor to its generation.
    ///
    /// Publishes that happened between two calls are skipped; only the most
    /// recent value is ever returned.
    ///
    /// # Errors
    ///
    /// [`SynapseError::NoNewData`] when nothing was published since the last
    /// call.
    pub fn update(&mut self) -> Result<T, SynapseError> {
        if !self.update_available() {
            return Err(SynapseError::NoNewData {
                topic: self.topic.name().to_string(),
            });
        }
        let (value, generation) = self.topic.read();
        self.cursor.store(generation, Ordering::Release);
        Ok(value)
    }

    /// Copy the current value without moving the cursor.
    pub fn latest(&self) -> T {
        self.topic.read().0
    }

    /// Forget what has been consumed so the current value counts as new
    /// again (if the topic was ever published).
    pub fn rewind(&mut self) {
        self.cursor.store(0, Ordering::Release);
    }

    pub fn last_seen(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn queue_depth_hint(&self) -> usize {
        self.queue_depth_hint
    }

    /// Node slot this subscriber occupies; `None` for detached subscribers
    /// and clones.
    pub fn id(&self) -> Option<SubscriptionId> {
        self.id
    }

    pub fn topic(&self) -> &Arc<Topic<T>> {
        &self.topic
    }

    pub(crate) fn attach(mut self, id: SubscriptionId) -> Self {
        self.id = Some(id);
        self
    }

    pub(crate) fn cursor(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.cursor)
    }
}

impl<T: Message> Clone for Subscriber<T> {
    /// The clone starts where the original is but advances independently and
    /// is not tracked by any node.
    fn clone(&self) -> Self {
        Self {
            topic: Arc::clone(&self.topic),
            cursor: Arc::new(AtomicU64::new(self.last_seen())),
            queue_depth_hint: self.queue_depth_hint,
            id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_types::{Joy, Mode, Status};

    fn status(seq: u32) -> Status {
        Status {
            request_seq: seq,
            mode: Mode::Manual,
            ..Default::default()
        }
    }

    #[test]
    fn update_yields_latest_of_many_publishes() {
        let topic = Topic::<Status>::new("status");
        let publisher = topic.advertise().unwrap();
        let mut sub = topic.subscribe(1);

        for seq in 1..=50 {
            publisher.publish(status(seq));
        }

        assert!(sub.update_available());
        assert_eq!(sub.update().unwrap().request_seq, 50);
        assert_eq!(topic.generation(), 50);
    }

    #[test]
    fn second_update_without_publish_is_no_new_data() {
        let topic = Topic::<Status>::new("status");
        let publisher = topic.advertise().unwrap();
        let mut sub = topic.subscribe(1);

        publisher.publish(status(1));
        sub.update().unwrap();

        assert!(!sub.update_available());
        assert_eq!(
            sub.update(),
            Err(SynapseError::NoNewData { topic: "status".to_string() })
        );
    }

    #[test]
    fn update_on_never_published_topic_is_no_new_data() {
        let topic = Topic::<Joy>::new("joy");
        let mut sub = topic.subscribe(1);
        assert!(!sub.update_available());
        assert!(matches!(sub.update(), Err(SynapseError::NoNewData { .. })));
    }

    #[test]
    fn subscribers_have_independent_cursors() {
        let topic = Topic::<Status>::new("status");
        let publisher = topic.advertise().unwrap();
        let mut a = topic.subscribe(1);
        let mut b = topic.subscribe(1);

        for seq in 1..=3 {
            publisher.publish(status(seq));
        }

        assert!(a.update_available());
        assert!(b.update_available());

        a.update().unwrap();
        assert!(!a.update_available());
        assert!(b.update_available(), "b must not be affected by a's update");

        b.update().unwrap();
        assert!(!b.update_available());
    }

    #[test]
    fn late_subscriber_sees_existing_value() {
        let topic = Topic::<Status>::new("status");
        let publisher = topic.advertise().unwrap();
        publisher.publish(status(7));

        let mut late = topic.subscribe(1);
        assert!(late.update_available());
        assert_eq!(late.update().unwrap().request_seq, 7);
    }

    #[test]
    fn second_publisher_is_rejected_until_first_drops() {
        let topic = Topic::<Status>::new("status");
        let first = topic.advertise().unwrap();
        assert_eq!(
            topic.advertise().err(),
            Some(SynapseError::AlreadyAdvertised { topic: "status".to_string() })
        );
        drop(first);
        assert!(topic.advertise().is_ok());
    }

    #[test]
    fn clone_has_independent_cursor() {
        let topic = Topic::<Status>::new("status");
        let publisher = topic.advertise().unwrap();
        let mut original = topic.subscribe(4);
        publisher.publish(status(1));

        let mut copy = original.clone();
        assert_eq!(copy.queue_depth_hint(), 4);
        assert!(copy.id().is_none());

        copy.update().unwrap();
        assert!(original.update_available());
        original.update().unwrap();
        assert!(!copy.update_available());
    }

    #[test]
    fn latest_does_not_move_cursor_and_rewind_resets() {
        let topic = Topic::<Status>::new("status");
        let publisher = topic.advertise().unwrap();
        let mut sub = topic.subscribe(1);
        publisher.publish(status(3));

        assert_eq!(sub.latest().request_seq, 3);
        assert!(sub.update_available());
        sub.update().unwrap();

        sub.rewind();
        assert_eq!(sub.last_seen(), 0);
        assert!(sub.update_available());
    }

    #[test]
    fn zero_depth_hint_is_clamped() {
        let topic = Topic::<Joy>::new("joy");
        assert_eq!(topic.subscribe(0).queue_depth_hint(), 1);
    }

    #[test]
    fn concurrent_readers_never_see_stale_generation() {
        let topic = Topic::<Status>::new("status");
        let publisher = topic.advertise().unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let mut sub = topic.subscribe(1);
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..2_000 {
                        if let Ok(s) = sub.update() {
                            assert!(s.request_seq >= last);
                            last = s.request_seq;
                        }
                    }
                })
            })
            .collect();

        for seq in 1..=2_000 {
            publisher.publish(status(seq));
        }
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(topic.generation(), 2_000);
    }

    /// Records, when dropped, whether its topic's slot lock was free.
    #[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
    struct LockWitness {
        #[serde(skip)]
        topic: Option<Arc<Topic<LockWitness>>>,
        #[serde(skip)]
        lock_free_on_drop: Arc<AtomicBool>,
    }

    impl Message for LockWitness {
        const KIND: MessageKind = MessageKind::Status;
    }

    impl Drop for LockWitness {
        fn drop(&mut self) {
            if let Some(topic) = self.topic.take() {
                let free = topic.slot.try_write().is_some();
                self.lock_free_on_drop.store(free, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn replaced_value_is_dropped_outside_the_lock() {
        let topic = Topic::<LockWitness>::new("witness");
        let publisher = topic.advertise().unwrap();
        let flag = Arc::new(AtomicBool::new(false));

        publisher.publish(LockWitness {
            topic: Some(Arc::clone(&topic)),
            lock_free_on_drop: Arc::clone(&flag),
        });
        publisher.publish(LockWitness::default());

        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(topic.generation(), 2);
    }
}
