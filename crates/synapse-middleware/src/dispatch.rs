//! Type-tag dispatch table between frames and topics.
//!
//! The bridge never branches on message types.  Each configured
//! [`RouteSpec`] is turned into a boxed route through the generic
//! [`AnyTopic`] implementation of [`Topic`], so adding a message to the
//! bridge is one more entry in the route list:
//!
//! * inbound routes own the topic's [`Publisher`] and turn a payload into a
//!   publish;
//! * outbound routes own a [`Subscriber`] and turn fresh values into frames.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use synapse_types::{Message, MessageKind, SynapseError};
use tracing::debug;

use crate::bus::{Publisher, Subscriber, Topic};
use crate::codec::{Frame, FrameEncoder, decode_payload};
use crate::node::NodeBuilder;
use crate::registry::Topics;

/// Which way a route moves data across the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Network → bus.
    Inbound,
    /// Bus → network.
    Outbound,
}

/// One `(type_tag, topic_name, direction)` entry of the bridge catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub kind: MessageKind,
    pub topic: String,
    pub direction: Direction,
}

impl RouteSpec {
    pub fn inbound(kind: MessageKind, topic: impl Into<String>) -> Self {
        Self { kind, topic: topic.into(), direction: Direction::Inbound }
    }

    pub fn outbound(kind: MessageKind, topic: impl Into<String>) -> Self {
        Self { kind, topic: topic.into(), direction: Direction::Outbound }
    }
}

/// Routes used when the configuration does not list any.
pub fn default_routes() -> Vec<RouteSpec> {
    vec![
        RouteSpec::inbound(MessageKind::Joy, "joy"),
        RouteSpec::inbound(MessageKind::ClockOffset, "clock_offset"),
        RouteSpec::outbound(MessageKind::Status, "status"),
        RouteSpec::outbound(MessageKind::Actuators, "actuators"),
        RouteSpec::outbound(MessageKind::Imu, "imu"),
        RouteSpec::outbound(MessageKind::LedArray, "led_array"),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Route traits
// ─────────────────────────────────────────────────────────────────────────────

/// Network → bus: deserialise a payload and publish it.
pub trait InboundRoute: Send + Sync {
    fn kind(&self) -> MessageKind;
    fn topic(&self) -> &'static str;
    fn deliver(&self, payload: &[u8]) -> Result<(), SynapseError>;
}

/// Bus → network: serialise the latest value when there is one.
pub trait OutboundRoute: Send {
    fn kind(&self) -> MessageKind;
    fn topic(&self) -> &'static str;
    /// Consume a pending update and encode it as a frame.
    ///
    /// Returns `None` when nothing new was published.
    fn take(&mut self, encoder: &mut FrameEncoder) -> Option<Result<Vec<u8>, SynapseError>>;
    /// Treat the current value as unsent.
    fn rewind(&mut self);
}

struct PublishRoute<T: Message> {
    publisher: Publisher<T>,
}

impl<T: Message> InboundRoute for PublishRoute<T> {
    fn kind(&self) -> MessageKind {
        T::KIND
    }

    fn topic(&self) -> &'static str {
        self.publisher.topic().name()
    }

    fn deliver(&self, payload: &[u8]) -> Result<(), SynapseError> {
        let msg = decode_payload::<T>(payload)?;
        self.publisher.publish(msg);
        Ok(())
    }
}

struct TailRoute<T: Message> {
    subscriber: Subscriber<T>,
}

impl<T: Message> OutboundRoute for TailRoute<T> {
    fn kind(&self) -> MessageKind {
        T::KIND
    }

    fn topic(&self) -> &'static str {
        self.subscriber.topic().name()
    }

    fn take(&mut self, encoder: &mut FrameEncoder) -> Option<Result<Vec<u8>, SynapseError>> {
        if !self.subscriber.update_available() {
            return None;
        }
        Some(
            self.subscriber
                .update()
                .and_then(|msg| encoder.encode(&msg).map(<[u8]>::to_vec)),
        )
    }

    fn rewind(&mut self) {
        self.subscriber.rewind();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Type-erased topics
// ─────────────────────────────────────────────────────────────────────────────

/// Object-safe view of a [`Topic`] of any message type.
pub trait AnyTopic: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> MessageKind;
    fn generation(&self) -> u64;
    /// Claim the topic's publisher on behalf of `node`.
    fn inbound_route(
        self: Arc<Self>,
        node: &mut NodeBuilder,
    ) -> Result<Box<dyn InboundRoute>, SynapseError>;
    /// Subscribe `node` to the topic.
    fn outbound_route(self: Arc<Self>, node: &mut NodeBuilder) -> Box<dyn OutboundRoute>;
}

impl<T: Message> AnyTopic for Topic<T> {
    fn name(&self) -> &'static str {
        Topic::name(self)
    }

    fn kind(&self) -> MessageKind {
        T::KIND
    }

    fn generation(&self) -> u64 {
        Topic::generation(self)
    }

    fn inbound_route(
        self: Arc<Self>,
        node: &mut NodeBuilder,
    ) -> Result<Box<dyn InboundRoute>, SynapseError> {
        Ok(Box::new(PublishRoute { publisher: node.advertise(&self)? }))
    }

    fn outbound_route(self: Arc<Self>, node: &mut NodeBuilder) -> Box<dyn OutboundRoute> {
        Box::new(TailRoute { subscriber: node.subscribe(&self, 1) })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Table
// ─────────────────────────────────────────────────────────────────────────────

/// Inbound routes keyed by type tag plus the ordered outbound routes.
pub struct DispatchTable {
    inbound: HashMap<u16, Box<dyn InboundRoute>>,
    outbound: Vec<Box<dyn OutboundRoute>>,
}

impl DispatchTable {
    /// Resolve `routes` against `topics`, wiring publishers and subscribers
    /// into `node`.
    ///
    /// # Errors
    ///
    /// * [`SynapseError::UnknownTopic`] for a topic name not in the registry.
    /// * [`SynapseError::Config`] when a route's kind does not match the
    ///   topic's message type, or a tag/topic is routed twice.
    /// * [`SynapseError::AlreadyAdvertised`] when an inbound topic already
    ///   has a publisher elsewhere.
    pub fn build(
        topics: &Topics,
        routes: &[RouteSpec],
        node: &mut NodeBuilder,
    ) -> Result<Self, SynapseError> {
        let mut inbound: HashMap<u16, Box<dyn InboundRoute>> = HashMap::new();
        let mut outbound: Vec<Box<dyn OutboundRoute>> = Vec::new();

        for route in routes {
            let topic = topics
                .lookup(&route.topic)
                .ok_or_else(|| SynapseError::UnknownTopic(route.topic.clone()))?;
            if topic.kind() != route.kind {
                return Err(SynapseError::Config(format!(
                    "route {} declares kind {} but topic carries {}",
                    route.topic,
                    route.kind,
                    topic.kind()
                )));
            }
            match route.direction {
                Direction::Inbound => {
                    let tag = route.kind.tag();
                    if inbound.contains_key(&tag) {
                        return Err(SynapseError::Config(format!(
                            "type {} routed inbound more than once",
                            route.kind
                        )));
                    }
                    inbound.insert(tag, topic.inbound_route(node)?);
                }
                Direction::Outbound => {
                    if outbound.iter().any(|r| r.topic() == route.topic) {
                        return Err(SynapseError::Config(format!(
                            "topic {} routed outbound more than once",
                            route.topic
                        )));
                    }
                    outbound.push(topic.outbound_route(node));
                }
            }
            debug!(topic = %route.topic, kind = %route.kind, direction = ?route.direction, "route added");
        }

        Ok(Self { inbound, outbound })
    }

    /// Publish a decoded frame on the topic routed for its tag.
    ///
    /// Returns the topic name on success.
    ///
    /// # Errors
    ///
    /// * [`SynapseError::UnsupportedType`] when no inbound route has the tag.
    /// * [`SynapseError::Decode`] when the payload does not deserialise.
    pub fn dispatch(&self, frame: &Frame) -> Result<&'static str, SynapseError> {
        let route = self
            .inbound
            .get(&frame.tag)
            .ok_or(SynapseError::UnsupportedType(frame.tag))?;
        route.deliver(&frame.payload)?;
        Ok(route.topic())
    }

    pub fn outbound_mut(&mut self) -> &mut [Box<dyn OutboundRoute>] {
        &mut self.outbound
    }

    pub fn inbound_kinds(&self) -> Vec<MessageKind> {
        let mut kinds: Vec<_> = self.inbound.values().map(|r| r.kind()).collect();
        kinds.sort_by_key(|k| k.tag());
        kinds
    }

    pub fn outbound_topics(&self) -> Vec<&'static str> {
        self.outbound.iter().map(|r| r.topic()).collect()
    }
}
