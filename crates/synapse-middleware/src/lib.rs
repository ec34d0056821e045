//! `synapse-middleware` – The Vehicle Bus
//!
//! Moves the latest value of every vehicle topic between control tasks, and
//! between the vehicle and one external client over TCP.
//!
//! # Modules
//!
//! - [`bus`] – [`Topic`], [`Publisher`] and [`Subscriber`]: single-writer,
//!   multi-reader latest-value slots with per-subscriber cursors.
//! - [`node`] – [`Node`]: groups a task's subscriptions and offers one
//!   bounded wait across all of them.
//! - [`registry`] – [`Topics`]: the fixed set of named topics, built once at
//!   startup.
//! - [`codec`] – framing with two CRC-32 checks and a resynchronising
//!   decoder.
//! - [`dispatch`] – data-driven routing from wire tags to topics and back.
//! - [`clock`] – monotonic uptime used for heartbeats.
//! - [`transport`] – [`Connection`][transport::Connection] and
//!   [`Listener`][transport::Listener] seams over Tokio TCP.
//! - [`bridge`] – [`Bridge`]: the accept / serve / reconnect state machine.

pub mod bridge;
pub mod bus;
pub mod clock;
pub mod codec;
pub mod dispatch;
pub mod node;
pub mod registry;
pub mod transport;

pub use bridge::{Bridge, BridgeConfig, BridgeStats, SessionState};
pub use bus::{Publisher, Subscriber, SubscriptionId, Topic};
pub use dispatch::{Direction, RouteSpec, default_routes};
pub use node::{Node, NodeBuilder, WokenReason};
pub use registry::{TopicInfo, Topics};
