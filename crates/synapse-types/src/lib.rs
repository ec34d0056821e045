//! `synapse-types` – shared vocabulary of the Synapse topic bus.
//!
//! Holds the message catalog exchanged between control tasks and the network
//! bridge, the numeric type tags that identify each message kind on the wire,
//! and the workspace-wide [`SynapseError`].

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Message kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Wire type tag of every message kind the bus can carry.
///
/// The discriminant is the `u16` written into each frame header, so values
/// must never be reused or renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum MessageKind {
    /// Actuator command (steering, throttle, normalized outputs).
    Actuators = 1,
    /// Vehicle status / health.
    Status = 2,
    /// Joystick input from the ground station.
    Joy = 3,
    /// Clock offset estimate computed by the peer.
    ClockOffset = 4,
    /// Inertial measurement sample.
    Imu = 5,
    /// LED / indicator state.
    LedArray = 6,
    /// Time-since-boot heartbeat emitted by the bridge.
    Uptime = 7,
}

impl MessageKind {
    /// Every kind, in tag order.
    pub const ALL: [MessageKind; 7] = [
        MessageKind::Actuators,
        MessageKind::Status,
        MessageKind::Joy,
        MessageKind::ClockOffset,
        MessageKind::Imu,
        MessageKind::LedArray,
        MessageKind::Uptime,
    ];

    /// Numeric tag written on the wire.
    pub fn tag(self) -> u16 {
        self as u16
    }

    /// Look up the kind for a wire tag. Returns `None` for unknown tags.
    pub fn from_tag(tag: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// Stable lowercase name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Actuators => "actuators",
            MessageKind::Status => "status",
            MessageKind::Joy => "joy",
            MessageKind::ClockOffset => "clock_offset",
            MessageKind::Imu => "imu",
            MessageKind::LedArray => "led_array",
            MessageKind::Uptime => "uptime",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.as_str(), self.tag())
    }
}

/// A value that can live in a topic slot and travel inside a frame.
///
/// `Default` is the value a topic holds before its first publish.
pub trait Message: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type tag identifying this message on the wire.
    const KIND: MessageKind;
}

// ─────────────────────────────────────────────────────────────────────────────
// Common building blocks
// ─────────────────────────────────────────────────────────────────────────────

/// Seconds plus nanoseconds, as used by time stamps and the heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Time {
    pub sec: i64,
    pub nanosec: i32,
}

impl Time {
    /// Split a [`Duration`] into whole seconds and the sub-second remainder.
    pub fn from_duration(d: Duration) -> Self {
        Self {
            sec: d.as_secs() as i64,
            nanosec: d.subsec_nanos() as i32,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::new(self.sec.max(0) as u64, self.nanosec.max(0) as u32)
    }
}

/// Sequence number, time stamp and reference frame carried by most messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub seq: u32,
    pub stamp: Time,
    pub frame_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self { w: 1.0, x: 0.0, y: 0.0, z: 0.0 }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────────────────

/// Actuator command produced by the mixing stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actuators {
    pub header: Header,
    /// Position outputs (e.g. steering angle, radians).
    pub position: Vec<f64>,
    /// Velocity outputs (e.g. wheel speed, rad/s).
    pub velocity: Vec<f64>,
    /// Normalized outputs in `[-1, 1]`.
    pub normalized: Vec<f64>,
}

impl Message for Actuators {
    const KIND: MessageKind = MessageKind::Actuators;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arming {
    #[default]
    Disarmed,
    Armed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Unknown,
    Manual,
    Auto,
    CmdVel,
    Calibration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoyStatus {
    #[default]
    Nominal,
    Loss,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Safety {
    #[default]
    Unknown,
    Safe,
    Unsafe,
}

/// Vehicle health and mode, tailed to the ground station by the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub header: Header,
    pub arming: Arming,
    pub mode: Mode,
    pub joy: JoyStatus,
    pub safety: Safety,
    /// Sequence number of the last mode/arming request handled.
    pub request_seq: u32,
    pub request_rejected: bool,
    pub status_message: String,
}

impl Message for Status {
    const KIND: MessageKind = MessageKind::Status;
}

/// Index of a joystick button inside [`Joy::buttons`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoyButton {
    Manual = 0,
    Auto = 1,
    CmdVel = 2,
    Calibration = 3,
    LightsOff = 4,
    LightsOn = 5,
    Disarm = 6,
    Arm = 7,
}

/// Index of a joystick axis inside [`Joy::axes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoyAxis {
    Thrust = 1,
    Pitch = 2,
    Roll = 3,
    Yaw = 4,
}

/// Joystick input forwarded from the ground station.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Joy {
    pub header: Header,
    pub axes: Vec<f32>,
    pub buttons: Vec<i32>,
}

impl Joy {
    /// `true` when `button` is present and pressed. Missing buttons read as
    /// released.
    pub fn button(&self, button: JoyButton) -> bool {
        self.buttons.get(button as usize).is_some_and(|&b| b == 1)
    }

    /// Axis deflection, or `0.0` when the axis is missing.
    pub fn axis(&self, axis: JoyAxis) -> f32 {
        self.axes.get(axis as usize).copied().unwrap_or(0.0)
    }
}

impl Message for Joy {
    const KIND: MessageKind = MessageKind::Joy;
}

/// Offset between the peer's clock and ours, as estimated by the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockOffset(pub Time);

impl Message for ClockOffset {
    const KIND: MessageKind = MessageKind::ClockOffset;
}

/// Monotonic time since boot, sent once per bridge iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uptime(pub Time);

impl Message for Uptime {
    const KIND: MessageKind = MessageKind::Uptime;
}

/// Inertial measurement sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Imu {
    pub header: Header,
    /// rad/s
    pub angular_velocity: Vector3,
    /// m/s²
    pub linear_acceleration: Vector3,
    pub orientation: Quaternion,
}

impl Message for Imu {
    const KIND: MessageKind = MessageKind::Imu;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Led {
    pub index: u32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// State of the vehicle's indicator LEDs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedArray {
    pub header: Header,
    pub leds: Vec<Led>,
}

impl Message for LedArray {
    const KIND: MessageKind = MessageKind::LedArray;
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error type shared by the bus, the codec and the bridge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynapseError {
    /// `update` was called while `update_available` was false.
    #[error("no new data on topic {topic}")]
    NoNewData { topic: String },

    /// A second publisher was requested for a single-writer topic.
    #[error("topic {topic} already has a publisher")]
    AlreadyAdvertised { topic: String },

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("decode fault: {0}")]
    Decode(String),

    #[error("encode fault: {0}")]
    Encode(String),

    /// A bounded buffer would have overflowed.
    #[error("buffer capacity exceeded: need {needed} bytes, capacity {capacity}")]
    CapacityExceeded { needed: usize, capacity: usize },

    #[error("unsupported message type tag {0}")]
    UnsupportedType(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),
}
