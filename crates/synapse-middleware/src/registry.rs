//! Process-wide topic registry.
//!
//! [`Topics`] is built once at startup and handed to every task (usually in
//! an `Arc`).  It never changes after construction, so sharing it needs no
//! locking; all mutation happens inside the individual topic slots.

use std::sync::Arc;

use synapse_types::{
    Actuators, ClockOffset, Imu, Joy, LedArray, MessageKind, Status,
};

use crate::bus::Topic;
use crate::dispatch::AnyTopic;

/// Snapshot of one topic for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub name: &'static str,
    pub kind: MessageKind,
    pub generation: u64,
}

/// Every topic on the vehicle bus.
pub struct Topics {
    /// Actuator output after mixing.
    pub actuators: Arc<Topic<Actuators>>,
    /// Actuator command proposed by the autonomous source.
    pub actuators_auto: Arc<Topic<Actuators>>,
    pub clock_offset: Arc<Topic<ClockOffset>>,
    pub imu: Arc<Topic<Imu>>,
    pub joy: Arc<Topic<Joy>>,
    pub led_array: Arc<Topic<LedArray>>,
    pub status: Arc<Topic<Status>>,
}

impl Topics {
    pub fn new() -> Self {
        Self {
            actuators: Topic::new("actuators"),
            actuators_auto: Topic::new("actuators_auto"),
            clock_offset: Topic::new("clock_offset"),
            imu: Topic::new("imu"),
            joy: Topic::new("joy"),
            led_array: Topic::new("led_array"),
            status: Topic::new("status"),
        }
    }

    /// All topics, type-erased, in name order.
    pub fn all(&self) -> Vec<Arc<dyn AnyTopic>> {
        vec![
            Arc::clone(&self.actuators) as Arc<dyn AnyTopic>,
            Arc::clone(&self.actuators_auto) as Arc<dyn AnyTopic>,
            Arc::clone(&self.clock_offset) as Arc<dyn AnyTopic>,
            Arc::clone(&self.imu) as Arc<dyn AnyTopic>,
            Arc::clone(&self.joy) as Arc<dyn AnyTopic>,
            Arc::clone(&self.led_array) as Arc<dyn AnyTopic>,
            Arc::clone(&self.status) as Arc<dyn AnyTopic>,
        ]
    }

    /// Find a topic by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn AnyTopic>> {
        self.all().into_iter().find(|t| t.name() == name)
    }

    pub fn info(&self) -> Vec<TopicInfo> {
        self.all()
            .iter()
            .map(|t| TopicInfo {
                name: t.name(),
                kind: t.kind(),
                generation: t.generation(),
            })
            .collect()
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new()
    }
}
