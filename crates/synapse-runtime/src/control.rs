//! [`ControlTask`] – the seam between the bus and vehicle control logic.
//!
//! A control task owns one [`Node`] and is only ever suspended inside
//! [`Node::wait`].  Each wake-up is handed to [`ControlTask::on_wake`],
//! either with the subscriptions that have fresh data or with
//! [`WokenReason::TimedOut`] so periodic duties (safety checks, stale-input
//! detection) still run when nothing arrives.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use synapse_middleware::{Node, Topics, WokenReason};
//! use synapse_runtime::control::{ControlTask, run_for};
//! use synapse_types::SynapseError;
//!
//! struct Watchdog {
//!     timeouts: u32,
//! }
//!
//! #[async_trait]
//! impl ControlTask for Watchdog {
//!     fn name(&self) -> &str {
//!         "watchdog"
//!     }
//!
//!     fn period(&self) -> Duration {
//!         Duration::from_millis(1)
//!     }
//!
//!     async fn on_wake(&mut self, reason: &WokenReason) -> Result<(), SynapseError> {
//!         if *reason == WokenReason::TimedOut {
//!             self.timeouts += 1;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test_main();
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn tokio_test_main() {
//! let topics = Topics::new();
//! let mut builder = Node::builder("watchdog");
//! let _joy = builder.subscribe(&topics.joy, 1);
//! let node = builder.build();
//!
//! let mut task = Watchdog { timeouts: 0 };
//! let stats = run_for(&node, &mut task, 3).await;
//! assert_eq!(stats.timeouts, 3);
//! assert_eq!(task.timeouts, 3);
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use synapse_middleware::{Node, WokenReason};
use synapse_types::SynapseError;
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// ControlTask
// ─────────────────────────────────────────────────────────────────────────────

/// Vehicle logic driven by a node's wait loop.
#[async_trait]
pub trait ControlTask: Send {
    fn name(&self) -> &str;

    /// Longest the task may sleep without a wake-up.
    fn period(&self) -> Duration;

    /// React to a wake-up. Errors are logged by the runner and never end the
    /// loop.
    async fn on_wake(&mut self, reason: &WokenReason) -> Result<(), SynapseError>;
}

/// Wake-up counters for one runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub updates: u64,
    pub timeouts: u64,
    pub errors: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Runners
// ─────────────────────────────────────────────────────────────────────────────

/// Drive `task` from `node` forever.
pub async fn run_control_task<T: ControlTask + ?Sized>(node: &Node, task: &mut T) {
    info!(
        task = task.name(),
        node = node.name(),
        period_ms = task.period().as_millis() as u64,
        "control task started"
    );
    let mut stats = TaskStats::default();
    loop {
        tick(node, task, &mut stats).await;
    }
}

/// Drive `task` for exactly `iterations` wake-ups.
pub async fn run_for<T: ControlTask + ?Sized>(
    node: &Node,
    task: &mut T,
    iterations: u64,
) -> TaskStats {
    let mut stats = TaskStats::default();
    for _ in 0..iterations {
        tick(node, task, &mut stats).await;
    }
    stats
}

async fn tick<T: ControlTask + ?Sized>(node: &Node, task: &mut T, stats: &mut TaskStats) {
    let reason = node.wait(task.period()).await;
    match &reason {
        WokenReason::Updated(ids) => {
            stats.updates += 1;
            debug!(task = task.name(), woken = ids.len(), "control task woken");
        }
        WokenReason::TimedOut => stats.timeouts += 1,
    }
    if let Err(e) = task.on_wake(&reason).await {
        stats.errors += 1;
        warn!(task = task.name(), error = %e, "control task wake-up failed");
    }
}
