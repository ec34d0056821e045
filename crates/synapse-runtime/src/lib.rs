//! `synapse-runtime` – Task Hosting
//!
//! Everything a vehicle process needs around the bus itself.
//!
//! # Modules
//!
//! - [`control`] – [`ControlTask`][control::ControlTask]: the boundary that
//!   autonomous, manual and mixing tasks implement.  [`run_control_task`]
//!   drives one task from its node's wait loop; a failing wake-up is logged
//!   and the loop carries on.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable trace export.

pub mod control;
pub mod telemetry;

pub use control::{ControlTask, TaskStats, run_control_task, run_for};
pub use telemetry::{TracerProviderGuard, init_tracing};
