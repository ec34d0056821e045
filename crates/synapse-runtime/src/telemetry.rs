//! Logging and trace export for Synapse processes.
//!
//! Call [`init_tracing`] once in `main`, before the bus or the bridge start
//! logging.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). Enables the OTLP/HTTP span exporter. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `SYNAPSE_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//! | `SYNAPSE_LOG_FRAMES=1` | Add per-frame `debug` logs from the codec and the bridge on top of `RUST_LOG`. |
//!
//! # Example
//!
//! ```rust,no_run
//! let _guard = synapse_runtime::telemetry::init_tracing("synapse");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV: &str = "SYNAPSE_LOG_FORMAT";
/// Environment variable enabling per-frame bridge logs.
pub const LOG_FRAMES_ENV: &str = "SYNAPSE_LOG_FRAMES";

/// Directives that surface every encoded, decoded and dispatched frame.
const FRAME_DIRECTIVES: &str = "synapse_middleware::codec=debug,synapse_middleware::bridge=debug";

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global `tracing` subscriber.
///
/// With `OTEL_EXPORTER_OTLP_ENDPOINT` set, spans are also exported to the
/// collector; otherwise only the console formatter is installed.
///
/// Hold the returned [`TracerProviderGuard`] until the process exits:
/// dropping it flushes pending spans.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = build_filter(
        std::env::var("RUST_LOG").ok().as_deref(),
        flag_set(std::env::var(LOG_FRAMES_ENV).ok().as_deref()),
    );
    let use_json = json_requested(std::env::var(LOG_FORMAT_ENV).ok().as_deref());

    let provider = build_provider(service_name);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("synapse")));
    let (json_layer, compact_layer) = if use_json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer().compact()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .init();

    TracerProviderGuard(provider)
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts the OTel [`SdkTracerProvider`] down on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// Whether spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[synapse] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

fn json_requested(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.eq_ignore_ascii_case("json"))
}

fn flag_set(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"))
}

/// `RUST_LOG` (or `info`), plus the frame directives when requested. An
/// unparsable filter falls back to `info`.
fn build_filter(rust_log: Option<&str>, frames: bool) -> EnvFilter {
    let base = rust_log.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("info");
    let directives = if frames {
        format!("{base},{FRAME_DIRECTIVES}")
    } else {
        base.to_string()
    };
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Build an exporter-backed provider when `OTEL_EXPORTER_OTLP_ENDPOINT` is
/// set. Exporter failures are printed and tracing falls back to the console.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[synapse] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // Simple exporter: init_tracing runs before the Tokio runtime exists.
            .with_simple_exporter(exporter)
            .build(),
    )
}
