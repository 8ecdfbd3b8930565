//! Tracing setup for warden binaries.
//!
//! [`init_tracing`] installs a `tracing-subscriber` registry with an
//! `EnvFilter` (default `info`, overridden by `RUST_LOG`) and a stderr fmt
//! layer. Built with the `telemetry` feature, it also adds an OTLP export
//! layer when the standard OTel environment variables ask for one:
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 warden run
//! ```
//!
//! Set `OTEL_SDK_DISABLED=true` to disable export even when the endpoint is
//! set.

#[cfg(feature = "telemetry")]
mod otel;

#[cfg(feature = "telemetry")]
pub use otel::{OtelGuard, otel_layer};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Check whether OTel export should be enabled.
///
/// True when `OTEL_SDK_DISABLED` is not `"true"` and either
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set or `OTEL_TRACES_EXPORTER` is set to
/// something other than `"none"`.
pub fn otel_enabled() -> bool {
    if std::env::var("OTEL_SDK_DISABLED")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        return false;
    }
    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        return true;
    }
    if let Ok(exporter) = std::env::var("OTEL_TRACES_EXPORTER") {
        return !exporter.eq_ignore_ascii_case("none");
    }
    false
}

/// Keeps exporters alive; flushes pending spans on drop.
#[must_use = "dropping the guard stops span export"]
#[derive(Default)]
pub struct TelemetryGuard {
    #[cfg(feature = "telemetry")]
    _otel: Option<OtelGuard>,
}

/// Install the global subscriber for `service`.
///
/// Must be called from inside a tokio runtime when the `telemetry` feature
/// is enabled. A second call leaves the first subscriber in place.
pub fn init_tracing(service: &str) -> TelemetryGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    #[cfg(feature = "telemetry")]
    if otel_enabled() {
        match otel_layer(service) {
            Ok((layer, guard)) => {
                let _ = registry.with(layer).try_init();
                tracing::info!(service, "OTel export enabled");
                return TelemetryGuard { _otel: Some(guard) };
            }
            Err(e) => {
                let _ = registry.try_init();
                tracing::warn!(error = %e, "OTel exporter unavailable, logging only");
                return TelemetryGuard::default();
            }
        }
    }

    let _ = registry.try_init();
    tracing::debug!(service, "tracing initialized");
    TelemetryGuard::default()
}
