//! Structured logging/telemetry init.
//!
//! Grounded on the teacher's `tracing_subscriber::registry()` composition in
//! `main.rs`, minus the OpenTelemetry/OTLP exporter layer — this service's
//! ambient stack is metadata-only `tracing` events (spec §4.G "Telemetry
//! privacy"), not a distributed trace backend.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "cee_gateway=info,tower_http=info".into()),
    );

    let json_output = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
