//! SSE live-resume channel (spec §4.D).

pub mod gate;
pub mod registry;
pub mod ring;
pub mod wire;

pub use gate::{EventClass, FailFastGate};
pub use registry::{Registry, ResumeError, StreamEntry, DEFAULT_RESUME_WINDOW};
pub use ring::{EventKind, StreamEvent, DEFAULT_CAPACITY};

use std::time::Duration;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Background task: periodically sweeps expired streams/tokens out of the
/// registry. Spawned once at startup alongside the server (mirrors the
/// teacher's `jobs::cleanup::spawn` pattern).
pub fn spawn_sweeper(registry: std::sync::Arc<Registry>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            registry.sweep_expired();
        }
    });
}
