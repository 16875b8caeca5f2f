mod actors;
pub mod error;
pub mod events;
pub mod runner;
pub mod store;
pub mod telemetry;
pub mod types;

// re-export the hub handle as if it is the hub itself.
pub use actors::hub::EventHubHandle as EventHub;
pub use actors::hub::{Emitter, Outbox};
pub use events::{Event, EventName, JobStatus};
pub use runner::{JobHandle, JobRunner, ToolConfig};
pub use store::{Artifact, ArtifactStore, UploadsEntry};
pub use telemetry::{GpuStats, TelemetrySampler, TelemetrySnapshot};
