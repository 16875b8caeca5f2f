mod actor;
mod emitters;
mod messages;

use self::{
    actor::Actor,
    messages::HubMessage::{
        self, EndSession, Emit, ForwardJob, Register, StartTelemetry, StopTelemetry,
    },
};
use crate::events::Event;
use crate::runner::JobHandle;
use crate::telemetry::TelemetrySampler;
use crate::types::SessionId;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub use emitters::Emitter;
pub use messages::Outbox;

/// The per-session event hub: routes events from every producer (telemetry loops, job output pumps) to the
/// session they belong to, and owns the lifecycle of those producers.
///
/// This struct is an actor handle. The session registry lives in the actor spawned by `EventHubHandle::spawn`,
/// so the handle can be cloned freely across tasks without any locking. Events sent through one handle clone
/// reach the session's outbox in the order they were sent.
#[derive(Clone)]
pub struct EventHubHandle {
    sender: mpsc::UnboundedSender<HubMessage>,
}

impl EventHubHandle {
    /// Spawn a new hub. Telemetry loops started on it sample with `sampler` every `telemetry_interval`.
    pub fn spawn(sampler: TelemetrySampler, telemetry_interval: Duration) -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        Actor::spawn(inbox, sampler, telemetry_interval);
        Self { sender }
    }

    /// Register a new session. The outbox yields every event routed to it, starting with a `session` event
    /// carrying the id, and closes once the session ends.
    pub async fn register_session(&self) -> (SessionId, Outbox) {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Register { response: tx })
            .expect("EventHub exited");
        rx.await.expect("EventHub exited")
    }

    /// Route `event` to `session_id`. Dropped if the session is unknown or has ended.
    pub fn emit(&self, session_id: SessionId, event: Event) {
        let _ = self.sender.send(Emit { session_id, event });
    }

    /// Start sampling telemetry into the session, replacing any loop already running for it.
    pub fn start_telemetry(&self, session_id: SessionId) {
        let _ = self.sender.send(StartTelemetry {
            session_id,
            hub: self.clone(),
        });
    }

    pub fn stop_telemetry(&self, session_id: SessionId) {
        let _ = self.sender.send(StopTelemetry { session_id });
    }

    /// Pump the job's stdout and stderr into the session, followed by a `process_exit` event.
    pub fn start_job_forwarding(&self, session_id: SessionId, job: JobHandle) {
        let _ = self.sender.send(ForwardJob {
            session_id,
            job,
            hub: self.clone(),
        });
    }

    /// Stop routing to the session. Producers notice before their next emit; running jobs are left alone.
    pub fn end_session(&self, session_id: SessionId) {
        let _ = self.sender.send(EndSession { session_id });
    }
}
