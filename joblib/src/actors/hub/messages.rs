use super::EventHubHandle;
use crate::events::Event;
use crate::runner::JobHandle;
use crate::types::SessionId;
use tokio::sync::{mpsc, oneshot};

pub type Outbox = mpsc::UnboundedReceiver<Event>;

pub enum HubMessage {
    Register {
        response: oneshot::Sender<(SessionId, Outbox)>,
    },
    Emit {
        session_id: SessionId,
        event: Event,
    },
    StartTelemetry {
        session_id: SessionId,
        hub: EventHubHandle,
    },
    StopTelemetry {
        session_id: SessionId,
    },
    ForwardJob {
        session_id: SessionId,
        job: JobHandle,
        hub: EventHubHandle,
    },
    EndSession {
        session_id: SessionId,
    },
}
