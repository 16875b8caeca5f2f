use super::emitters::{self, Emitter};
use super::messages::{HubMessage, Outbox};
use super::EventHubHandle;
use crate::events::{Event, EventName};
use crate::runner::JobHandle;
use crate::telemetry::TelemetrySampler;
use crate::types::SessionId;

use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

struct Session {
    outbox: mpsc::UnboundedSender<Event>,
    alive: watch::Sender<bool>,
    // dropping or firing this stops the session's telemetry loop
    telemetry: Option<oneshot::Sender<()>>,
}

pub struct Actor {
    inbox: mpsc::UnboundedReceiver<HubMessage>,
    sessions: HashMap<SessionId, Session>,
    sampler: TelemetrySampler,
    telemetry_interval: Duration,
}

impl Actor {
    pub fn spawn(
        inbox: mpsc::UnboundedReceiver<HubMessage>,
        sampler: TelemetrySampler,
        telemetry_interval: Duration,
    ) {
        let actor = Self {
            inbox,
            sessions: HashMap::new(),
            sampler,
            telemetry_interval,
        };
        tokio::spawn(async move { actor.run().await });
    }

    async fn run(mut self) {
        use self::HubMessage::*;
        while let Some(msg) = self.inbox.recv().await {
            match msg {
                Register { response } => {
                    let _ = response.send(self.register());
                }
                Emit { session_id, event } => self.emit(session_id, event),
                StartTelemetry { session_id, hub } => self.start_telemetry(session_id, hub),
                StopTelemetry { session_id } => self.stop_telemetry(session_id),
                ForwardJob {
                    session_id,
                    job,
                    hub,
                } => self.forward_job(session_id, job, hub),
                EndSession { session_id } => self.end_session(session_id),
            }
        }
    }

    fn register(&mut self) -> (SessionId, Outbox) {
        let session_id = uuid::Uuid::new_v4();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let (alive, _) = watch::channel(true);
        let _ = outbox.send(Event::new(
            EventName::Session,
            json!({ "id": session_id }),
        ));
        self.sessions.insert(
            session_id,
            Session {
                outbox,
                alive,
                telemetry: None,
            },
        );
        tracing::info!(session = %session_id, sessions = self.sessions.len(), "session registered");
        (session_id, outbox_rx)
    }

    fn emit(&mut self, session_id: SessionId, event: Event) {
        if let Some(session) = self.sessions.get(&session_id) {
            // a closed outbox means the client is gone; end_session will follow
            let _ = session.outbox.send(event);
        }
    }

    fn start_telemetry(&mut self, session_id: SessionId, hub: EventHubHandle) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        if let Some(previous) = session.telemetry.replace(stop_tx) {
            tracing::debug!(session = %session_id, "replacing telemetry loop");
            let _ = previous.send(());
        }
        let emitter = Emitter::new(session_id, hub, session.alive.subscribe());
        emitters::spawn_telemetry(
            emitter,
            self.sampler.clone(),
            self.telemetry_interval,
            stop_rx,
        );
    }

    fn stop_telemetry(&mut self, session_id: SessionId) {
        if let Some(stop_tx) = self
            .sessions
            .get_mut(&session_id)
            .and_then(|session| session.telemetry.take())
        {
            let _ = stop_tx.send(());
        }
    }

    fn forward_job(&mut self, session_id: SessionId, job: JobHandle, hub: EventHubHandle) {
        let alive = match self.sessions.get(&session_id) {
            Some(session) => session.alive.subscribe(),
            None => {
                // the session left before its job started; still drain and reap the child
                tracing::debug!(session = %session_id, job = %job.id(), "forwarding job for unknown session");
                watch::channel(false).1
            }
        };
        emitters::spawn_job_forwarding(Emitter::new(session_id, hub, alive), job);
    }

    fn end_session(&mut self, session_id: SessionId) {
        if let Some(session) = self.sessions.remove(&session_id) {
            session.alive.send_replace(false);
            if let Some(stop_tx) = session.telemetry {
                let _ = stop_tx.send(());
            }
            tracing::info!(session = %session_id, sessions = self.sessions.len(), "session ended");
        }
    }
}
