use super::EventHubHandle;
use crate::events::{Event, EventName, JobStatus, OutputKind};
use crate::runner::{JobHandle, OutputLines};
use crate::telemetry::TelemetrySampler;
use crate::types::SessionId;

use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::{
    select,
    sync::{oneshot, watch},
    time::{self, MissedTickBehavior},
};

/// A producer's view of one session: it can emit while the session is alive.
#[derive(Clone)]
pub struct Emitter {
    session_id: SessionId,
    hub: EventHubHandle,
    alive: watch::Receiver<bool>,
}

impl Emitter {
    pub fn new(session_id: SessionId, hub: EventHubHandle, alive: watch::Receiver<bool>) -> Self {
        Self {
            session_id,
            hub,
            alive,
        }
    }

    pub fn is_active(&self) -> bool {
        *self.alive.borrow()
    }

    /// Emit `event` to the session. Returns false, without emitting, once the session has ended.
    pub fn emit(&self, event: Event) -> bool {
        if !self.is_active() {
            return false;
        }
        self.hub.emit(self.session_id, event);
        true
    }
}

pub fn spawn_telemetry(
    emitter: Emitter,
    sampler: TelemetrySampler,
    interval: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            select! {
                biased;
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {}
            }
            let snapshot = sampler.sample().await;
            let payload = serde_json::to_value(&snapshot).unwrap_or(Value::Array(Vec::new()));
            if !emitter.emit(Event::new(EventName::GpuStats, payload)) {
                break;
            }
        }
        tracing::debug!(session = %emitter.session_id, "telemetry loop stopped");
    });
}

/// Pump both of the job's streams into the session, then report its exit.
///
/// Pumps keep reading after the session ends so the child never blocks on a full pipe.
pub fn spawn_job_forwarding(emitter: Emitter, mut job: JobHandle) {
    let job_id = job.id();
    let pumps: Vec<_> = [
        (OutputKind::Stdout, job.stdout_lines()),
        (OutputKind::Stderr, job.stderr_lines()),
    ]
    .into_iter()
    .filter_map(|(kind, lines)| {
        lines.map(|lines| tokio::spawn(pump(emitter.clone(), kind, lines)))
    })
    .collect();

    tokio::spawn(async move {
        for pump in pumps {
            let _ = pump.await;
        }
        let status = match job.wait().await {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(job = %job_id, error = %err, "failed to wait on job");
                JobStatus::Failed
            }
        };
        tracing::info!(session = %emitter.session_id, job = %job_id, ?status, "job finished");
        emitter.emit(Event::new(
            EventName::ProcessExit,
            json!({ "job": job_id, "status": status }),
        ));
    });
}

async fn pump(emitter: Emitter, kind: OutputKind, mut lines: OutputLines) {
    while let Some(line) = lines.next().await {
        tracing::debug!(session = %emitter.session_id, stream = ?kind, "{}", line);
        emitter.emit(Event::line(kind, line));
    }
}
