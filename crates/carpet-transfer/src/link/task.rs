use std::io;
use std::process::ExitStatus;

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::LinkError;

/// How a [`LinkTask`] ended.
#[derive(Debug)]
pub enum StopOutcome {
    /// The process was running and has been killed.
    Stopped,
    /// The process had already exited on its own.
    Exited(ExitStatus),
    Failed(String),
}

type StopRequest = oneshot::Sender<StopOutcome>;

/// A long-running link helper process (for example a hosted network) kept
/// alive for the whole session.
///
/// [`stop`](LinkTask::stop) sends a request and waits for the task to confirm
/// the process is gone. Dropping the handle without stopping still kills the
/// process, but nobody waits for it.
pub struct LinkTask {
    label: String,
    requests: Option<oneshot::Sender<StopRequest>>,
    handle: JoinHandle<()>,
}

enum Event {
    Exited(io::Result<ExitStatus>),
    Stop(Result<StopRequest, oneshot::error::RecvError>),
}

impl LinkTask {
    /// Spawn `command` and supervise it. `label` names it in logs and errors
    /// and must not contain secrets.
    pub fn spawn(label: impl Into<String>, mut command: Command) -> Result<Self, LinkError> {
        let label = label.into();
        command.kill_on_drop(true);
        let child = command.spawn().map_err(|source| LinkError::Spawn {
            command: label.clone(),
            source,
        })?;

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(supervise(label.clone(), child, rx));
        debug!(task = %label, "link task started");

        Ok(LinkTask {
            label,
            requests: Some(tx),
            handle,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the task to stop its process and wait for the acknowledgement.
    pub async fn stop(mut self) -> StopOutcome {
        let Some(requests) = self.requests.take() else {
            return StopOutcome::Failed("stop already requested".into());
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if requests.send(ack_tx).is_err() {
            return StopOutcome::Failed("link task is gone".into());
        }
        let outcome = ack_rx
            .await
            .unwrap_or_else(|_| StopOutcome::Failed("link task ended without answering".into()));
        debug!(task = %self.label, ?outcome, "link task stopped");
        outcome
    }
}

async fn supervise(label: String, mut child: Child, mut requests: oneshot::Receiver<StopRequest>) {
    let event = tokio::select! {
        status = child.wait() => Event::Exited(status),
        request = &mut requests => Event::Stop(request),
    };

    match event {
        Event::Exited(status) => {
            let outcome = match status {
                Ok(status) => {
                    warn!(task = %label, %status, "link task exited before it was stopped");
                    StopOutcome::Exited(status)
                }
                Err(e) => StopOutcome::Failed(e.to_string()),
            };
            if let Ok(ack) = requests.await {
                let _ = ack.send(outcome);
            }
        }
        Event::Stop(request) => {
            let outcome = match child.kill().await {
                Ok(()) => StopOutcome::Stopped,
                Err(e) => StopOutcome::Failed(e.to_string()),
            };
            // An Err request means the handle was dropped; kill and move on.
            if let Ok(ack) = request {
                let _ = ack.send(outcome);
            }
        }
    }
}
