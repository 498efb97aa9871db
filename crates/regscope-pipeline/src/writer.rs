//! Single writer of run state
//!
//! Workers never touch `state.json`; they send transitions to one actor
//! task that owns the [`RunState`] and persists it after each message.

use crate::error::PipelineError;
use crate::state::{RunState, UnitStatus};
use regscope_core::DocumentId;
use regscope_store::DataDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub(crate) enum StateMessage {
    Started(DocumentId),
    Finished {
        id: DocumentId,
        status: UnitStatus,
        reason: Option<String>,
    },
}

/// Sending side, cloned into every worker
#[derive(Debug, Clone)]
pub(crate) struct StateHandle {
    sender: mpsc::Sender<StateMessage>,
}

impl StateHandle {
    pub(crate) async fn started(&self, id: &DocumentId) {
        self.send(StateMessage::Started(id.clone())).await;
    }

    pub(crate) async fn finished(&self, id: &DocumentId, status: UnitStatus, reason: Option<String>) {
        self.send(StateMessage::Finished {
            id: id.clone(),
            status,
            reason,
        })
        .await;
    }

    async fn send(&self, message: StateMessage) {
        if let Err(e) = self.sender.send(message).await {
            // the writer already failed; its error surfaces from `finish`
            tracing::warn!(message = ?e.0, "run state writer gone, transition dropped");
        }
    }
}

#[derive(Debug)]
pub(crate) struct StateWriter {
    handle: StateHandle,
    task: JoinHandle<Result<RunState, PipelineError>>,
}

impl StateWriter {
    pub(crate) fn spawn(data: DataDir, state: RunState) -> Self {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(run(data, state, receiver));
        Self {
            handle: StateHandle { sender },
            task,
        }
    }

    pub(crate) fn handle(&self) -> StateHandle {
        self.handle.clone()
    }

    /// Wait for every sender to drop and return the final state
    pub(crate) async fn finish(self) -> Result<RunState, PipelineError> {
        drop(self.handle);
        self.task
            .await
            .map_err(|e| PipelineError::Writer(e.to_string()))?
    }
}

async fn run(
    data: DataDir,
    mut state: RunState,
    mut receiver: mpsc::Receiver<StateMessage>,
) -> Result<RunState, PipelineError> {
    while let Some(message) = receiver.recv().await {
        match message {
            StateMessage::Started(id) => state.mark_started(&id),
            StateMessage::Finished { id, status, reason } => {
                tracing::debug!(run_id = %state.run_id, document_id = %id, %status, "unit finished");
                state.mark_finished(&id, status, reason);
            }
        }
        state.save(&data)?;
    }
    Ok(state)
}
