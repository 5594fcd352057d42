//! Plumbing between a session runtime and the hosts driving it.
//!
//! Hosts hold a cloneable [`SessionChannels`] to queue commands and
//! subscribe to updates. The runtime owns the single [`UpdatePublisher`],
//! which suppresses snapshots identical to the last one sent.

use thiserror::Error;
use tokio::sync::{
    broadcast,
    mpsc::{self, error::TrySendError},
};
use tracing::trace;

use crate::types::{SessionCommand, SessionUpdate, WindowSnapshot};

pub type UpdateStream = broadcast::Receiver<SessionUpdate>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionChannelError {
    #[error("session runtime has stopped")]
    RuntimeStopped,
    /// Only returned by the non-blocking path.
    #[error("command queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },
}

/// Host side of a session: command queue plus update subscription.
#[derive(Clone, Debug)]
pub struct SessionChannels {
    command_tx: mpsc::Sender<SessionCommand>,
    update_tx: broadcast::Sender<SessionUpdate>,
}

impl SessionChannels {
    /// Returns the host handle, the runtime's publisher and its command queue.
    pub fn new(
        command_buffer: usize,
        update_buffer: usize,
    ) -> (Self, UpdatePublisher, mpsc::Receiver<SessionCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (update_tx, _) = broadcast::channel(update_buffer.max(1));
        let publisher = UpdatePublisher {
            update_tx: update_tx.clone(),
            last_snapshot: None,
        };

        (
            Self {
                command_tx,
                update_tx,
            },
            publisher,
            command_rx,
        )
    }

    pub fn subscribe(&self) -> UpdateStream {
        self.update_tx.subscribe()
    }

    pub async fn send_command(&self, command: SessionCommand) -> Result<(), SessionChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SessionChannelError::RuntimeStopped)
    }

    /// Queue a command without waiting. Meant for viewport callbacks that run
    /// on a UI thread and cannot await.
    pub fn try_send_command(&self, command: SessionCommand) -> Result<(), SessionChannelError> {
        self.command_tx.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => SessionChannelError::QueueFull {
                capacity: self.command_tx.max_capacity(),
            },
            TrySendError::Closed(_) => SessionChannelError::RuntimeStopped,
        })
    }
}

/// Runtime side of the update stream.
#[derive(Debug)]
pub struct UpdatePublisher {
    update_tx: broadcast::Sender<SessionUpdate>,
    last_snapshot: Option<WindowSnapshot>,
}

impl UpdatePublisher {
    /// Send to every subscriber. Having none is not an error.
    pub fn emit(&self, update: SessionUpdate) {
        if self.update_tx.send(update).is_err() {
            trace!("no update subscribers");
        }
    }

    /// Emit `snapshot` unless it equals the last one published. Returns
    /// whether it was sent.
    pub fn publish_snapshot(&mut self, snapshot: WindowSnapshot) -> bool {
        if self.last_snapshot.as_ref() == Some(&snapshot) {
            return false;
        }
        self.last_snapshot = Some(snapshot.clone());
        self.emit(SessionUpdate::Snapshot(snapshot));
        true
    }
}
