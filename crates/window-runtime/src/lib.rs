//! Async runtime hosting one channel session at a time.
//!
//! Commands arrive on an `mpsc` channel, history and send calls run as
//! spawned tasks against a [`ChannelBackend`], and snapshots/updates fan out
//! over `broadcast`.

use std::{
    future::Future,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use window_core::{
    ApiError, ChannelSession, FetchTicket, HistoryQuery, Message, MessageId, OutgoingFile,
    OutgoingMessage, SessionChannelError, SessionChannels, SessionCommand, SessionEffect,
    SessionEvent, UpdatePublisher, UpdateStream, ViewportObserver, WindowConfig,
};

/// In-memory history and send collaborator.
pub mod memory;

pub use memory::InMemoryBackend;

/// History and send collaborator for one chat service.
pub trait ChannelBackend: Send + Sync + 'static {
    /// Run one history query.
    fn fetch_messages(
        &self,
        query: HistoryQuery,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    /// Send a text message and return the server copy.
    fn send_text(
        &self,
        channel_id: String,
        body: String,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    /// Upload a file message and return the server copy.
    fn send_file(
        &self,
        channel_id: String,
        file: OutgoingFile,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;
}

/// Viewport for hosts without a rendered list; content never moves.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessViewport;

impl ViewportObserver for HeadlessViewport {
    fn measure_content_height(&self) -> f64 {
        0.0
    }
}

/// Runtime tuning.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub window: WindowConfig,
    /// Sender id stamped on optimistic echoes.
    pub sender_id: Option<String>,
    pub command_buffer: usize,
    pub update_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            sender_id: None,
            command_buffer: 128,
            update_buffer: 512,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionHandle {
    channels: SessionChannels,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionChannelError> {
        self.channels.send_command(command).await
    }

    /// Queue a command from code that cannot await.
    pub fn try_send(&self, command: SessionCommand) -> Result<(), SessionChannelError> {
        self.channels.try_send_command(command)
    }

    pub fn subscribe(&self) -> UpdateStream {
        self.channels.subscribe()
    }
}

/// Spawn the session runtime on the current tokio runtime.
pub fn spawn_session<B: ChannelBackend>(
    backend: Arc<B>,
    viewport: Arc<dyn ViewportObserver + Send + Sync>,
    config: RuntimeConfig,
) -> SessionHandle {
    let (channels, publisher, command_rx) =
        SessionChannels::new(config.command_buffer, config.update_buffer);
    let runtime = SessionRuntime::new(backend, viewport, config, publisher, command_rx);
    tokio::spawn(async move {
        runtime.run().await;
    });

    SessionHandle { channels }
}

enum Completion {
    Fetch {
        ticket: FetchTicket,
        result: Result<Vec<Message>, ApiError>,
    },
    Send {
        epoch: u64,
        client_txn_id: String,
        result: Result<Message, ApiError>,
    },
}

struct ActiveSession {
    session: ChannelSession,
    cancel: CancellationToken,
}

struct SessionRuntime<B> {
    backend: Arc<B>,
    viewport: Arc<dyn ViewportObserver + Send + Sync>,
    config: RuntimeConfig,
    publisher: UpdatePublisher,
    command_rx: mpsc::Receiver<SessionCommand>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    epoch: u64,
    active: Option<ActiveSession>,
}

impl<B: ChannelBackend> SessionRuntime<B> {
    fn new(
        backend: Arc<B>,
        viewport: Arc<dyn ViewportObserver + Send + Sync>,
        config: RuntimeConfig,
        publisher: UpdatePublisher,
        command_rx: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            viewport,
            config,
            publisher,
            command_rx,
            completion_tx,
            completion_rx,
            epoch: 0,
            active: None,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(completion) = self.completion_rx.recv() => self.handle_completion(completion),
            }
            self.publish_snapshot();
        }

        self.close();
        debug!("session runtime stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        let event = match command {
            SessionCommand::Open { channel_id } => {
                self.open(channel_id);
                return;
            }
            SessionCommand::Close => {
                self.close();
                return;
            }
            SessionCommand::FetchAround { anchor } => SessionEvent::FetchAround { anchor },
            SessionCommand::LoadOlder => SessionEvent::LoadOlder,
            SessionCommand::LoadNewer => SessionEvent::LoadNewer,
            SessionCommand::JumpToLatest => SessionEvent::JumpToLatest,
            SessionCommand::Retry { direction } => SessionEvent::Retry { direction },
            SessionCommand::SendText { body } => self.send_requested(OutgoingMessage::Text(body)),
            SessionCommand::SendFile { file } => self.send_requested(OutgoingMessage::File(file)),
            SessionCommand::Resend { local_id } => SessionEvent::Resend { local_id },
            SessionCommand::DiscardFailed { local_id } => SessionEvent::DiscardFailed { local_id },
            SessionCommand::Push(push) => SessionEvent::Push(push),
            SessionCommand::BottomVisibility { intersection_ratio } => {
                SessionEvent::BottomVisibility { intersection_ratio }
            }
            SessionCommand::TopVisibility { visible } => SessionEvent::TopVisibility { visible },
            SessionCommand::LayoutSettled => SessionEvent::LayoutSettled,
        };
        self.dispatch(event);
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Fetch { ticket, result } => {
                if ticket.epoch != self.epoch {
                    trace!(
                        issued_epoch = ticket.epoch,
                        current_epoch = self.epoch,
                        "dropping fetch result for closed session"
                    );
                    return;
                }
                self.dispatch(SessionEvent::FetchCompleted { ticket, result });
            }
            Completion::Send {
                epoch,
                client_txn_id,
                result,
            } => {
                if epoch != self.epoch {
                    debug!(%client_txn_id, "send resolved after its session closed");
                    return;
                }
                self.dispatch(SessionEvent::SendCompleted {
                    client_txn_id,
                    result,
                });
            }
        }
    }

    fn open(&mut self, channel_id: String) {
        self.close();
        self.epoch += 1;
        info!(%channel_id, epoch = self.epoch, "opening channel session");

        self.active = Some(ActiveSession {
            session: ChannelSession::new(channel_id, self.epoch, &self.config.window),
            cancel: CancellationToken::new(),
        });
        self.dispatch(SessionEvent::LoadLatest);
    }

    fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        self.epoch += 1;
        info!(channel_id = active.session.channel_id(), "closed channel session");
    }

    fn send_requested(&self, draft: OutgoingMessage) -> SessionEvent {
        SessionEvent::SendRequested {
            client_txn_id: Uuid::new_v4().to_string(),
            draft,
            sender_id: self.config.sender_id.clone(),
            now_ms: now_ms(),
        }
    }

    fn dispatch(&mut self, event: SessionEvent) {
        let Some(active) = self.active.as_mut() else {
            debug!("no open channel; ignoring session event");
            return;
        };
        let effects = active.session.apply(event, self.viewport.as_ref());
        for effect in effects {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: SessionEffect) {
        match effect {
            SessionEffect::Fetch(ticket) => self.spawn_fetch(ticket),
            SessionEffect::Send {
                client_txn_id,
                local_id,
                draft,
            } => self.spawn_send(client_txn_id, local_id, draft),
            SessionEffect::Update(update) => self.publisher.emit(update),
        }
    }

    fn spawn_fetch(&self, ticket: FetchTicket) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        debug!(
            direction = ?ticket.direction,
            epoch = ticket.epoch,
            anchor = ?ticket.query.anchor,
            "issuing history fetch"
        );

        let cancel = active.cancel.child_token();
        let backend = Arc::clone(&self.backend);
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = backend.fetch_messages(ticket.query.clone()) => result,
            };
            let _ = completion_tx.send(Completion::Fetch { ticket, result });
        });
    }

    /// Sends are not cancelled on close; the message still reaches the
    /// server and only its acknowledgement is dropped.
    fn spawn_send(&self, client_txn_id: String, local_id: MessageId, draft: OutgoingMessage) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        debug!(%client_txn_id, local_id, "sending message");

        let epoch = self.epoch;
        let channel_id = active.session.channel_id().to_owned();
        let backend = Arc::clone(&self.backend);
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = match draft {
                OutgoingMessage::Text(body) => backend.send_text(channel_id, body).await,
                OutgoingMessage::File(file) => backend.send_file(channel_id, file).await,
            };
            if let Err(err) = &result {
                warn!(%client_txn_id, code = %err.code, "send call failed");
            }
            let _ = completion_tx.send(Completion::Send {
                epoch,
                client_txn_id,
                result,
            });
        });
    }

    fn publish_snapshot(&mut self) {
        let snapshot = self
            .active
            .as_ref()
            .map(|active| active.session.snapshot())
            .unwrap_or_default();
        self.publisher.publish_snapshot(snapshot);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
