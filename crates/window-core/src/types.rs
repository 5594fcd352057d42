use serde::{Deserialize, Serialize};

use crate::{
    cursor::{CursorAnchor, MAX_PAGE_LIMIT},
    error::ApiError,
};

/// Server-assigned message identifier.
///
/// Negative values are temporary local identifiers for messages that have not
/// been confirmed by the server yet.
pub type MessageId = i64;

/// Message kind as reported by the chat API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Regular user message.
    User,
    /// Administrator/system announcement.
    Admin,
    /// File or media message.
    File,
}

/// Immutable message value held by windows and caches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Server id, or a negative local id for unconfirmed sends.
    pub id: MessageId,
    /// Owning channel.
    pub channel_id: String,
    /// Creation time in milliseconds since Unix epoch.
    pub created_at: u64,
    /// Message kind.
    pub kind: MessageKind,
    /// Sender user id, absent for admin messages.
    pub sender_id: Option<String>,
    /// Display text (file name for file messages).
    pub body: String,
    /// Remote file reference for file messages.
    pub file_ref: Option<String>,
    /// Whether the message was removed by moderation.
    pub is_removed: bool,
}

impl Message {
    /// `true` for optimistic local echoes that carry a temporary id.
    pub fn is_local(&self) -> bool {
        self.id < 0
    }
}

/// History fetch direction. Each direction owns one `FetchRequest`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FetchDirection {
    /// Older page before the window head.
    Previous,
    /// Newer page after the window tail.
    Next,
    /// Newest page at the live edge (full replace).
    Latest,
    /// Page centred on an anchor (full replace).
    Around,
}

impl FetchDirection {
    /// All directions in a stable order.
    pub const ALL: [FetchDirection; 4] = [
        FetchDirection::Previous,
        FetchDirection::Next,
        FetchDirection::Latest,
        FetchDirection::Around,
    ];

    /// Whether a successful fetch in this direction replaces the whole window.
    pub fn replaces_window(self) -> bool {
        matches!(self, FetchDirection::Latest | FetchDirection::Around)
    }
}

/// Per-direction fetch status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum FetchStatus {
    /// Never requested (or reset after being superseded).
    #[default]
    Init,
    /// Request in flight.
    Loading,
    /// Last request applied.
    Success,
    /// Last request failed; retryable.
    Fail,
}

/// Engine tuning. Defaults match the observed moderation views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowConfig {
    /// Rows requested by `fetch_latest`.
    pub latest_limit: u16,
    /// Rows requested by `fetch_older`/`fetch_newer`.
    pub page_limit: u16,
    /// Older rows requested by `fetch_around`.
    pub around_prev_limit: u16,
    /// Newer rows requested by `fetch_around`.
    pub around_next_limit: u16,
    /// Maximum in-memory message count, `None` for unbounded.
    pub capacity: Option<usize>,
    /// Exact new-message counting stops at this value.
    pub new_message_cap: u32,
}

impl WindowConfig {
    /// Unbounded window used by group-channel views.
    pub fn group_channel() -> Self {
        Self {
            latest_limit: 50,
            page_limit: 50,
            around_prev_limit: 25,
            around_next_limit: 25,
            capacity: None,
            new_message_cap: 25,
        }
    }

    /// Bounded window used by open-channel views.
    pub fn open_channel() -> Self {
        Self {
            capacity: Some(200),
            ..Self::group_channel()
        }
    }

    /// Copy of this config with every limit clamped into `1..=MAX_PAGE_LIMIT`
    /// and a non-zero capacity.
    pub fn normalized(&self) -> Self {
        let clamp = |value: u16| value.clamp(1, MAX_PAGE_LIMIT);
        Self {
            latest_limit: clamp(self.latest_limit),
            page_limit: clamp(self.page_limit),
            around_prev_limit: clamp(self.around_prev_limit),
            around_next_limit: clamp(self.around_next_limit),
            capacity: self.capacity.map(|cap| cap.max(1)),
            new_message_cap: self.new_message_cap.max(1),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::group_channel()
    }
}

/// Channel-level metadata forwarded from the push stream untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelMetadata {
    /// Channel identifier.
    pub channel_id: String,
    /// Display name, when set.
    pub name: Option<String>,
    /// Participant/member count, when reported.
    pub member_count: Option<u64>,
    /// Whether the channel is frozen by an operator.
    pub is_frozen: bool,
}

/// Real-time event delivered by the push stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PushEvent {
    /// New message created on the server.
    MessageReceived { channel_id: String, message: Message },
    /// Existing message edited.
    MessageUpdated { channel_id: String, message: Message },
    /// Message deleted.
    MessageDeleted {
        channel_id: String,
        message_id: MessageId,
    },
    /// Channel metadata changed.
    ChannelChanged {
        channel_id: String,
        metadata: ChannelMetadata,
    },
}

impl PushEvent {
    /// Channel the event is scoped to.
    pub fn channel_id(&self) -> &str {
        match self {
            PushEvent::MessageReceived { channel_id, .. }
            | PushEvent::MessageUpdated { channel_id, .. }
            | PushEvent::MessageDeleted { channel_id, .. }
            | PushEvent::ChannelChanged { channel_id, .. } => channel_id,
        }
    }
}

/// File payload for `send_file`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingFile {
    /// File name shown in the optimistic echo.
    pub name: String,
    /// MIME content type, for example `image/png`.
    pub content_type: String,
    /// Raw bytes.
    pub data: Vec<u8>,
}

/// Draft retained by the sent-message cache so failed sends can be retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutgoingMessage {
    /// Plain text message.
    Text(String),
    /// File upload.
    File(OutgoingFile),
}

impl OutgoingMessage {
    pub(crate) fn kind(&self) -> MessageKind {
        match self {
            OutgoingMessage::Text(_) => MessageKind::User,
            OutgoingMessage::File(_) => MessageKind::File,
        }
    }

    pub(crate) fn display_body(&self) -> String {
        match self {
            OutgoingMessage::Text(body) => body.clone(),
            OutgoingMessage::File(file) => file.name.clone(),
        }
    }
}

/// Delivery state of a displayed row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryState {
    /// Server-confirmed.
    Confirmed,
    /// Optimistic echo awaiting the send result.
    Pending,
    /// Send failed; kept so the user can resend.
    Failed,
}

/// One row of the merged display list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayItem {
    pub message: Message,
    pub delivery: DeliveryState,
}

/// Capped new-message signal shown while the user is away from the live edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum NewMessageIndicator {
    /// Nothing new.
    #[default]
    None,
    /// Exact count up to the cap.
    Exact(u32),
    /// Count passed the cap; shown as "more than N".
    MoreThan(u32),
}

/// Fetch status for every direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FetchStatusSet {
    pub previous: FetchStatus,
    pub next: FetchStatus,
    pub latest: FetchStatus,
    pub around: FetchStatus,
}

/// Immutable view of one channel session handed to the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WindowSnapshot {
    /// Active channel, `None` when no session is open.
    pub channel_id: Option<String>,
    /// `messages ++ unreconciled sent entries`.
    pub items: Vec<DisplayItem>,
    /// More history exists before the first row.
    pub has_older: bool,
    /// More rows exist after the last row (server or overflow).
    pub has_newer: bool,
    /// Rows held off-window.
    pub overflow_len: usize,
    /// Per-direction fetch status.
    pub fetch_status: FetchStatusSet,
    /// User scrolled away from the live edge.
    pub scroll_locked: bool,
    /// Capped new-message indicator.
    pub new_messages: NewMessageIndicator,
}

/// Viewport instruction for the UI layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ScrollAction {
    /// Scroll to the live edge.
    ScrollToBottom,
    /// Shift the scroll offset by `delta_px` to keep the top row fixed.
    AdjustScrollBy { delta_px: f64 },
}

/// Acknowledgement for a send or resend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendAck {
    /// Transaction id generated when the message was staged.
    pub client_txn_id: String,
    /// Temporary local id of the optimistic entry.
    pub local_id: MessageId,
    /// Server id on success.
    pub message_id: Option<MessageId>,
    /// Stable error code on failure.
    pub error_code: Option<String>,
}

/// Command channel input accepted by a session runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SessionCommand {
    /// Open (or switch to) a channel; discards all previous session state.
    Open { channel_id: String },
    /// Tear down the current session.
    Close,
    /// Jump to a message or timestamp.
    FetchAround { anchor: CursorAnchor },
    /// Load the next older page.
    LoadOlder,
    /// Continue toward the live edge.
    LoadNewer,
    /// Return to the live edge.
    JumpToLatest,
    /// Re-issue the last failed request in a direction.
    Retry { direction: FetchDirection },
    /// Send a text message.
    SendText { body: String },
    /// Send a file.
    SendFile { file: OutgoingFile },
    /// Resend a failed entry.
    Resend { local_id: MessageId },
    /// Drop a failed entry.
    DiscardFailed { local_id: MessageId },
    /// Real-time event from the push stream.
    Push(PushEvent),
    /// Bottom sentinel intersection ratio changed (`0.0..=1.0`).
    BottomVisibility { intersection_ratio: f32 },
    /// Top sentinel visibility changed.
    TopVisibility { visible: bool },
    /// The UI finished laying out the latest snapshot.
    LayoutSettled,
}

/// Update channel output emitted by a session runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SessionUpdate {
    /// Full view replacement.
    Snapshot(WindowSnapshot),
    /// Viewport instruction.
    Scroll(ScrollAction),
    /// Channel metadata forwarded from the push stream.
    ChannelMetadata(ChannelMetadata),
    /// Send acknowledgement.
    SendAck(SendAck),
    /// A fetch failed; retry with `SessionCommand::Retry`.
    FetchFailed {
        direction: FetchDirection,
        error: ApiError,
    },
}
