//! Message window synchronization engine for chat moderation views.
//!
//! Keeps an ordered, bounded window of channel messages consistent across
//! cursor-based history fetches, real-time push events and optimistic local
//! sends. The engine is I/O free: [`session::ChannelSession`] consumes events
//! and returns effects for a runtime to execute.

/// Async command/update channel primitives.
pub mod channel;
/// Cursor anchors, history queries and page-size bounds.
pub mod cursor;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Per-direction fetch lifecycle.
pub mod fetch_state;
/// Push event merging and new-message counting.
pub mod merger;
/// Send acknowledgement and fetch failure normalization.
pub mod normalization;
/// Fetch issuing, response validation and window updates.
pub mod pagination;
/// Scroll lock and anchor preservation.
pub mod scroll;
/// Optimistic echoes awaiting reconciliation.
pub mod sent_cache;
/// Channel session reducer tying the components together.
pub mod session;
/// UI-facing protocol types (commands, updates, snapshots).
pub mod types;
/// Ordered, bounded message window.
pub mod window;

pub use channel::{SessionChannelError, SessionChannels, UpdatePublisher, UpdateStream};
pub use cursor::{
    CursorAnchor, CursorDirection, HistoryQuery, MAX_PAGE_LIMIT, MessageCursor, bounded_page_limit,
};
pub use error::{ApiError, ErrorCategory, WindowError, classify_http_status};
pub use fetch_state::{FetchRequest, FetchRequests};
pub use merger::{MergeOutcome, NewMessageCounter, RealtimeEventMerger};
pub use normalization::{
    SendOutcome, classify_send_error_message, normalize_fetch_failure, normalize_send_outcome,
};
pub use pagination::{Boundary, FetchOutcome, FetchTicket, PaginationController};
pub use scroll::{ScrollAnchorCoordinator, ScrollTrigger, ViewportObserver};
pub use sent_cache::{SentEntry, SentMessageCache};
pub use session::{ChannelSession, SessionEffect, SessionEvent};
pub use types::{
    ChannelMetadata, DeliveryState, DisplayItem, FetchDirection, FetchStatus, FetchStatusSet,
    Message, MessageId, MessageKind, NewMessageIndicator, OutgoingFile, OutgoingMessage,
    PushEvent, ScrollAction, SendAck, SessionCommand, SessionUpdate, WindowConfig, WindowSnapshot,
};
