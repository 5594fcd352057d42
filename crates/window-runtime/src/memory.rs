use std::{collections::HashMap, time::Duration};

use tokio::{sync::Mutex, time::sleep};
use tracing::trace;
use window_core::{
    ApiError, ErrorCategory, HistoryQuery, Message, MessageId, MessageKind, OutgoingFile,
    bounded_page_limit, classify_send_error_message,
};

use crate::ChannelBackend;

const SERVER_PAGE_CAP: u16 = 100;
const BASE_TIME_MS: u64 = 1_700_000_000_000;
const SELF_SENDER: &str = "me";

#[derive(Debug)]
struct MemoryState {
    channels: HashMap<String, Vec<Message>>,
    next_id: MessageId,
    clock_ms: u64,
    fail_next_fetch: Option<ApiError>,
    fail_next_send: Option<ApiError>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            channels: HashMap::new(),
            next_id: 1,
            clock_ms: BASE_TIME_MS,
            fail_next_fetch: None,
            fail_next_send: None,
        }
    }
}

impl MemoryState {
    fn create(
        &mut self,
        channel_id: &str,
        kind: MessageKind,
        sender_id: Option<String>,
        body: String,
        file_ref: Option<String>,
    ) -> Message {
        let message = Message {
            id: self.next_id,
            channel_id: channel_id.to_owned(),
            created_at: self.clock_ms,
            kind,
            sender_id,
            body,
            file_ref,
            is_removed: false,
        };
        self.next_id += 1;
        self.clock_ms += 1_000;
        self.channels
            .entry(channel_id.to_owned())
            .or_default()
            .push(message.clone());
        message
    }
}

/// Channel history kept in process memory, served with the same cursor
/// semantics as the remote API.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
    latency: Duration,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Append `count` user messages to `channel_id`.
    pub async fn seed(&self, channel_id: &str, count: usize) -> Vec<Message> {
        let mut state = self.state.lock().await;
        (0..count)
            .map(|n| {
                state.create(
                    channel_id,
                    MessageKind::User,
                    Some(format!("user-{}", n % 7)),
                    format!("message {n}"),
                    None,
                )
            })
            .collect()
    }

    /// Store a message from another participant, as the push stream would
    /// announce it.
    pub async fn post(&self, channel_id: &str, sender_id: &str, body: &str) -> Message {
        self.state.lock().await.create(
            channel_id,
            MessageKind::User,
            Some(sender_id.to_owned()),
            body.to_owned(),
            None,
        )
    }

    /// Delete a stored message. Returns `false` when it does not exist.
    pub async fn delete(&self, channel_id: &str, message_id: MessageId) -> bool {
        let mut state = self.state.lock().await;
        let Some(rows) = state.channels.get_mut(channel_id) else {
            return false;
        };
        let before = rows.len();
        rows.retain(|row| row.id != message_id);
        before != rows.len()
    }

    /// Fail the next history query with `error`.
    pub async fn fail_next_fetch(&self, error: ApiError) {
        self.state.lock().await.fail_next_fetch = Some(error);
    }

    /// Fail the next send with a network error carrying `message`.
    pub async fn fail_next_send(&self, message: &str) {
        self.state.lock().await.fail_next_send = Some(classify_send_error_message(message));
    }

    pub async fn messages(&self, channel_id: &str) -> Vec<Message> {
        self.state
            .lock()
            .await
            .channels
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
    }
}

impl ChannelBackend for InMemoryBackend {
    async fn fetch_messages(&self, mut query: HistoryQuery) -> Result<Vec<Message>, ApiError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        if let Some(error) = state.fail_next_fetch.take() {
            return Err(error);
        }

        let cap = |limit: u16| {
            if limit == 0 {
                0
            } else {
                bounded_page_limit(limit, SERVER_PAGE_CAP)
            }
        };
        query.prev_limit = cap(query.prev_limit);
        query.next_limit = cap(query.next_limit);

        let rows = state
            .channels
            .get(&query.channel_id)
            .map(|rows| query.select(rows))
            .unwrap_or_default();
        trace!(channel_id = %query.channel_id, rows = rows.len(), "served history query");
        Ok(rows)
    }

    async fn send_text(&self, channel_id: String, body: String) -> Result<Message, ApiError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        if let Some(error) = state.fail_next_send.take() {
            return Err(error);
        }
        if body.trim().is_empty() {
            return Err(ApiError::new(
                ErrorCategory::Config,
                "empty_message",
                "message body is empty",
            ));
        }

        Ok(state.create(
            &channel_id,
            MessageKind::User,
            Some(SELF_SENDER.to_owned()),
            body,
            None,
        ))
    }

    async fn send_file(&self, channel_id: String, file: OutgoingFile) -> Result<Message, ApiError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        if let Some(error) = state.fail_next_send.take() {
            return Err(error);
        }

        let file_ref = format!("memory://{channel_id}/{}", file.name);
        Ok(state.create(
            &channel_id,
            MessageKind::File,
            Some(SELF_SENDER.to_owned()),
            file.name,
            Some(file_ref),
        ))
    }
}

#[cfg(test)]
mod tests {
    use window_core::{CursorAnchor, MessageCursor, WindowConfig};

    use super::*;

    #[tokio::test]
    async fn serves_latest_and_cursor_pages() {
        let backend = InMemoryBackend::new();
        let seeded = backend.seed("group-1", 10).await;
        backend.seed("group-2", 3).await;

        let latest = backend
            .fetch_messages(HistoryQuery::latest("group-1", 4))
            .await
            .expect("latest");
        let ids: Vec<_> = latest.iter().map(|m| m.id).collect();
        assert_eq!(ids, seeded[6..].iter().map(|m| m.id).collect::<Vec<_>>());

        let config = WindowConfig {
            page_limit: 3,
            ..WindowConfig::group_channel()
        };
        let older = backend
            .fetch_messages(MessageCursor::older_than(&seeded[5]).to_query("group-1", &config))
            .await
            .expect("older");
        assert_eq!(older.len(), 3);
        assert_eq!(older.last().map(|m| m.id), Some(seeded[4].id));

        let around = backend
            .fetch_messages(
                MessageCursor::around(CursorAnchor::Timestamp(seeded[5].created_at))
                    .to_query("group-1", &config),
            )
            .await
            .expect("around");
        assert!(around.iter().any(|m| m.id == seeded[5].id));
    }

    #[tokio::test]
    async fn injected_failures_are_one_shot() {
        let backend = InMemoryBackend::new();
        backend.seed("group-1", 2).await;
        backend
            .fail_next_fetch(ApiError::from_http_status(503, "unavailable"))
            .await;

        let err = backend
            .fetch_messages(HistoryQuery::latest("group-1", 50))
            .await
            .expect_err("injected failure");
        assert_eq!(err.category, ErrorCategory::Network);
        assert!(backend.fetch_messages(HistoryQuery::latest("group-1", 50)).await.is_ok());

        backend.fail_next_send("reset").await;
        let err = backend
            .send_text("group-1".into(), "hi".into())
            .await
            .expect_err("injected send failure");
        assert_eq!(err.code, "send_failed");
        assert!(backend.send_text("group-1".into(), "hi".into()).await.is_ok());
    }

    #[tokio::test]
    async fn sends_get_increasing_ids_and_timestamps() {
        let backend = InMemoryBackend::new();
        let seeded = backend.seed("group-1", 1).await;
        let text = backend
            .send_text("group-1".into(), "hello".into())
            .await
            .expect("text");
        let file = backend
            .send_file(
                "group-1".into(),
                OutgoingFile {
                    name: "report.pdf".into(),
                    content_type: "application/pdf".into(),
                    data: vec![1, 2, 3],
                },
            )
            .await
            .expect("file");

        assert!(text.id > seeded[0].id && file.id > text.id);
        assert!(file.created_at > text.created_at);
        assert_eq!(file.kind, MessageKind::File);
        assert_eq!(file.file_ref.as_deref(), Some("memory://group-1/report.pdf"));
        assert_eq!(backend.messages("group-1").await.len(), 3);

        assert!(backend.delete("group-1", text.id).await);
        assert!(!backend.delete("group-1", text.id).await);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let backend = InMemoryBackend::new();
        let err = backend
            .send_text("group-1".into(), "   ".into())
            .await
            .expect_err("empty body");
        assert_eq!(err.code, "empty_message");
    }
}
