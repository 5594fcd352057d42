use serde::{Deserialize, Serialize};

use crate::types::{Message, MessageId, WindowConfig};

/// Hard server cap on rows per history request.
pub const MAX_PAGE_LIMIT: u16 = 100;

/// Reference point of a history request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CursorAnchor {
    /// Anchor on a known message.
    MessageId(MessageId),
    /// Anchor on a point in time (milliseconds since Unix epoch).
    Timestamp(u64),
}

/// Direction a cursor pages toward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CursorDirection {
    Older,
    Newer,
    Around,
}

/// Opaque pagination token produced by one fetch and consumed by the next
/// fetch in the same direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageCursor {
    pub direction: CursorDirection,
    pub anchor: CursorAnchor,
    pub inclusive: bool,
}

impl MessageCursor {
    /// Cursor for the page strictly before `message`.
    pub fn older_than(message: &Message) -> Self {
        Self {
            direction: CursorDirection::Older,
            anchor: CursorAnchor::MessageId(message.id),
            inclusive: false,
        }
    }

    /// Cursor for the page strictly after `message`.
    pub fn newer_than(message: &Message) -> Self {
        Self {
            direction: CursorDirection::Newer,
            anchor: CursorAnchor::MessageId(message.id),
            inclusive: false,
        }
    }

    /// Cursor for a page centred on `anchor`, anchor row included.
    pub fn around(anchor: CursorAnchor) -> Self {
        Self {
            direction: CursorDirection::Around,
            anchor,
            inclusive: true,
        }
    }

    /// Build the history query for this cursor.
    pub fn to_query(&self, channel_id: &str, config: &WindowConfig) -> HistoryQuery {
        let (prev_limit, next_limit) = match self.direction {
            CursorDirection::Older => (config.page_limit, 0),
            CursorDirection::Newer => (0, config.page_limit),
            CursorDirection::Around => (config.around_prev_limit, config.around_next_limit),
        };

        HistoryQuery {
            channel_id: channel_id.to_owned(),
            anchor: Some(self.anchor),
            prev_limit,
            next_limit,
            inclusive: self.inclusive,
        }
    }
}

/// Request accepted by the history API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryQuery {
    pub channel_id: String,
    /// `None` means "now" (the live edge).
    pub anchor: Option<CursorAnchor>,
    /// Rows requested before the anchor.
    pub prev_limit: u16,
    /// Rows requested after the anchor.
    pub next_limit: u16,
    /// Whether the anchor row itself is included.
    pub inclusive: bool,
}

impl HistoryQuery {
    /// Query for the newest `limit` rows.
    pub fn latest(channel_id: &str, limit: u16) -> Self {
        Self {
            channel_id: channel_id.to_owned(),
            anchor: None,
            prev_limit: limit,
            next_limit: 0,
            inclusive: true,
        }
    }

    /// Evaluate this query against rows sorted by `created_at`.
    ///
    /// A message-id anchor that is not present selects nothing.
    pub fn select(&self, rows: &[Message]) -> Vec<Message> {
        let rows: Vec<&Message> = rows
            .iter()
            .filter(|row| row.channel_id == self.channel_id)
            .collect();

        let (before_end, anchor_start, after_start) = match self.anchor {
            None => (rows.len(), rows.len(), rows.len()),
            Some(CursorAnchor::MessageId(id)) => {
                let Some(idx) = rows.iter().position(|row| row.id == id) else {
                    return Vec::new();
                };
                (idx, idx, idx + 1)
            }
            Some(CursorAnchor::Timestamp(ts)) => {
                let lo = rows.partition_point(|row| row.created_at < ts);
                let hi = rows.partition_point(|row| row.created_at <= ts);
                (lo, lo, hi)
            }
        };

        let start = before_end.saturating_sub(usize::from(self.prev_limit));
        let end = after_start
            .saturating_add(usize::from(self.next_limit))
            .min(rows.len());

        let mut selected: Vec<Message> = rows[start..before_end].iter().copied().cloned().collect();
        if self.inclusive {
            selected.extend(rows[anchor_start..after_start].iter().copied().cloned());
        }
        selected.extend(rows[after_start..end].iter().copied().cloned());
        selected
    }
}

/// Clamp a requested page size against safety and server caps.
///
/// The result is always in `1..=MAX_PAGE_LIMIT`.
pub fn bounded_page_limit(requested: u16, server_cap: u16) -> u16 {
    let safe_requested = requested.max(1);
    let safe_cap = server_cap.max(1);
    safe_requested.min(safe_cap).min(MAX_PAGE_LIMIT)
}
