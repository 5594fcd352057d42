use tracing::trace;

use crate::types::{Message, MessageId};

/// Ordered, id-unique in-memory message window with an optional capacity.
///
/// `messages` is sorted by `created_at` (ties keep insertion order). `overflow`
/// holds rows newer than `messages` that were pushed off-window while the user
/// was scrolled away; it is drained back on request. `has_newer` refers to
/// server rows not yet fetched past `messages ++ overflow`.
#[derive(Debug, Clone)]
pub struct MessageWindow {
    messages: Vec<Message>,
    overflow: Vec<Message>,
    has_older: bool,
    has_newer: bool,
    capacity: Option<usize>,
}

impl MessageWindow {
    /// Create an empty window. A finite capacity is at least 1.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            messages: Vec::new(),
            overflow: Vec::new(),
            has_older: false,
            has_newer: false,
            capacity: capacity.map(|cap| cap.max(1)),
        }
    }

    /// Displayed rows in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Off-window rows newer than `messages`.
    pub fn overflow(&self) -> &[Message] {
        &self.overflow
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_older(&self) -> bool {
        self.has_older
    }

    pub fn has_newer(&self) -> bool {
        self.has_newer
    }

    /// Rows exist past the displayed tail, either on the server or in overflow.
    pub fn has_more_newer(&self) -> bool {
        self.has_newer || !self.overflow.is_empty()
    }

    /// The window shows the newest known rows.
    pub fn is_at_live_edge(&self) -> bool {
        !self.has_more_newer()
    }

    pub fn set_has_older(&mut self, has_older: bool) {
        self.has_older = has_older;
    }

    pub fn set_has_newer(&mut self, has_newer: bool) {
        self.has_newer = has_newer;
    }

    pub fn first(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether `id` is held in `messages` or `overflow`.
    pub fn contains(&self, id: MessageId) -> bool {
        position(&self.messages, id).is_some() || position(&self.overflow, id).is_some()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages
            .iter()
            .chain(self.overflow.iter())
            .find(|message| message.id == id)
    }

    /// Replace every row and both bounds. Overflow is discarded.
    pub fn replace(&mut self, rows: Vec<Message>, has_older: bool, has_newer: bool) {
        self.messages.clear();
        self.overflow.clear();
        self.has_older = has_older;
        self.has_newer = has_newer;
        self.merge(rows);
        self.evict_oldest();
    }

    /// Merge rows toward the live edge. When over capacity the oldest rows
    /// are dropped and `has_older` is set so they can be fetched again.
    /// Returns the number of evicted rows.
    pub fn append(&mut self, rows: Vec<Message>) -> usize {
        self.merge(rows);
        self.evict_oldest()
    }

    /// Merge older rows. When over capacity the newest rows spill into the
    /// front of `overflow`. Returns the number of spilled rows.
    pub fn prepend(&mut self, rows: Vec<Message>) -> usize {
        self.merge(rows);
        self.spill_newest()
    }

    /// Merge rows that continue past the tail. While `overflow` holds rows
    /// they land there, so `overflow` stays newer than `messages`.
    pub fn extend_tail(&mut self, rows: Vec<Message>) -> usize {
        if self.overflow.is_empty() {
            return self.append(rows);
        }
        for row in rows {
            self.push_overflow(row);
        }
        0
    }

    /// Replace a held row in place. Returns `false` when the id is unknown.
    pub fn upsert(&mut self, message: Message) -> bool {
        if position(&self.messages, message.id).is_some() {
            upsert_sorted(&mut self.messages, message);
            true
        } else if position(&self.overflow, message.id).is_some() {
            upsert_sorted(&mut self.overflow, message);
            true
        } else {
            false
        }
    }

    /// Remove a row from `messages` or `overflow`.
    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        if let Some(idx) = position(&self.messages, id) {
            return Some(self.messages.remove(idx));
        }
        position(&self.overflow, id).map(|idx| self.overflow.remove(idx))
    }

    /// Hold a live row off-window. Rows already displayed are updated in place.
    pub fn push_overflow(&mut self, message: Message) {
        if position(&self.messages, message.id).is_some() {
            upsert_sorted(&mut self.messages, message);
        } else {
            upsert_sorted(&mut self.overflow, message);
        }
    }

    /// Move up to `capacity` rows (all rows when unbounded) from the front of
    /// `overflow` into `messages`. Returns the number of moved rows.
    pub fn drain_overflow(&mut self) -> usize {
        let take = self
            .capacity
            .unwrap_or(usize::MAX)
            .min(self.overflow.len());
        if take == 0 {
            return 0;
        }

        let drained: Vec<Message> = self.overflow.drain(..take).collect();
        self.append(drained);
        trace!(moved = take, remaining = self.overflow.len(), "drained overflow");
        take
    }

    /// Fold `messages ++ overflow ++ incoming`, keep the most recent
    /// `capacity` rows and clear `overflow`. Returns the number of evicted rows.
    pub fn collapse_to_latest(&mut self, incoming: Option<Message>) -> usize {
        let mut rows = std::mem::take(&mut self.overflow);
        rows.extend(incoming);
        self.append(rows)
    }

    fn merge(&mut self, rows: Vec<Message>) {
        for row in rows {
            if let Some(idx) = position(&self.overflow, row.id) {
                self.overflow.remove(idx);
            }
            upsert_sorted(&mut self.messages, row);
        }
    }

    fn evict_oldest(&mut self) -> usize {
        let Some(capacity) = self.capacity else {
            return 0;
        };
        if self.messages.len() <= capacity {
            return 0;
        }

        let excess = self.messages.len() - capacity;
        self.messages.drain(0..excess);
        self.has_older = true;
        trace!(evicted = excess, capacity, "evicted oldest rows");
        excess
    }

    fn spill_newest(&mut self) -> usize {
        let Some(capacity) = self.capacity else {
            return 0;
        };
        if self.messages.len() <= capacity {
            return 0;
        }

        let spill: Vec<Message> = self.messages.drain(capacity..).collect();
        let spilled = spill.len();
        for message in spill {
            upsert_sorted(&mut self.overflow, message);
        }
        trace!(spilled, capacity, "spilled newest rows into overflow");
        spilled
    }
}

fn position(list: &[Message], id: MessageId) -> Option<usize> {
    list.iter().position(|message| message.id == id)
}

/// Insert keeping `created_at` order; equal timestamps go after existing rows.
/// An existing row with the same id is replaced where it stands and keeps its
/// original `created_at`.
fn upsert_sorted(list: &mut Vec<Message>, message: Message) {
    if let Some(idx) = position(list, message.id) {
        let created_at = list[idx].created_at;
        list[idx] = Message {
            created_at,
            ..message
        };
        return;
    }

    let at = list.partition_point(|existing| existing.created_at <= message.created_at);
    list.insert(at, message);
}
