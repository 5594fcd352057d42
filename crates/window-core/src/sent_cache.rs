use tracing::{debug, trace};

use crate::types::{DeliveryState, DisplayItem, Message, MessageId, OutgoingMessage};

/// One locally sent message awaiting reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEntry {
    /// Transaction id echoed in `SendAck`.
    pub client_txn_id: String,
    /// Temporary negative id assigned at staging time.
    pub local_id: MessageId,
    /// Optimistic echo, replaced by the server message once confirmed.
    pub message: Message,
    /// Server id once the send resolved.
    pub confirmed_id: Option<MessageId>,
    /// Delivery state shown next to the echo.
    pub state: DeliveryState,
    /// Original draft, kept for resend.
    pub draft: OutgoingMessage,
}

/// Locally sent messages not yet present in the window.
#[derive(Debug, Clone)]
pub struct SentMessageCache {
    entries: Vec<SentEntry>,
    next_local_id: MessageId,
}

impl Default for SentMessageCache {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_local_id: -1,
        }
    }
}

impl SentMessageCache {
    pub fn entries(&self) -> &[SentEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stage an optimistic echo before the network call resolves.
    pub fn stage(
        &mut self,
        client_txn_id: impl Into<String>,
        channel_id: &str,
        sender_id: Option<String>,
        created_at: u64,
        draft: OutgoingMessage,
    ) -> &SentEntry {
        let local_id = self.next_local_id;
        self.next_local_id -= 1;

        let message = Message {
            id: local_id,
            channel_id: channel_id.to_owned(),
            created_at,
            kind: draft.kind(),
            sender_id,
            body: draft.display_body(),
            file_ref: None,
            is_removed: false,
        };
        self.entries.push(SentEntry {
            client_txn_id: client_txn_id.into(),
            local_id,
            message,
            confirmed_id: None,
            state: DeliveryState::Pending,
            draft,
        });
        debug!(local_id, "staged optimistic send");

        let idx = self.entries.len() - 1;
        &self.entries[idx]
    }

    /// Record the server copy of a sent message. Returns the local id of the
    /// confirmed entry.
    pub fn confirm(&mut self, client_txn_id: &str, server: Message) -> Option<MessageId> {
        let entry = self.find_by_txn_mut(client_txn_id)?;
        entry.confirmed_id = Some(server.id);
        entry.message = server;
        entry.state = DeliveryState::Confirmed;
        Some(entry.local_id)
    }

    /// Mark a send as failed. The entry is retained for resend.
    pub fn fail(&mut self, client_txn_id: &str) -> Option<MessageId> {
        let entry = self.find_by_txn_mut(client_txn_id)?;
        if entry.state == DeliveryState::Confirmed {
            return None;
        }
        entry.state = DeliveryState::Failed;
        Some(entry.local_id)
    }

    /// Move a failed entry back to pending. Returns what must be re-sent.
    pub fn mark_resend(&mut self, local_id: MessageId) -> Option<(String, OutgoingMessage)> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.local_id == local_id && entry.state == DeliveryState::Failed)?;
        entry.state = DeliveryState::Pending;
        Some((entry.client_txn_id.clone(), entry.draft.clone()))
    }

    /// Drop a failed entry.
    pub fn discard_failed(&mut self, local_id: MessageId) -> Option<SentEntry> {
        let idx = self
            .entries
            .iter()
            .position(|entry| entry.local_id == local_id && entry.state == DeliveryState::Failed)?;
        Some(self.entries.remove(idx))
    }

    /// Forget a confirmed entry whose server message was deleted.
    pub fn drop_confirmed(&mut self, message_id: MessageId) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.confirmed_id != Some(message_id));
        before != self.entries.len()
    }

    /// Apply a server edit to a confirmed entry. The echo keeps its original
    /// `created_at`.
    pub fn update_confirmed(&mut self, message: Message) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.confirmed_id == Some(message.id))
        else {
            return false;
        };
        entry.message = Message {
            created_at: entry.message.created_at,
            ..message
        };
        true
    }

    pub fn local_id_for(&self, client_txn_id: &str) -> Option<MessageId> {
        self.entries
            .iter()
            .find(|entry| entry.client_txn_id == client_txn_id)
            .map(|entry| entry.local_id)
    }

    /// Drop confirmed entries whose server id appears in `messages`.
    ///
    /// Scans from the newest message backward and stops as soon as no
    /// confirmed entry is left to match. Returns the number of removed entries.
    pub fn reconcile(&mut self, messages: &[Message]) -> usize {
        let before = self.entries.len();
        let mut outstanding = self.confirmed_count();

        for message in messages.iter().rev() {
            if outstanding == 0 {
                break;
            }
            if let Some(idx) = self
                .entries
                .iter()
                .position(|entry| entry.confirmed_id == Some(message.id))
            {
                self.entries.remove(idx);
                outstanding -= 1;
            }
        }

        let removed = before - self.entries.len();
        if removed > 0 {
            trace!(removed, remaining = self.entries.len(), "reconciled sent messages");
        }
        removed
    }

    /// Display rows for entries still awaiting reconciliation, in send order.
    pub fn display_items(&self) -> impl Iterator<Item = DisplayItem> + '_ {
        self.entries.iter().map(|entry| DisplayItem {
            message: entry.message.clone(),
            delivery: entry.state,
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn confirmed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.confirmed_id.is_some())
            .count()
    }

    fn find_by_txn_mut(&mut self, client_txn_id: &str) -> Option<&mut SentEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.client_txn_id == client_txn_id)
    }
}
