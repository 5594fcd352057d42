use tracing::{debug, trace};

use crate::{
    types::{ChannelMetadata, Message, MessageId, NewMessageIndicator, PushEvent},
    window::MessageWindow,
};

/// New-message counter whose exact value stops at a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewMessageCounter {
    count: u32,
    cap: u32,
}

impl NewMessageCounter {
    pub fn new(cap: u32) -> Self {
        Self {
            count: 0,
            cap: cap.max(1),
        }
    }

    pub fn increment(&mut self) {
        // One past the cap is enough to switch to "more than N".
        self.count = self.count.saturating_add(1).min(self.cap.saturating_add(1));
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn indicator(&self) -> NewMessageIndicator {
        match self.count {
            0 => NewMessageIndicator::None,
            n if n > self.cap => NewMessageIndicator::MoreThan(self.cap),
            n => NewMessageIndicator::Exact(n),
        }
    }
}

/// What a push event did to the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Appended at the live edge; the UI should follow the tail.
    Appended,
    /// Held in overflow while the user is scrolled away.
    Buffered,
    /// Window is mid-history; only the new-message count changed.
    Counted,
    /// Existing row replaced in place.
    Updated,
    /// Row removed.
    Removed(MessageId),
    /// Forward to the channel-metadata collaborator.
    MetadataChanged(ChannelMetadata),
    /// Update for a row the window does not hold. It may still be a
    /// confirmed send waiting in the sent cache.
    StrayUpdate(Message),
    /// Delete for a row the window does not hold.
    StrayDelete(MessageId),
    /// Event for another channel.
    Ignored,
}

/// Folds push events for one channel into its window.
#[derive(Debug, Clone)]
pub struct RealtimeEventMerger {
    channel_id: String,
    counter: NewMessageCounter,
}

impl RealtimeEventMerger {
    pub fn new(channel_id: impl Into<String>, new_message_cap: u32) -> Self {
        Self {
            channel_id: channel_id.into(),
            counter: NewMessageCounter::new(new_message_cap),
        }
    }

    pub fn new_messages(&self) -> NewMessageIndicator {
        self.counter.indicator()
    }

    pub fn reset_new_messages(&mut self) {
        self.counter.reset();
    }

    /// Apply one push event.
    pub fn apply(
        &mut self,
        event: PushEvent,
        window: &mut MessageWindow,
        scroll_locked: bool,
    ) -> MergeOutcome {
        if event.channel_id() != self.channel_id {
            trace!(
                event_channel = event.channel_id(),
                channel_id = %self.channel_id,
                "ignoring push event for another channel"
            );
            return MergeOutcome::Ignored;
        }

        match event {
            PushEvent::MessageReceived { message, .. } => {
                self.received(message, window, scroll_locked)
            }
            PushEvent::MessageUpdated { message, .. } => {
                if window.contains(message.id) {
                    window.upsert(message);
                    MergeOutcome::Updated
                } else {
                    MergeOutcome::StrayUpdate(message)
                }
            }
            PushEvent::MessageDeleted { message_id, .. } => match window.remove(message_id) {
                Some(_) => MergeOutcome::Removed(message_id),
                None => MergeOutcome::StrayDelete(message_id),
            },
            PushEvent::ChannelChanged { metadata, .. } => MergeOutcome::MetadataChanged(metadata),
        }
    }

    fn received(
        &mut self,
        message: Message,
        window: &mut MessageWindow,
        scroll_locked: bool,
    ) -> MergeOutcome {
        if window.contains(message.id) {
            window.upsert(message);
            return MergeOutcome::Updated;
        }

        if window.has_newer() {
            // Splicing here would break the anchored position; a later
            // `fetch_newer` brings the row in.
            self.counter.increment();
            debug!(message_id = message.id, "received while mid-history");
            return MergeOutcome::Counted;
        }

        if scroll_locked {
            window.push_overflow(message);
            self.counter.increment();
            return MergeOutcome::Buffered;
        }

        window.collapse_to_latest(Some(message));
        MergeOutcome::Appended
    }
}
