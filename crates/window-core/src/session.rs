use tracing::{debug, info, trace, warn};

use crate::{
    cursor::CursorAnchor,
    error::{ApiError, WindowError},
    merger::{MergeOutcome, RealtimeEventMerger},
    normalization::{SendOutcome, normalize_fetch_failure, normalize_send_outcome},
    pagination::{FetchOutcome, FetchTicket, PaginationController},
    scroll::{ScrollAnchorCoordinator, ScrollTrigger, ViewportObserver},
    sent_cache::SentMessageCache,
    types::{
        DeliveryState, DisplayItem, FetchDirection, Message, MessageId, OutgoingMessage, PushEvent,
        ScrollAction, SessionUpdate, WindowConfig, WindowSnapshot,
    },
    window::MessageWindow,
};

/// Input to a channel session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    LoadLatest,
    FetchAround {
        anchor: CursorAnchor,
    },
    LoadOlder,
    LoadNewer,
    JumpToLatest,
    Retry {
        direction: FetchDirection,
    },
    FetchCompleted {
        ticket: FetchTicket,
        result: Result<Vec<Message>, ApiError>,
    },
    SendRequested {
        client_txn_id: String,
        draft: OutgoingMessage,
        sender_id: Option<String>,
        now_ms: u64,
    },
    SendCompleted {
        client_txn_id: String,
        result: Result<Message, ApiError>,
    },
    Resend {
        local_id: MessageId,
    },
    DiscardFailed {
        local_id: MessageId,
    },
    Push(PushEvent),
    BottomVisibility {
        intersection_ratio: f32,
    },
    TopVisibility {
        visible: bool,
    },
    LayoutSettled,
}

/// Work requested by a channel session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    /// Run a history request and feed the result back as `FetchCompleted`.
    Fetch(FetchTicket),
    /// Run a send and feed the result back as `SendCompleted`.
    Send {
        client_txn_id: String,
        local_id: MessageId,
        draft: OutgoingMessage,
    },
    /// Forward to subscribers.
    Update(SessionUpdate),
}

/// All state of one open channel.
///
/// Every mutation goes through [`ChannelSession::apply`]; nothing outlives
/// the session, so switching channels is dropping this value and creating
/// another with a higher epoch.
#[derive(Debug, Clone)]
pub struct ChannelSession {
    channel_id: String,
    epoch: u64,
    window: MessageWindow,
    cache: SentMessageCache,
    pagination: PaginationController,
    merger: RealtimeEventMerger,
    scroll: ScrollAnchorCoordinator,
}

impl ChannelSession {
    pub fn new(channel_id: impl Into<String>, epoch: u64, config: &WindowConfig) -> Self {
        let channel_id = channel_id.into();
        let config = config.normalized();
        Self {
            window: MessageWindow::new(config.capacity),
            cache: SentMessageCache::default(),
            pagination: PaginationController::new(channel_id.clone(), epoch, &config),
            merger: RealtimeEventMerger::new(channel_id.clone(), config.new_message_cap),
            scroll: ScrollAnchorCoordinator::default(),
            channel_id,
            epoch,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn window(&self) -> &MessageWindow {
        &self.window
    }

    pub fn sent_cache(&self) -> &SentMessageCache {
        &self.cache
    }

    pub fn pagination(&self) -> &PaginationController {
        &self.pagination
    }

    pub fn scroll(&self) -> &ScrollAnchorCoordinator {
        &self.scroll
    }

    /// `messages ++ unreconciled sent entries` plus bounds and statuses.
    pub fn snapshot(&self) -> WindowSnapshot {
        let items = self
            .window
            .messages()
            .iter()
            .map(|message| DisplayItem {
                message: message.clone(),
                delivery: DeliveryState::Confirmed,
            })
            .chain(self.cache.display_items())
            .collect();

        WindowSnapshot {
            channel_id: Some(self.channel_id.clone()),
            items,
            has_older: self.window.has_older(),
            has_newer: self.window.has_more_newer(),
            overflow_len: self.window.overflow().len(),
            fetch_status: self.pagination.statuses(),
            scroll_locked: self.scroll.scroll_locked(),
            new_messages: self.merger.new_messages(),
        }
    }

    /// Apply one event and return the work it produced.
    pub fn apply(
        &mut self,
        event: SessionEvent,
        viewport: &dyn ViewportObserver,
    ) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        match event {
            SessionEvent::LoadLatest => {
                if let Some(ticket) = self.pagination.fetch_latest() {
                    effects.push(SessionEffect::Fetch(ticket));
                }
            }
            SessionEvent::FetchAround { anchor } => {
                if let Some(ticket) = self.pagination.fetch_around(anchor) {
                    info!(channel_id = %self.channel_id, ?anchor, "jumping to anchor");
                    effects.push(SessionEffect::Fetch(ticket));
                }
            }
            SessionEvent::LoadOlder => self.load_older(viewport, &mut effects),
            SessionEvent::LoadNewer => self.load_newer(false, &mut effects),
            SessionEvent::JumpToLatest => self.jump_to_latest(&mut effects),
            SessionEvent::Retry { direction } => {
                if let Some(ticket) = self.pagination.retry(direction) {
                    if direction == FetchDirection::Previous {
                        self.scroll.begin_restore(viewport);
                    }
                    effects.push(SessionEffect::Fetch(ticket));
                }
            }
            SessionEvent::FetchCompleted { ticket, result } => {
                self.fetch_completed(ticket, result, &mut effects)
            }
            SessionEvent::SendRequested {
                client_txn_id,
                draft,
                sender_id,
                now_ms,
            } => self.send_requested(client_txn_id, draft, sender_id, now_ms, &mut effects),
            SessionEvent::SendCompleted {
                client_txn_id,
                result,
            } => self.send_completed(client_txn_id, result, &mut effects),
            SessionEvent::Resend { local_id } => {
                if let Some((client_txn_id, draft)) = self.cache.mark_resend(local_id) {
                    debug!(local_id, "resending failed message");
                    effects.push(SessionEffect::Send {
                        client_txn_id,
                        local_id,
                        draft,
                    });
                }
            }
            SessionEvent::DiscardFailed { local_id } => {
                if self.cache.discard_failed(local_id).is_some() {
                    debug!(local_id, "discarded failed message");
                }
            }
            SessionEvent::Push(push) => self.push(push, &mut effects),
            SessionEvent::BottomVisibility { intersection_ratio } => {
                self.bottom_visibility(intersection_ratio, &mut effects)
            }
            SessionEvent::TopVisibility { visible } => {
                let trigger = self
                    .scroll
                    .on_top_visibility_change(visible, self.window.has_older());
                if trigger == Some(ScrollTrigger::LoadOlder) {
                    self.load_older(viewport, &mut effects);
                }
            }
            SessionEvent::LayoutSettled => {
                if let Some(action) = self.scroll.on_layout_settled(viewport) {
                    effects.push(scroll_effect(action));
                }
            }
        }
        // Any path above may have moved rows into `messages`.
        self.cache.reconcile(self.window.messages());
        effects
    }

    fn load_older(&mut self, viewport: &dyn ViewportObserver, effects: &mut Vec<SessionEffect>) {
        if !self.window.has_older() {
            trace!("no older history; ignoring load older");
            return;
        }
        if let Some(ticket) = self.pagination.fetch_older(&self.window) {
            self.scroll.begin_restore(viewport);
            effects.push(SessionEffect::Fetch(ticket));
        }
    }

    /// Drain buffered rows first; only fetch once overflow is empty.
    fn load_newer(&mut self, auto_follow: bool, effects: &mut Vec<SessionEffect>) {
        if !self.window.overflow().is_empty() {
            self.window.drain_overflow();
            if self.window.is_at_live_edge() && !self.scroll.scroll_locked() {
                self.merger.reset_new_messages();
            }
            return;
        }
        if !self.window.has_newer() {
            return;
        }
        if let Some(ticket) = self.pagination.fetch_newer(&self.window, auto_follow) {
            effects.push(SessionEffect::Fetch(ticket));
        }
    }

    fn jump_to_latest(&mut self, effects: &mut Vec<SessionEffect>) {
        self.merger.reset_new_messages();
        let action = self.scroll.jump_to_latest();

        if self.window.has_newer() || self.window.is_empty() {
            // Scrolls once the latest page lands.
            if let Some(ticket) = self.pagination.fetch_latest() {
                effects.push(SessionEffect::Fetch(ticket));
            }
            return;
        }

        let evicted = self.window.collapse_to_latest(None);
        debug!(evicted, len = self.window.len(), "collapsed to live edge");
        effects.push(scroll_effect(action));
    }

    fn fetch_completed(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<Message>, ApiError>,
        effects: &mut Vec<SessionEffect>,
    ) {
        let outcome = match self.pagination.complete(&ticket, result, &mut self.window) {
            Ok(outcome) => outcome,
            Err(WindowError::StaleResponse {
                issued_epoch,
                current_epoch,
            }) => {
                trace!(issued_epoch, current_epoch, "discarding stale fetch response");
                return;
            }
            Err(err) => {
                warn!(error = %err, code = err.code(), "fetch completion rejected");
                return;
            }
        };

        match outcome {
            FetchOutcome::Applied { direction, .. } => {
                match direction {
                    FetchDirection::Previous => self.scroll.resolve_restore(),
                    FetchDirection::Next => {
                        if self.window.is_at_live_edge() && !self.scroll.scroll_locked() {
                            self.merger.reset_new_messages();
                        }
                        if let Some(action) = self.scroll.follow_tail(ticket.auto_follow) {
                            effects.push(scroll_effect(action));
                        }
                    }
                    FetchDirection::Latest => {
                        self.scroll.cancel_restore();
                        self.merger.reset_new_messages();
                        if let Some(action) = self.scroll.follow_tail(ticket.auto_follow) {
                            effects.push(scroll_effect(action));
                        }
                    }
                    FetchDirection::Around => self.scroll.cancel_restore(),
                }
            }
            FetchOutcome::Failed { direction, error } => {
                if direction == FetchDirection::Previous {
                    self.scroll.cancel_restore();
                }
                let err = WindowError::FetchFailed {
                    direction,
                    source: error,
                };
                effects.extend(normalize_fetch_failure(err).map(SessionEffect::Update));
            }
            FetchOutcome::Superseded { direction } => {
                if direction == FetchDirection::Previous
                    && !self.pagination.is_loading(FetchDirection::Previous)
                {
                    self.scroll.cancel_restore();
                }
            }
        }
    }

    fn send_requested(
        &mut self,
        client_txn_id: String,
        draft: OutgoingMessage,
        sender_id: Option<String>,
        now_ms: u64,
        effects: &mut Vec<SessionEffect>,
    ) {
        if !self.scroll.scroll_locked() && !self.window.has_newer() {
            self.window.collapse_to_latest(None);
        }

        let entry = self
            .cache
            .stage(client_txn_id, &self.channel_id, sender_id, now_ms, draft);
        effects.push(SessionEffect::Send {
            client_txn_id: entry.client_txn_id.clone(),
            local_id: entry.local_id,
            draft: entry.draft.clone(),
        });

        if let Some(action) = self.scroll.follow_tail(true) {
            effects.push(scroll_effect(action));
        }
    }

    fn send_completed(
        &mut self,
        client_txn_id: String,
        result: Result<Message, ApiError>,
        effects: &mut Vec<SessionEffect>,
    ) {
        let Some(local_id) = self.cache.local_id_for(&client_txn_id) else {
            trace!(%client_txn_id, "send result for unknown entry");
            return;
        };

        let outcome = SendOutcome::from(result);
        effects.push(SessionEffect::Update(normalize_send_outcome(
            client_txn_id.as_str(),
            local_id,
            &outcome,
        )));

        match outcome {
            SendOutcome::Success { message } => {
                self.cache.confirm(&client_txn_id, message.clone());
                self.fold_confirmed(message, effects);
            }
            SendOutcome::Failure { error } => {
                let err = WindowError::SendFailed {
                    client_txn_id: client_txn_id.clone(),
                    source: error,
                };
                warn!(error = %err, code = err.code(), local_id, "send failed");
                self.cache.fail(&client_txn_id);
            }
        }
    }

    /// Bring a confirmed send into the window when it belongs at the live
    /// edge; otherwise leave it in the cache until a newer page covers it.
    fn fold_confirmed(&mut self, message: Message, effects: &mut Vec<SessionEffect>) {
        if self.window.contains(message.id) {
            self.window.upsert(message);
            return;
        }

        if self.window.has_newer() {
            if self.window.overflow().is_empty()
                && let Some(ticket) = self.pagination.fetch_newer(&self.window, true)
            {
                effects.push(SessionEffect::Fetch(ticket));
            }
            return;
        }

        if self.scroll.scroll_locked() {
            self.window.push_overflow(message);
        } else {
            self.window.collapse_to_latest(Some(message));
            if let Some(action) = self.scroll.follow_tail(true) {
                effects.push(scroll_effect(action));
            }
        }
    }

    fn push(&mut self, push: PushEvent, effects: &mut Vec<SessionEffect>) {
        let scroll_locked = self.scroll.scroll_locked();
        match self.merger.apply(push, &mut self.window, scroll_locked) {
            MergeOutcome::Appended => {
                if let Some(action) = self.scroll.follow_tail(true) {
                    effects.push(scroll_effect(action));
                }
            }
            MergeOutcome::Removed(message_id) | MergeOutcome::StrayDelete(message_id) => {
                if self.cache.drop_confirmed(message_id) {
                    debug!(message_id, "dropped deleted sent message");
                }
            }
            MergeOutcome::StrayUpdate(message) => {
                self.cache.update_confirmed(message);
            }
            MergeOutcome::MetadataChanged(metadata) => {
                effects.push(SessionEffect::Update(SessionUpdate::ChannelMetadata(metadata)));
            }
            MergeOutcome::Updated
            | MergeOutcome::Buffered
            | MergeOutcome::Counted
            | MergeOutcome::Ignored => {}
        }
    }

    fn bottom_visibility(&mut self, intersection_ratio: f32, effects: &mut Vec<SessionEffect>) {
        let was_locked = self.scroll.scroll_locked();
        let trigger = self
            .scroll
            .on_bottom_visibility_change(intersection_ratio, self.window.has_more_newer());

        if was_locked && !self.scroll.scroll_locked() && self.window.is_at_live_edge() {
            self.merger.reset_new_messages();
        }
        if trigger == Some(ScrollTrigger::LoadNewer) {
            self.load_newer(false, effects);
        }
    }
}

fn scroll_effect(action: ScrollAction) -> SessionEffect {
    SessionEffect::Update(SessionUpdate::Scroll(action))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use proptest::prelude::*;

    use super::*;
    use crate::{
        error::ErrorCategory,
        types::{FetchStatus, MessageKind, NewMessageIndicator},
    };

    const CHANNEL: &str = "open-1";

    #[derive(Default)]
    struct FakeViewport {
        height: Cell<f64>,
    }

    impl ViewportObserver for FakeViewport {
        fn measure_content_height(&self) -> f64 {
            self.height.get()
        }
    }

    fn msg(id: MessageId) -> Message {
        Message {
            id,
            channel_id: CHANNEL.into(),
            created_at: 10_000 + id as u64 * 10,
            kind: MessageKind::User,
            sender_id: Some("user".into()),
            body: format!("m{id}"),
            file_ref: None,
            is_removed: false,
        }
    }

    fn rows(ids: std::ops::RangeInclusive<MessageId>) -> Vec<Message> {
        ids.map(msg).collect()
    }

    fn received(id: MessageId) -> SessionEvent {
        SessionEvent::Push(PushEvent::MessageReceived {
            channel_id: CHANNEL.into(),
            message: msg(id),
        })
    }

    fn tickets(effects: &[SessionEffect]) -> Vec<FetchTicket> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                SessionEffect::Fetch(ticket) => Some(ticket.clone()),
                _ => None,
            })
            .collect()
    }

    fn single_ticket(effects: &[SessionEffect]) -> FetchTicket {
        let mut found = tickets(effects);
        assert_eq!(found.len(), 1, "expected one fetch in {effects:?}");
        found.remove(0)
    }

    fn scrolls(effects: &[SessionEffect]) -> Vec<ScrollAction> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                SessionEffect::Update(SessionUpdate::Scroll(action)) => Some(*action),
                _ => None,
            })
            .collect()
    }

    fn ids(session: &ChannelSession) -> Vec<MessageId> {
        session.snapshot().items.iter().map(|item| item.message.id).collect()
    }

    struct Harness {
        session: ChannelSession,
        viewport: FakeViewport,
    }

    impl Harness {
        fn new(config: WindowConfig) -> Self {
            Self {
                session: ChannelSession::new(CHANNEL, 1, &config),
                viewport: FakeViewport::default(),
            }
        }

        fn apply(&mut self, event: SessionEvent) -> Vec<SessionEffect> {
            self.session.apply(event, &self.viewport)
        }

        fn complete(&mut self, ticket: FetchTicket, rows: Vec<Message>) -> Vec<SessionEffect> {
            self.apply(SessionEvent::FetchCompleted {
                ticket,
                result: Ok(rows),
            })
        }

        fn open_with(&mut self, rows: Vec<Message>) {
            let effects = self.apply(SessionEvent::LoadLatest);
            let ticket = single_ticket(&effects);
            self.complete(ticket, rows);
        }

        fn send_text(&mut self, txn: &str, body: &str) -> MessageId {
            let effects = self.apply(SessionEvent::SendRequested {
                client_txn_id: txn.into(),
                draft: OutgoingMessage::Text(body.into()),
                sender_id: Some("mod".into()),
                now_ms: 99_999,
            });
            effects
                .iter()
                .find_map(|effect| match effect {
                    SessionEffect::Send { local_id, .. } => Some(*local_id),
                    _ => None,
                })
                .expect("send effect")
        }
    }

    #[test]
    fn backward_pagination_prepends_page_and_restores_anchor() {
        let mut h = Harness::new(WindowConfig {
            latest_limit: 51,
            ..WindowConfig::group_channel()
        });
        h.open_with(rows(1050..=1100));
        assert_eq!(h.session.window().len(), 50);
        assert!(h.session.window().has_older());

        h.viewport.height.set(4_000.0);
        let effects = h.apply(SessionEvent::TopVisibility { visible: true });
        let ticket = single_ticket(&effects);
        assert_eq!(ticket.query.anchor, Some(CursorAnchor::MessageId(1051)));

        h.complete(ticket, rows(1001..=1050));
        let window = h.session.window();
        assert_eq!(window.len(), 99);
        assert_eq!(window.first().map(|m| m.id), Some(1002));
        assert!(window.has_older());
        assert_eq!(h.session.pagination().statuses().previous, FetchStatus::Success);

        h.viewport.height.set(7_920.0);
        let effects = h.apply(SessionEvent::LayoutSettled);
        assert_eq!(
            scrolls(&effects),
            vec![ScrollAction::AdjustScrollBy { delta_px: 3_920.0 }]
        );
    }

    #[test]
    fn failed_backward_page_leaves_window_and_cancels_restore() {
        let mut h = Harness::new(WindowConfig::group_channel());
        h.open_with(rows(1..=50));
        let before = ids(&h.session);

        let ticket = single_ticket(&h.apply(SessionEvent::LoadOlder));
        let effects = h.apply(SessionEvent::FetchCompleted {
            ticket,
            result: Err(ApiError::new(ErrorCategory::Network, "timeout", "timed out")),
        });
        assert!(matches!(
            effects.as_slice(),
            [SessionEffect::Update(SessionUpdate::FetchFailed {
                direction: FetchDirection::Previous,
                ..
            })]
        ));
        assert_eq!(ids(&h.session), before);
        assert!(!h.session.scroll().pending_restore());

        let retry = h.apply(SessionEvent::Retry {
            direction: FetchDirection::Previous,
        });
        assert_eq!(tickets(&retry).len(), 1);
    }

    fn pinned_full_window(h: &mut Harness) {
        h.open_with(Vec::new());
        for id in 1..=200 {
            h.apply(received(id));
        }
        assert_eq!(h.session.window().len(), 200);
    }

    #[test]
    fn live_message_while_scrolled_away_goes_to_overflow() {
        let mut h = Harness::new(WindowConfig::open_channel());
        pinned_full_window(&mut h);
        h.apply(SessionEvent::BottomVisibility {
            intersection_ratio: 0.0,
        });

        let effects = h.apply(received(201));
        assert!(scrolls(&effects).is_empty());

        let window = h.session.window();
        assert_eq!(window.len(), 200);
        assert_eq!(window.last().map(|m| m.id), Some(200));
        assert_eq!(window.overflow().len(), 1);

        let snapshot = h.session.snapshot();
        assert!(snapshot.scroll_locked);
        assert!(snapshot.has_newer);
        assert_eq!(snapshot.new_messages, NewMessageIndicator::Exact(1));
    }

    #[test]
    fn jump_to_latest_collapses_overflow_into_bounded_window() {
        let mut h = Harness::new(WindowConfig::open_channel());
        pinned_full_window(&mut h);
        h.apply(SessionEvent::BottomVisibility {
            intersection_ratio: 0.0,
        });
        for id in 201..=230 {
            h.apply(received(id));
        }
        assert_eq!(h.session.snapshot().new_messages, NewMessageIndicator::MoreThan(25));

        let effects = h.apply(SessionEvent::JumpToLatest);
        assert_eq!(scrolls(&effects), vec![ScrollAction::ScrollToBottom]);
        assert!(tickets(&effects).is_empty());

        let window = h.session.window();
        assert_eq!(window.len(), 200);
        assert_eq!(window.first().map(|m| m.id), Some(31));
        assert_eq!(window.last().map(|m| m.id), Some(230));
        assert!(window.overflow().is_empty());
        assert!(window.has_older());

        let snapshot = h.session.snapshot();
        assert!(!snapshot.scroll_locked);
        assert_eq!(snapshot.new_messages, NewMessageIndicator::None);
    }

    #[test]
    fn reaching_bottom_drains_overflow_before_fetching() {
        let mut h = Harness::new(WindowConfig::open_channel());
        pinned_full_window(&mut h);
        h.apply(SessionEvent::BottomVisibility {
            intersection_ratio: 0.0,
        });
        h.apply(received(201));
        h.apply(received(202));

        let effects = h.apply(SessionEvent::BottomVisibility {
            intersection_ratio: 1.0,
        });
        assert!(tickets(&effects).is_empty());
        assert_eq!(h.session.window().last().map(|m| m.id), Some(202));
        assert!(h.session.window().overflow().is_empty());
        assert_eq!(h.session.snapshot().new_messages, NewMessageIndicator::None);
    }

    #[test]
    fn jump_from_mid_history_fetches_latest_and_scrolls_on_arrival() {
        let mut h = Harness::new(WindowConfig::group_channel());
        let ticket = single_ticket(&h.apply(SessionEvent::FetchAround {
            anchor: CursorAnchor::MessageId(26),
        }));
        h.complete(ticket, rows(1..=51));
        assert!(h.session.window().has_newer());

        h.apply(received(500));
        assert_eq!(h.session.snapshot().new_messages, NewMessageIndicator::Exact(1));

        let effects = h.apply(SessionEvent::JumpToLatest);
        assert!(scrolls(&effects).is_empty());
        let ticket = single_ticket(&effects);
        assert_eq!(ticket.direction, FetchDirection::Latest);

        let effects = h.complete(ticket, rows(460..=500));
        assert_eq!(scrolls(&effects), vec![ScrollAction::ScrollToBottom]);
        assert_eq!(h.session.window().last().map(|m| m.id), Some(500));
        assert!(!h.session.window().has_newer());
    }

    #[test]
    fn fetch_around_missing_anchor_reports_both_bounds_open() {
        let mut h = Harness::new(WindowConfig::group_channel());
        let ticket = single_ticket(&h.apply(SessionEvent::FetchAround {
            anchor: CursorAnchor::MessageId(4_242),
        }));
        h.complete(ticket, rows(1..=50));

        let snapshot = h.session.snapshot();
        assert_eq!(snapshot.items.len(), 50);
        assert!(snapshot.has_older);
        assert!(snapshot.has_newer);
        assert_eq!(snapshot.fetch_status.around, FetchStatus::Success);
    }

    #[test]
    fn sent_message_is_shown_once_through_its_lifecycle() {
        let mut h = Harness::new(WindowConfig::group_channel());
        h.open_with(rows(700..=710));

        let local_id = h.send_text("txn-1", "hi");
        assert!(local_id < 0);
        let snapshot = h.session.snapshot();
        let last = snapshot.items.last().expect("echo");
        assert_eq!(last.message.id, local_id);
        assert_eq!(last.delivery, DeliveryState::Pending);

        let mut confirmed = msg(777);
        confirmed.body = "hi".into();
        let effects = h.apply(SessionEvent::SendCompleted {
            client_txn_id: "txn-1".into(),
            result: Ok(confirmed.clone()),
        });
        assert!(effects.iter().any(|effect| matches!(
            effect,
            SessionEffect::Update(SessionUpdate::SendAck(ack))
                if ack.local_id == local_id && ack.message_id == Some(777)
        )));
        let all = ids(&h.session);
        assert_eq!(all.iter().filter(|id| **id == 777).count(), 1);
        assert!(!all.contains(&local_id));
        assert!(h.session.sent_cache().is_empty());

        // Echo of the same row from the push stream and a later page.
        h.apply(SessionEvent::Push(PushEvent::MessageReceived {
            channel_id: CHANNEL.into(),
            message: confirmed.clone(),
        }));
        assert_eq!(ids(&h.session).iter().filter(|id| **id == 777).count(), 1);
    }

    #[test]
    fn confirmed_send_mid_history_waits_for_newer_page() {
        let mut h = Harness::new(WindowConfig::group_channel());
        let ticket = single_ticket(&h.apply(SessionEvent::FetchAround {
            anchor: CursorAnchor::MessageId(26),
        }));
        h.complete(ticket, rows(1..=51));

        let local_id = h.send_text("txn-1", "hi");
        let effects = h.apply(SessionEvent::SendCompleted {
            client_txn_id: "txn-1".into(),
            result: Ok(msg(777)),
        });
        let ticket = single_ticket(&effects);
        assert_eq!(ticket.direction, FetchDirection::Next);
        assert!(ticket.auto_follow);

        let snapshot = h.session.snapshot();
        let last = snapshot.items.last().expect("confirmed echo");
        assert_eq!(last.message.id, 777);
        assert_eq!(last.delivery, DeliveryState::Confirmed);
        assert!(!ids(&h.session).contains(&local_id));

        let mut page = rows(51..=60);
        page.push(msg(777));
        h.complete(ticket, page);
        let all = ids(&h.session);
        assert_eq!(all.iter().filter(|id| **id == 777).count(), 1);
        assert!(h.session.sent_cache().is_empty());
        assert!(!h.session.window().has_newer());
    }

    #[test]
    fn confirmed_send_drained_from_overflow_is_shown_once() {
        let mut h = Harness::new(WindowConfig {
            capacity: Some(2),
            ..WindowConfig::open_channel()
        });
        h.open_with(rows(1..=2));
        h.apply(SessionEvent::BottomVisibility {
            intersection_ratio: 0.0,
        });
        h.apply(received(3));
        h.apply(received(4));

        h.send_text("txn-a", "a");
        h.apply(SessionEvent::SendCompleted {
            client_txn_id: "txn-a".into(),
            result: Ok(msg(10)),
        });
        assert_eq!(ids(&h.session).iter().filter(|id| **id == 10).count(), 1);

        h.apply(SessionEvent::BottomVisibility {
            intersection_ratio: 1.0,
        });
        let second = h.send_text("txn-b", "b");

        assert_eq!(ids(&h.session), vec![4, 10, second]);
        assert_eq!(h.session.sent_cache().len(), 1);
    }

    #[test]
    fn edits_and_deletes_reach_a_confirmed_send_held_mid_history() {
        let mut h = Harness::new(WindowConfig::group_channel());
        let ticket = single_ticket(&h.apply(SessionEvent::FetchAround {
            anchor: CursorAnchor::MessageId(26),
        }));
        h.complete(ticket, rows(1..=51));
        h.send_text("txn-1", "hi");
        h.apply(SessionEvent::SendCompleted {
            client_txn_id: "txn-1".into(),
            result: Ok(msg(777)),
        });

        let mut edited = msg(777);
        edited.body = "hi (edited)".into();
        h.apply(SessionEvent::Push(PushEvent::MessageUpdated {
            channel_id: CHANNEL.into(),
            message: edited,
        }));
        let snapshot = h.session.snapshot();
        let last = snapshot.items.last().expect("confirmed echo");
        assert_eq!((last.message.id, last.message.body.as_str()), (777, "hi (edited)"));

        h.apply(SessionEvent::Push(PushEvent::MessageDeleted {
            channel_id: CHANNEL.into(),
            message_id: 777,
        }));
        assert!(!ids(&h.session).contains(&777));
        assert!(h.session.sent_cache().is_empty());
    }

    #[test]
    fn failed_send_is_kept_for_resend_or_discard() {
        let mut h = Harness::new(WindowConfig::group_channel());
        h.open_with(rows(1..=3));
        let local_id = h.send_text("txn-1", "hi");

        let effects = h.apply(SessionEvent::SendCompleted {
            client_txn_id: "txn-1".into(),
            result: Err(ApiError::new(ErrorCategory::RateLimited, "rate_limited", "slow down")),
        });
        assert!(effects.iter().any(|effect| matches!(
            effect,
            SessionEffect::Update(SessionUpdate::SendAck(ack))
                if ack.error_code.as_deref() == Some("rate_limited")
        )));
        let snapshot = h.session.snapshot();
        assert_eq!(snapshot.items.last().map(|i| i.delivery), Some(DeliveryState::Failed));

        let effects = h.apply(SessionEvent::Resend { local_id });
        assert!(matches!(
            effects.as_slice(),
            [SessionEffect::Send { client_txn_id, .. }] if client_txn_id == "txn-1"
        ));
        h.apply(SessionEvent::SendCompleted {
            client_txn_id: "txn-1".into(),
            result: Err(ApiError::new(ErrorCategory::Network, "timeout", "timed out")),
        });
        h.apply(SessionEvent::DiscardFailed { local_id });
        assert_eq!(ids(&h.session), vec![1, 2, 3]);
    }

    #[test]
    fn responses_from_a_previous_session_are_ignored() {
        let mut old = Harness::new(WindowConfig::group_channel());
        let stale = single_ticket(&old.apply(SessionEvent::LoadLatest));

        let mut h = Harness {
            session: ChannelSession::new(CHANNEL, 2, &WindowConfig::group_channel()),
            viewport: FakeViewport::default(),
        };
        h.open_with(rows(1..=5));
        let effects = h.complete(stale, rows(100..=140));
        assert!(effects.is_empty());
        assert_eq!(ids(&h.session), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn channel_metadata_is_forwarded() {
        let mut h = Harness::new(WindowConfig::group_channel());
        let metadata = crate::types::ChannelMetadata {
            channel_id: CHANNEL.into(),
            name: Some("Lobby".into()),
            member_count: Some(3),
            is_frozen: false,
        };
        let effects = h.apply(SessionEvent::Push(PushEvent::ChannelChanged {
            channel_id: CHANNEL.into(),
            metadata: metadata.clone(),
        }));
        assert_eq!(
            effects,
            vec![SessionEffect::Update(SessionUpdate::ChannelMetadata(metadata))]
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Receive,
        Delete(usize),
        Edit(usize),
        LoadOlder,
        LoadNewer,
        Lock,
        Unlock,
        JumpToLatest,
        Around(usize),
        Send,
        ResolveSend,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => Just(Op::Receive),
            1 => (0usize..400).prop_map(Op::Delete),
            1 => (0usize..400).prop_map(Op::Edit),
            2 => Just(Op::LoadOlder),
            2 => Just(Op::LoadNewer),
            1 => Just(Op::Lock),
            1 => Just(Op::Unlock),
            1 => Just(Op::JumpToLatest),
            1 => (0usize..400).prop_map(Op::Around),
            1 => Just(Op::Send),
            1 => Just(Op::ResolveSend),
        ]
    }

    struct Server {
        rows: Vec<Message>,
        next_id: MessageId,
        pending_sends: Vec<String>,
        sent: usize,
    }

    impl Server {
        fn seeded(count: MessageId) -> Self {
            Self {
                rows: (1..=count).map(msg).collect(),
                next_id: count + 1,
                pending_sends: Vec::new(),
                sent: 0,
            }
        }

        fn create(&mut self) -> Message {
            let message = msg(self.next_id);
            self.next_id += 1;
            self.rows.push(message.clone());
            message
        }

        fn pick(&self, idx: usize) -> Option<&Message> {
            if self.rows.is_empty() {
                None
            } else {
                self.rows.get(idx % self.rows.len())
            }
        }
    }

    fn run_fetches(h: &mut Harness, server: &Server, mut effects: Vec<SessionEffect>) {
        while let Some(effect) = effects.pop() {
            if let SessionEffect::Fetch(ticket) = effect {
                let rows = ticket.query.select(&server.rows);
                effects.extend(h.complete(ticket, rows));
            }
        }
    }

    fn assert_invariants(session: &ChannelSession, capacity: Option<usize>) {
        let window = session.window();
        let messages = window.messages();
        for pair in messages.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at, "window out of order");
        }
        for pair in window.overflow().windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at, "overflow out of order");
        }
        if let (Some(last), Some(first_overflow)) = (window.last(), window.overflow().first()) {
            assert!(last.created_at <= first_overflow.created_at, "overflow older than window");
        }
        if let Some(capacity) = capacity {
            assert!(messages.len() <= capacity);
        }

        let mut seen = std::collections::HashSet::new();
        for message in messages.iter().chain(window.overflow()) {
            assert!(seen.insert(message.id), "duplicate id {}", message.id);
        }
        let mut visible = std::collections::HashSet::new();
        for item in session.snapshot().items {
            assert!(visible.insert(item.message.id), "duplicate display id {}", item.message.id);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn window_invariants_hold_under_random_traffic(
            capacity in proptest::option::of(2usize..=60),
            seed in 0i64..300,
            ops in proptest::collection::vec(op(), 1..80),
        ) {
            let config = WindowConfig {
                latest_limit: 20,
                page_limit: 15,
                around_prev_limit: 8,
                around_next_limit: 8,
                capacity,
                new_message_cap: 5,
            };
            let mut h = Harness::new(config);
            let mut server = Server::seeded(seed);

            let effects = h.apply(SessionEvent::LoadLatest);
            run_fetches(&mut h, &server, effects);
            assert_invariants(&h.session, capacity);

            for op in ops {
                let effects = match op {
                    Op::Receive => {
                        let message = server.create();
                        h.apply(SessionEvent::Push(PushEvent::MessageReceived {
                            channel_id: CHANNEL.into(),
                            message,
                        }))
                    }
                    Op::Delete(idx) => match server.pick(idx).map(|m| m.id) {
                        Some(id) => {
                            server.rows.retain(|m| m.id != id);
                            h.apply(SessionEvent::Push(PushEvent::MessageDeleted {
                                channel_id: CHANNEL.into(),
                                message_id: id,
                            }))
                        }
                        None => Vec::new(),
                    },
                    Op::Edit(idx) => match server.pick(idx).cloned() {
                        Some(mut message) => {
                            message.body.push_str(" (edited)");
                            h.apply(SessionEvent::Push(PushEvent::MessageUpdated {
                                channel_id: CHANNEL.into(),
                                message,
                            }))
                        }
                        None => Vec::new(),
                    },
                    Op::LoadOlder => h.apply(SessionEvent::LoadOlder),
                    Op::LoadNewer => h.apply(SessionEvent::LoadNewer),
                    Op::Lock => h.apply(SessionEvent::BottomVisibility {
                        intersection_ratio: 0.0,
                    }),
                    Op::Unlock => h.apply(SessionEvent::BottomVisibility {
                        intersection_ratio: 1.0,
                    }),
                    Op::JumpToLatest => h.apply(SessionEvent::JumpToLatest),
                    Op::Around(idx) => match server.pick(idx).map(|m| m.id) {
                        Some(id) => h.apply(SessionEvent::FetchAround {
                            anchor: CursorAnchor::MessageId(id),
                        }),
                        None => Vec::new(),
                    },
                    Op::Send => {
                        server.sent += 1;
                        let txn = format!("txn-{}", server.sent);
                        server.pending_sends.push(txn.clone());
                        h.apply(SessionEvent::SendRequested {
                            client_txn_id: txn,
                            draft: OutgoingMessage::Text("hello".into()),
                            sender_id: Some("mod".into()),
                            now_ms: 1,
                        })
                    }
                    Op::ResolveSend => {
                        if server.pending_sends.is_empty() {
                            Vec::new()
                        } else {
                            let txn = server.pending_sends.remove(0);
                            let message = server.create();
                            h.apply(SessionEvent::SendCompleted {
                                client_txn_id: txn,
                                result: Ok(message),
                            })
                        }
                    }
                };
                run_fetches(&mut h, &server, effects);
                assert_invariants(&h.session, capacity);
            }
        }
    }
}
