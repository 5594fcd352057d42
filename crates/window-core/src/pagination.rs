use tracing::{debug, trace, warn};

use crate::{
    cursor::{CursorAnchor, HistoryQuery, MessageCursor},
    error::{ApiError, WindowError},
    fetch_state::FetchRequests,
    types::{FetchDirection, FetchStatus, FetchStatusSet, Message, WindowConfig},
    window::MessageWindow,
};

/// An issued history request. Handed to the I/O layer and returned with the
/// response so the controller can check it is still current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub direction: FetchDirection,
    /// Session epoch at issue time.
    pub epoch: u64,
    /// Window generation at issue time; bumped by full replaces.
    pub generation: u64,
    pub query: HistoryQuery,
    /// Auto-scroll hint for `Next` fetches.
    pub auto_follow: bool,
}

/// Whether the window bounds after a fetch are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Certain,
    /// The fetch-around anchor was missing; both bounds reported as open.
    Uncertain,
}

/// Result of applying a completed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Rows were merged into the window.
    Applied {
        direction: FetchDirection,
        rows: usize,
        boundary: Boundary,
    },
    /// The request failed; window untouched.
    Failed {
        direction: FetchDirection,
        error: ApiError,
    },
    /// The window was replaced after this request was issued; result dropped.
    Superseded { direction: FetchDirection },
}

/// Drives the four history operations for one channel session.
#[derive(Debug, Clone)]
pub struct PaginationController {
    channel_id: String,
    epoch: u64,
    generation: u64,
    config: WindowConfig,
    requests: FetchRequests,
    older_cursor: Option<MessageCursor>,
    newer_cursor: Option<MessageCursor>,
}

impl PaginationController {
    pub fn new(channel_id: impl Into<String>, epoch: u64, config: &WindowConfig) -> Self {
        Self {
            channel_id: channel_id.into(),
            epoch,
            generation: 0,
            config: config.normalized(),
            requests: FetchRequests::default(),
            older_cursor: None,
            newer_cursor: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn requests(&self) -> &FetchRequests {
        &self.requests
    }

    pub fn statuses(&self) -> FetchStatusSet {
        self.requests.statuses()
    }

    pub fn is_loading(&self, direction: FetchDirection) -> bool {
        self.requests.get(direction).is_loading()
    }

    pub fn older_cursor(&self) -> Option<&MessageCursor> {
        self.older_cursor.as_ref()
    }

    pub fn newer_cursor(&self) -> Option<&MessageCursor> {
        self.newer_cursor.as_ref()
    }

    /// Request the newest page. The result replaces the window.
    pub fn fetch_latest(&mut self) -> Option<FetchTicket> {
        let query = HistoryQuery::latest(&self.channel_id, self.config.latest_limit);
        self.issue(FetchDirection::Latest, query, true)
    }

    /// Request a page centred on `anchor`. The result replaces the window.
    pub fn fetch_around(&mut self, anchor: CursorAnchor) -> Option<FetchTicket> {
        let query = MessageCursor::around(anchor).to_query(&self.channel_id, &self.config);
        self.issue(FetchDirection::Around, query, false)
    }

    /// Request the page before the window head. No-op while loading or when
    /// the window is empty.
    pub fn fetch_older(&mut self, window: &MessageWindow) -> Option<FetchTicket> {
        let head = window.first()?;
        let cursor = match self.older_cursor {
            Some(cursor) if cursor.anchor == CursorAnchor::MessageId(head.id) => cursor,
            _ => MessageCursor::older_than(head),
        };
        let query = cursor.to_query(&self.channel_id, &self.config);
        self.issue(FetchDirection::Previous, query, false)
    }

    /// Request the page after the window tail. An empty window degenerates
    /// into `fetch_latest`.
    pub fn fetch_newer(
        &mut self,
        window: &MessageWindow,
        auto_follow: bool,
    ) -> Option<FetchTicket> {
        let Some(tail) = window.overflow().last().or(window.last()) else {
            return self.fetch_latest();
        };
        let cursor = match self.newer_cursor {
            Some(cursor) if cursor.anchor == CursorAnchor::MessageId(tail.id) => cursor,
            _ => MessageCursor::newer_than(tail),
        };
        let query = cursor.to_query(&self.channel_id, &self.config);
        self.issue(FetchDirection::Next, query, auto_follow)
    }

    /// Re-issue the last request of a failed direction.
    pub fn retry(&mut self, direction: FetchDirection) -> Option<FetchTicket> {
        let request = self.requests.get(direction);
        if request.status() != FetchStatus::Fail {
            return None;
        }
        let query = request.params()?.clone();
        self.issue(direction, query, direction == FetchDirection::Next)
    }

    /// Apply a completed fetch to `window`.
    ///
    /// Responses from another epoch are rejected with `StaleResponse` and never
    /// touch state. Failures only change the ticket's own direction.
    pub fn complete(
        &mut self,
        ticket: &FetchTicket,
        result: Result<Vec<Message>, ApiError>,
        window: &mut MessageWindow,
    ) -> Result<FetchOutcome, WindowError> {
        if ticket.epoch != self.epoch {
            return Err(WindowError::StaleResponse {
                issued_epoch: ticket.epoch,
                current_epoch: self.epoch,
            });
        }

        let direction = ticket.direction;
        if !direction.replaces_window() && ticket.generation != self.generation {
            trace!(?direction, "dropping fetch issued against a replaced window");
            return Ok(FetchOutcome::Superseded { direction });
        }
        let request = self.requests.get(direction);
        if !request.is_loading() || request.params() != Some(&ticket.query) {
            return Ok(FetchOutcome::Superseded { direction });
        }

        let mut rows = match result {
            Ok(rows) => rows,
            Err(error) => {
                warn!(?direction, code = %error.code, "history fetch failed");
                self.requests
                    .get_mut(direction)
                    .fail(direction, error.clone())?;
                return Ok(FetchOutcome::Failed { direction, error });
            }
        };
        rows.retain(|row| row.channel_id == self.channel_id);
        rows.sort_by_key(|row| row.created_at);

        let boundary = match direction {
            FetchDirection::Latest => {
                self.apply_latest(&ticket.query, rows, window);
                Boundary::Certain
            }
            FetchDirection::Around => self.apply_around(&ticket.query, rows, window),
            FetchDirection::Previous => {
                self.apply_older(&ticket.query, rows, window);
                Boundary::Certain
            }
            FetchDirection::Next => {
                self.apply_newer(&ticket.query, rows, window);
                Boundary::Certain
            }
        };

        self.requests.get_mut(direction).succeed(direction)?;
        self.refresh_cursors(window);
        debug!(
            ?direction,
            len = window.len(),
            has_older = window.has_older(),
            has_newer = window.has_newer(),
            "fetch applied"
        );

        Ok(FetchOutcome::Applied {
            direction,
            rows: window.len(),
            boundary,
        })
    }

    fn issue(
        &mut self,
        direction: FetchDirection,
        query: HistoryQuery,
        auto_follow: bool,
    ) -> Option<FetchTicket> {
        if let Err(err) = self.requests.get_mut(direction).begin(direction, query.clone()) {
            trace!(?direction, error = %err, "fetch already in flight; dropping trigger");
            return None;
        }

        Some(FetchTicket {
            direction,
            epoch: self.epoch,
            generation: self.generation,
            query,
            auto_follow,
        })
    }

    fn apply_latest(
        &mut self,
        query: &HistoryQuery,
        mut rows: Vec<Message>,
        window: &mut MessageWindow,
    ) {
        let full = rows.len() >= usize::from(query.prev_limit);
        if full {
            rows.remove(0);
        }
        self.replace_window(window, rows, full, false);
    }

    fn apply_around(
        &mut self,
        query: &HistoryQuery,
        mut rows: Vec<Message>,
        window: &mut MessageWindow,
    ) -> Boundary {
        let anchor = query.anchor.unwrap_or(CursorAnchor::Timestamp(u64::MAX));
        let (older, newer) = match split_around(&rows, anchor) {
            Ok(split) => split,
            Err(err) => {
                warn!(error = %err, rows = rows.len(), "boundary uncertain after fetch around");
                self.replace_window(window, rows, true, true);
                return Boundary::Uncertain;
            }
        };

        let has_older = older >= usize::from(query.prev_limit);
        let has_newer = newer >= usize::from(query.next_limit);
        if has_newer {
            rows.pop();
        }
        if has_older && !rows.is_empty() {
            rows.remove(0);
        }
        self.replace_window(window, rows, has_older, has_newer);
        Boundary::Certain
    }

    fn apply_older(
        &mut self,
        query: &HistoryQuery,
        mut rows: Vec<Message>,
        window: &mut MessageWindow,
    ) {
        let full = rows.len() >= usize::from(query.prev_limit);
        if full {
            rows.remove(0);
        }
        window.prepend(rows);
        window.set_has_older(full);
    }

    fn apply_newer(
        &mut self,
        query: &HistoryQuery,
        mut rows: Vec<Message>,
        window: &mut MessageWindow,
    ) {
        let full = rows.len() >= usize::from(query.next_limit);
        if full {
            rows.pop();
        }
        window.extend_tail(rows);
        window.set_has_newer(full);
    }

    fn replace_window(
        &mut self,
        window: &mut MessageWindow,
        rows: Vec<Message>,
        has_older: bool,
        has_newer: bool,
    ) {
        window.replace(rows, has_older, has_newer);
        self.generation += 1;
        for direction in [FetchDirection::Previous, FetchDirection::Next] {
            let request = self.requests.get_mut(direction);
            if request.is_loading() {
                request.reset();
            }
        }
    }

    fn refresh_cursors(&mut self, window: &MessageWindow) {
        self.older_cursor = window.first().map(MessageCursor::older_than);
        self.newer_cursor = window
            .overflow()
            .last()
            .or(window.last())
            .map(MessageCursor::newer_than);
    }
}

/// Count rows before and after the anchor. A message-id anchor that is not in
/// `rows` cannot be located.
fn split_around(rows: &[Message], anchor: CursorAnchor) -> Result<(usize, usize), WindowError> {
    match anchor {
        CursorAnchor::MessageId(id) => {
            let idx = rows
                .iter()
                .position(|row| row.id == id)
                .ok_or(WindowError::AnchorNotFound { anchor })?;
            Ok((idx, rows.len() - idx - 1))
        }
        CursorAnchor::Timestamp(ts) => {
            let older = rows.iter().filter(|row| row.created_at < ts).count();
            let newer = rows.iter().filter(|row| row.created_at > ts).count();
            Ok((older, newer))
        }
    }
}
