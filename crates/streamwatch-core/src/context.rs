// ── Connection context ──
//
// Per-connection state shared by every handler: configuration, the
// transport, directory cache, admission counters, timers and the outgoing
// event queue. Handlers borrow it mutably for the duration of one call.

use std::collections::VecDeque;
use std::time::Duration;

use streamwatch_api::{StreamId, Transport, WireMsg};
use tokio::time::Instant;

use crate::config::WatchlistConfig;
use crate::directory::DirectoryCache;
use crate::event::ConsumerEvent;
use crate::timer::{TimerId, TimerKind, TimerQueue};
use crate::window::OpenWindow;

/// Provider-facing stream id of the login stream.
pub(crate) const LOGIN_STREAM_ID: StreamId = 1;
/// Provider-facing stream id of the watchlist's directory stream.
pub(crate) const DIRECTORY_STREAM_ID: StreamId = 2;
const FIRST_ITEM_STREAM_ID: StreamId = 3;

pub(crate) struct Ctx<T> {
    pub(crate) config: WatchlistConfig,
    pub(crate) transport: T,
    pub(crate) services: DirectoryCache,
    pub(crate) window: OpenWindow,
    pub(crate) timers: TimerQueue,
    pub(crate) events: VecDeque<ConsumerEvent>,
    pub(crate) channel_up: bool,
    /// A complete directory refresh has been applied since the last loss.
    pub(crate) directory_ready: bool,
    /// Granted single-open behavior of the current login.
    pub(crate) single_open: bool,
    next_stream_id: StreamId,
}

impl<T: Transport> Ctx<T> {
    pub(crate) fn new(config: WatchlistConfig, transport: T) -> Self {
        let window = OpenWindow::new(config.obey_open_window);
        Self {
            config,
            transport,
            services: DirectoryCache::new(),
            window,
            timers: TimerQueue::new(),
            events: VecDeque::new(),
            channel_up: false,
            directory_ready: false,
            single_open: true,
            next_stream_id: FIRST_ITEM_STREAM_ID,
        }
    }

    pub(crate) fn send(&mut self, msg: impl Into<WireMsg>) -> Result<(), streamwatch_api::Error> {
        let msg = msg.into();
        tracing::debug!(stream_id = msg.stream_id(), domain = %msg.domain(), "submitting to transport");
        self.transport.submit(msg)
    }

    /// Send from an internal path (recovery, timers) where nobody waits on
    /// the result. Failures leave the stream to its request timer.
    pub(crate) fn send_logged(&mut self, msg: impl Into<WireMsg>) {
        let msg = msg.into();
        let stream_id = msg.stream_id();
        if let Err(e) = self.send(msg) {
            tracing::warn!(stream_id, error = %e, "transport rejected internal submit");
        }
    }

    pub(crate) fn alloc_stream_id(&mut self) -> StreamId {
        let id = self.next_stream_id;
        self.next_stream_id += 1;
        id
    }

    pub(crate) fn arm(&mut self, kind: TimerKind, after: Duration) -> TimerId {
        self.timers.schedule(Instant::now() + after, kind)
    }

    /// Arm a request timer, cancelling `previous` if it is still pending.
    pub(crate) fn rearm_request(&mut self, previous: Option<TimerId>, kind: TimerKind) -> TimerId {
        if let Some(id) = previous {
            self.timers.cancel(id);
        }
        let after = self.config.request_timeout;
        self.arm(kind, after)
    }

    pub(crate) fn disarm(&mut self, timer: &mut Option<TimerId>) {
        if let Some(id) = timer.take() {
            self.timers.cancel(id);
        }
    }

    pub(crate) fn emit(&mut self, event: ConsumerEvent) {
        self.events.push_back(event);
    }
}
