// ── Directory handler ──
//
// One upstream directory stream per connection, opened once the login is
// established. Consumer directory streams never reach the wire: they are
// answered from the cache and kept current with filtered updates.

use std::collections::HashSet;

use indexmap::IndexMap;
use streamwatch_api::rdm::directory::filter;
use streamwatch_api::{
    DataState, DirectoryMsg, DirectoryRefresh, DirectoryRequest, DirectoryStatus, DirectoryUpdate,
    MapAction, Service, State, StateCode, StreamId, StreamState, Transport,
};

use super::cache::ServiceChange;
use crate::context::{Ctx, DIRECTORY_STREAM_ID};
use crate::error::WatchlistError;
use crate::event::{ConsumerEvent, DirectoryEvent, StreamInfo, SubmitOptions};
use crate::state::{SessionChange, StreamStatus};
use crate::timer::{TimerId, TimerKind};

#[derive(Debug)]
struct DirectoryConsumer {
    request: DirectoryRequest,
    service_name: Option<String>,
    info: StreamInfo,
    /// Has received an image of the current cache.
    refreshed: bool,
}

impl DirectoryConsumer {
    fn wants(&self, service: &Service, name: Option<&str>) -> bool {
        if let Some(id) = self.request.service_id {
            return service.service_id == id;
        }
        match &self.service_name {
            Some(wanted) => name == Some(wanted.as_str()),
            None => true,
        }
    }
}

/// What applying a provider directory message did.
#[derive(Debug)]
pub(crate) struct DirectoryOutcome {
    pub(crate) changes: Vec<ServiceChange>,
    pub(crate) session: SessionChange,
}

impl DirectoryOutcome {
    fn session(session: SessionChange) -> Self {
        Self {
            changes: Vec::new(),
            session,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct DirectoryHandler {
    status: StreamStatus,
    timer: Option<TimerId>,
    attempts: u32,
    consumers: IndexMap<StreamId, DirectoryConsumer>,
    /// Service ids seen so far in a clear-cache refresh still in progress.
    refresh_seen: Option<HashSet<u16>>,
}

impl DirectoryHandler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn status(&self) -> StreamStatus {
        self.status
    }

    pub(crate) fn owns(&self, stream_id: StreamId) -> bool {
        self.consumers.contains_key(&stream_id)
    }

    /// Open the upstream directory stream unless it is already open or pending.
    pub(crate) fn request_upstream<T: Transport>(&mut self, ctx: &mut Ctx<T>) {
        if self.status == StreamStatus::PendingRequest || self.status.is_open() {
            return;
        }
        self.send_request(ctx);
    }

    // ── Consumer operations ──────────────────────────────────────────

    pub(crate) fn submit<T: Transport>(
        &mut self,
        ctx: &mut Ctx<T>,
        request: DirectoryRequest,
        opts: &SubmitOptions,
    ) -> Result<(), WatchlistError> {
        let stream_id = request.stream_id;
        if let Some(existing) = self.consumers.get_mut(&stream_id) {
            if existing.request.service_id != request.service_id
                || existing.service_name != opts.service_name
            {
                return Err(WatchlistError::invalid(
                    "Directory request cannot change service ID or name on reissue.",
                ));
            }
            if existing.request.streaming != request.streaming {
                return Err(WatchlistError::failure(
                    "Directory request cannot change streaming flag on reissue.",
                ));
            }
            existing.request = request;
            existing.info.user_spec.clone_from(&opts.user_spec);
            existing.refreshed = false;
        } else {
            self.consumers.insert(
                stream_id,
                DirectoryConsumer {
                    request,
                    service_name: opts.service_name.clone(),
                    info: StreamInfo::from(opts),
                    refreshed: false,
                },
            );
        }

        if ctx.directory_ready {
            self.refresh_consumer(ctx, stream_id, true);
        }
        Ok(())
    }

    pub(crate) fn close(&mut self, stream_id: StreamId) -> bool {
        self.consumers.shift_remove(&stream_id).is_some()
    }

    // ── Provider messages ────────────────────────────────────────────

    pub(crate) fn on_msg<T: Transport>(
        &mut self,
        ctx: &mut Ctx<T>,
        msg: DirectoryMsg,
    ) -> DirectoryOutcome {
        match msg {
            DirectoryMsg::Refresh(refresh) => self.on_refresh(ctx, refresh),
            DirectoryMsg::Update(update) => {
                let (changes, entries) = apply_entries(ctx, &update.services);
                self.fan_out_updates(ctx, &entries);
                DirectoryOutcome {
                    changes,
                    session: SessionChange::None,
                }
            }
            DirectoryMsg::Status(status) => self.on_status(ctx, status),
            DirectoryMsg::Request(_) | DirectoryMsg::Close { .. } => {
                tracing::warn!("unexpected directory message class from provider");
                DirectoryOutcome::session(SessionChange::None)
            }
        }
    }

    fn on_refresh<T: Transport>(
        &mut self,
        ctx: &mut Ctx<T>,
        refresh: DirectoryRefresh,
    ) -> DirectoryOutcome {
        if !refresh.state.is_open() && refresh.state.stream_state != StreamState::NonStreaming {
            let mut status = DirectoryStatus::new(refresh.stream_id, refresh.state);
            status.filter = Some(refresh.filter);
            return self.on_status(ctx, status);
        }

        ctx.disarm(&mut self.timer);
        self.attempts = 0;
        if refresh.clear_cache && self.refresh_seen.is_none() {
            self.refresh_seen = Some(HashSet::new());
        }
        if let Some(seen) = &mut self.refresh_seen {
            seen.extend(refresh.services.iter().map(|s| s.service_id));
        }

        let (mut changes, mut entries) = apply_entries(ctx, &refresh.services);

        if !refresh.complete {
            self.fan_out_updates(ctx, &entries);
            return DirectoryOutcome {
                changes,
                session: SessionChange::None,
            };
        }

        if let Some(seen) = self.refresh_seen.take() {
            let stale: Vec<u16> = ctx
                .services
                .ids()
                .into_iter()
                .filter(|id| !seen.contains(id))
                .collect();
            for id in stale {
                let delete = Service::deleted(id);
                if let Some(change) = ctx.services.apply(&delete) {
                    entries.push((delete, change.name.clone()));
                    changes.push(change);
                }
            }
        }

        let first = !ctx.directory_ready;
        ctx.directory_ready = true;
        self.status = if refresh.state.data_state == DataState::Suspect {
            StreamStatus::OpenSuspect
        } else {
            StreamStatus::Open
        };
        tracing::info!(
            services = ctx.services.len(),
            first,
            "directory refresh complete"
        );

        self.fan_out_updates(ctx, &entries);
        let pending: Vec<StreamId> = self
            .consumers
            .iter()
            .filter(|(_, c)| !c.refreshed)
            .map(|(id, _)| *id)
            .collect();
        for id in pending {
            self.refresh_consumer(ctx, id, true);
        }

        DirectoryOutcome {
            changes,
            session: if first {
                SessionChange::Established
            } else {
                SessionChange::None
            },
        }
    }

    fn on_status<T: Transport>(
        &mut self,
        ctx: &mut Ctx<T>,
        status: DirectoryStatus,
    ) -> DirectoryOutcome {
        let Some(state) = status.state else {
            return DirectoryOutcome::session(SessionChange::None);
        };
        match state.stream_state {
            StreamState::Open | StreamState::NonStreaming => {
                if self.status.is_open() && state.data_state == DataState::Suspect {
                    self.status = StreamStatus::OpenSuspect;
                }
                self.broadcast_status(ctx, &state);
                DirectoryOutcome::session(SessionChange::None)
            }
            StreamState::ClosedRecover => {
                tracing::info!(text = %state.text, "directory stream closed recoverably");
                self.session_lost(ctx, true, &state.text);
                DirectoryOutcome::session(SessionChange::Recovering)
            }
            StreamState::Closed | StreamState::Redirected => {
                tracing::info!(text = %state.text, "directory stream closed");
                self.session_lost(ctx, false, &state.text);
                DirectoryOutcome::session(SessionChange::Terminated)
            }
        }
    }

    // ── Timer ────────────────────────────────────────────────────────

    pub(crate) fn on_timeout<T: Transport>(&mut self, ctx: &mut Ctx<T>) -> SessionChange {
        self.timer = None;
        if self.status != StreamStatus::PendingRequest {
            return SessionChange::None;
        }
        self.attempts += 1;
        if ctx.config.retries_exhausted(self.attempts) {
            tracing::warn!(attempt = self.attempts, "directory request retries exhausted");
            self.session_lost(ctx, false, "Directory request timed out.");
            return SessionChange::Terminated;
        }

        tracing::warn!(attempt = self.attempts, "directory request timed out, resending");
        let state = State::open_suspect("Directory request timed out.").with_code(StateCode::Timeout);
        self.broadcast_status(ctx, &state);
        ctx.send_logged(DirectoryMsg::Close {
            stream_id: DIRECTORY_STREAM_ID,
        });
        self.send_request(ctx);
        SessionChange::None
    }

    // ── Session loss ─────────────────────────────────────────────────

    /// The directory stream (or the session under it) went away. The cache
    /// is cleared; consumers are suspended when `recoverable`, else closed.
    pub(crate) fn session_lost<T: Transport>(
        &mut self,
        ctx: &mut Ctx<T>,
        recoverable: bool,
        text: &str,
    ) {
        ctx.disarm(&mut self.timer);
        self.refresh_seen = None;
        ctx.directory_ready = false;
        ctx.services.clear();

        if recoverable {
            self.status = StreamStatus::NotEstablished;
            self.broadcast_status(ctx, &State::open_suspect(text));
            for consumer in self.consumers.values_mut() {
                consumer.refreshed = false;
            }
        } else {
            self.status = StreamStatus::ClosedTerminal;
            self.broadcast_status(ctx, &State::closed(text));
            self.consumers.clear();
        }
    }

    /// Forget a terminal close so a new login can reopen the stream.
    pub(crate) fn reset(&mut self) {
        if self.status == StreamStatus::ClosedTerminal {
            self.status = StreamStatus::NotEstablished;
            self.attempts = 0;
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    fn send_request<T: Transport>(&mut self, ctx: &mut Ctx<T>) {
        let request = DirectoryRequest::new(DIRECTORY_STREAM_ID, filter::WATCHLIST);
        self.status = StreamStatus::PendingRequest;
        self.timer = Some(ctx.rearm_request(self.timer, TimerKind::DirectoryRequest));
        tracing::debug!(filter = request.filter, "requesting source directory");
        ctx.send_logged(DirectoryMsg::Request(request));
    }

    /// Answer consumer `stream_id` with an image of the cache.
    fn refresh_consumer<T: Transport>(&mut self, ctx: &mut Ctx<T>, stream_id: StreamId, solicited: bool) {
        let Some(consumer) = self.consumers.get_mut(&stream_id) else {
            return;
        };
        let services = ctx
            .services
            .services()
            .filter(|s| consumer.wants(s, s.name()))
            .map(|s| Service {
                action: MapAction::Add,
                ..s.filtered(consumer.request.filter)
            })
            .collect();

        let mut refresh = DirectoryRefresh::new(stream_id, consumer.request.filter, services);
        refresh.service_id = consumer.request.service_id;
        refresh.solicited = solicited;
        if !consumer.request.streaming {
            refresh.state = State::new(StreamState::NonStreaming, DataState::Ok);
        }
        consumer.refreshed = true;
        let streaming = consumer.request.streaming;
        let info = consumer.info.clone();

        ctx.emit(ConsumerEvent::Directory(DirectoryEvent {
            msg: DirectoryMsg::Refresh(refresh),
            info,
        }));
        if !streaming {
            self.consumers.shift_remove(&stream_id);
        }
    }

    /// Send each refreshed consumer the entries it asked for.
    fn fan_out_updates<T: Transport>(&self, ctx: &mut Ctx<T>, entries: &[(Service, Option<String>)]) {
        if entries.is_empty() {
            return;
        }
        for (stream_id, consumer) in self.consumers.iter().filter(|(_, c)| c.refreshed) {
            let services: Vec<Service> = entries
                .iter()
                .filter(|(svc, name)| consumer.wants(svc, name.as_deref()))
                .map(|(svc, _)| svc.filtered(consumer.request.filter))
                .filter(|svc| svc.action != MapAction::Update || svc.present_filter() != 0)
                .collect();
            if services.is_empty() {
                continue;
            }
            let mut update = DirectoryUpdate::new(*stream_id, services);
            update.filter = Some(consumer.request.filter);
            update.service_id = consumer.request.service_id;
            ctx.emit(ConsumerEvent::Directory(DirectoryEvent {
                msg: DirectoryMsg::Update(update),
                info: consumer.info.clone(),
            }));
        }
    }

    fn broadcast_status<T: Transport>(&self, ctx: &mut Ctx<T>, state: &State) {
        for (stream_id, consumer) in &self.consumers {
            let mut status = DirectoryStatus::new(*stream_id, state.clone());
            status.filter = Some(consumer.request.filter);
            status.service_id = consumer.request.service_id;
            ctx.emit(ConsumerEvent::Directory(DirectoryEvent {
                msg: DirectoryMsg::Status(status),
                info: consumer.info.clone(),
            }));
        }
    }
}

/// Apply provider entries to the cache. Returns the changes and, per
/// entry, what consumers should see along with the service name it
/// concerns (a deleted entry carries no name of its own).
fn apply_entries<T: Transport>(
    ctx: &mut Ctx<T>,
    services: &[Service],
) -> (Vec<ServiceChange>, Vec<(Service, Option<String>)>) {
    let mut changes = Vec::new();
    let mut entries = Vec::new();
    for entry in services {
        let Some(change) = ctx.services.apply(entry) else {
            continue;
        };
        let mut visible = entry.clone();
        if change.was_up.is_none() && entry.action == MapAction::Update {
            visible.action = MapAction::Add;
        }
        entries.push((visible, change.name.clone()));
        changes.push(change);
    }
    (changes, entries)
}
