// ── Item watchlist ──
//
// Maps many consumer item requests onto few upstream streams keyed by
// aggregation key. Requests whose service cannot be resolved yet are
// parked and placed once the directory knows the service. Every removal
// or suspension of a consumer's view is preceded by a status to it.
// Placement settles the qos against what the service advertises.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexSet;
use streamwatch_api::{
    CloseMsg, DomainType, Msg, Priority, Qos, RefreshMsg, RequestMsg, Service, State, StateCode,
    StatusMsg, StreamId, StreamState, Transport,
};

use super::stream::{Phase, ServiceRef, Subscriber, Upstream, aggregate_priority};
use crate::config::ReissuePolicy;
use crate::context::Ctx;
use crate::directory::ServiceChange;
use crate::error::WatchlistError;
use crate::event::{ConsumerEvent, MsgEvent, StreamInfo, SubmitOptions};
use crate::key::AggregationKey;
use crate::timer::TimerKind;
use crate::window::Admission;

/// Where a post or generic message submitted on a consumer item stream goes.
#[derive(Debug, Clone)]
pub(crate) struct StreamTarget {
    pub(crate) stream_id: StreamId,
    pub(crate) open: bool,
    pub(crate) info: StreamInfo,
}

enum Resolution {
    /// Service id and, outside the dictionary domain, the negotiated qos.
    Ready(u16, Option<Qos>),
    Unavailable(&'static str),
}

#[derive(Debug, Default)]
pub(crate) struct ItemHandler {
    upstreams: BTreeMap<StreamId, Upstream>,
    by_key: HashMap<AggregationKey, StreamId>,
    subscribers: HashMap<StreamId, Subscriber>,
    /// Consumers whose service is not resolvable yet, in submission order.
    parked: IndexSet<StreamId>,
}

impl ItemHandler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn owns(&self, consumer_id: StreamId) -> bool {
        self.subscribers.contains_key(&consumer_id)
    }

    pub(crate) fn upstream_count(&self) -> usize {
        self.upstreams.len()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Provider-facing stream id serving `consumer_id`, if it is attached.
    pub(crate) fn upstream_of(&self, consumer_id: StreamId) -> Option<StreamId> {
        let stream_id = self.subscribers.get(&consumer_id)?.upstream?;
        self.upstreams
            .get(&stream_id)
            .filter(|u| u.subscribers.contains(&consumer_id))
            .map(|u| u.stream_id)
    }

    pub(crate) fn stream_target(&self, consumer_id: StreamId) -> Option<StreamTarget> {
        let sub = self.subscribers.get(&consumer_id)?;
        let open = sub
            .upstream
            .and_then(|id| self.upstreams.get(&id))
            .is_some_and(|u| u.phase == Phase::Open && u.subscribers.contains(&consumer_id));
        Some(StreamTarget {
            stream_id: sub.upstream.unwrap_or(consumer_id),
            open,
            info: sub.info.clone(),
        })
    }

    // ── Consumer operations ──────────────────────────────────────────

    pub(crate) fn submit<T: Transport>(
        &mut self,
        ctx: &mut Ctx<T>,
        request: RequestMsg,
        opts: &SubmitOptions,
    ) -> Result<(), WatchlistError> {
        if request.key.name.is_none() {
            return Err(WatchlistError::invalid("Item request has no name."));
        }
        let service = match (&opts.service_name, request.key.service_id) {
            (Some(_), Some(_)) => {
                return Err(WatchlistError::invalid(
                    "Item request cannot specify both a service name and a service ID.",
                ));
            }
            (Some(name), None) => ServiceRef::Name(name.clone()),
            (None, Some(id)) => ServiceRef::Id(id),
            (None, None) => {
                return Err(WatchlistError::invalid(
                    "Item request has neither a service name nor a service ID.",
                ));
            }
        };

        if self.subscribers.contains_key(&request.stream_id) {
            return self.reissue(ctx, request, service, opts);
        }

        let consumer_id = request.stream_id;
        let subscriber = Subscriber {
            priority: request.priority.unwrap_or_default(),
            awaiting_refresh: !request.no_refresh,
            has_image: request.no_refresh,
            request,
            service,
            info: StreamInfo::from(opts),
            upstream: None,
            notified: false,
        };
        self.subscribers.insert(consumer_id, subscriber);
        self.place(ctx, &[consumer_id]);
        Ok(())
    }

    fn reissue<T: Transport>(
        &mut self,
        ctx: &mut Ctx<T>,
        request: RequestMsg,
        service: ServiceRef,
        opts: &SubmitOptions,
    ) -> Result<(), WatchlistError> {
        let consumer_id = request.stream_id;
        let Some(sub) = self.subscribers.get_mut(&consumer_id) else {
            return Ok(());
        };
        if sub.request.domain != request.domain {
            return Err(WatchlistError::invalid(
                "Domain type does not match existing request.",
            ));
        }
        if sub.request.key.name != request.key.name
            || sub.request.key.name_type != request.key.name_type
        {
            return Err(WatchlistError::invalid(
                "Item name does not match existing request.",
            ));
        }
        if sub.service != service {
            return Err(WatchlistError::invalid(
                "Service does not match existing request.",
            ));
        }
        if sub.request.private != request.private {
            return Err(WatchlistError::invalid(
                "Private stream flag does not match existing request.",
            ));
        }
        if sub.request.streaming != request.streaming {
            return Err(WatchlistError::failure(
                "Request cannot change streaming flag on reissue.",
            ));
        }

        let qos_changed =
            sub.request.qos != request.qos || sub.request.worst_qos != request.worst_qos;
        let want_refresh = !request.no_refresh && !request.pause;
        if let Some(priority) = request.priority {
            sub.priority = priority;
        }
        if opts.user_spec.is_some() {
            sub.info.user_spec.clone_from(&opts.user_spec);
        }
        if want_refresh {
            sub.awaiting_refresh = true;
        }
        sub.request = request;

        let Some(stream_id) = sub.upstream else {
            return Ok(());
        };
        // A qos change that negotiates to the same key stays put.
        let new_key = self
            .subscribers
            .get(&consumer_id)
            .and_then(|s| key_for(ctx, s));
        let regroup = qos_changed
            && self
                .upstreams
                .get(&stream_id)
                .is_some_and(|u| new_key.as_ref() != Some(&u.key));
        if regroup {
            tracing::debug!(consumer = consumer_id, "qos changed on reissue, moving upstream");
            self.detach(ctx, consumer_id);
            if let Some(sub) = self.subscribers.get_mut(&consumer_id) {
                sub.has_image = false;
                sub.awaiting_refresh = true;
            }
            self.place(ctx, &[consumer_id]);
            return Ok(());
        }
        let attached = self
            .upstreams
            .get(&stream_id)
            .is_some_and(|u| u.subscribers.contains(&consumer_id));
        if attached {
            self.sync(ctx, stream_id, want_refresh);
        }
        Ok(())
    }

    /// Consumer closed its stream. Returns `false` for an unknown id.
    pub(crate) fn close<T: Transport>(&mut self, ctx: &mut Ctx<T>, consumer_id: StreamId) -> bool {
        if !self.subscribers.contains_key(&consumer_id) {
            return false;
        }
        self.detach(ctx, consumer_id);
        self.parked.shift_remove(&consumer_id);
        self.subscribers.remove(&consumer_id);
        true
    }

    // ── Provider messages ────────────────────────────────────────────

    pub(crate) fn on_msg<T: Transport>(&mut self, ctx: &mut Ctx<T>, msg: Msg) {
        let stream_id = msg.stream_id();
        if !self.upstreams.contains_key(&stream_id) {
            tracing::warn!(stream_id, class = msg.class(), "message for unknown item stream");
            return;
        }
        match msg {
            Msg::Update(_) => self.fan_out(ctx, stream_id, &msg, true),
            Msg::Ack(_) | Msg::Generic(_) => self.fan_out(ctx, stream_id, &msg, false),
            Msg::Refresh(refresh) => self.on_refresh(ctx, refresh),
            Msg::Status(status) => self.on_status(ctx, status),
            other => {
                tracing::warn!(stream_id, class = other.class(), "unexpected message class on item stream");
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn on_refresh<T: Transport>(&mut self, ctx: &mut Ctx<T>, refresh: RefreshMsg) {
        let stream_id = refresh.stream_id;
        if matches!(
            refresh.state.stream_state,
            StreamState::ClosedRecover | StreamState::Closed | StreamState::Redirected
        ) {
            let mut status = StatusMsg::new(stream_id, refresh.domain, refresh.state);
            status.key = refresh.key;
            self.on_status(ctx, status);
            return;
        }

        let Some(upstream) = self.upstreams.get_mut(&stream_id) else {
            return;
        };
        ctx.disarm(&mut upstream.timer);
        upstream.attempts = 0;
        upstream.phase = Phase::Open;
        upstream.refreshing = !refresh.complete;

        let awaiting: Vec<StreamId> = upstream
            .subscribers
            .iter()
            .copied()
            .filter(|id| self.subscribers.get(id).is_some_and(|s| s.awaiting_refresh))
            .collect();
        let targets = if refresh.solicited && !awaiting.is_empty() {
            awaiting
        } else {
            upstream.subscribers.iter().copied().collect()
        };

        for id in &targets {
            let Some(sub) = self.subscribers.get_mut(id) else {
                continue;
            };
            sub.has_image = true;
            let mut copy = refresh.clone();
            copy.stream_id = *id;
            if !sub.streaming() && copy.state.stream_state == StreamState::Open {
                copy.state.stream_state = StreamState::NonStreaming;
            }
            emit(ctx, sub, Msg::Refresh(copy));
        }

        if !refresh.complete {
            return;
        }

        let mut finished = Vec::new();
        for id in &targets {
            if let Some(sub) = self.subscribers.get_mut(id) {
                sub.awaiting_refresh = false;
                if !sub.streaming() {
                    finished.push(*id);
                }
            }
        }

        let Some(upstream) = self.upstreams.get_mut(&stream_id) else {
            return;
        };
        upstream.refresh_requested = false;
        for id in &finished {
            upstream.subscribers.shift_remove(id);
            self.subscribers.remove(id);
        }
        let service_id = upstream.key.service_id();
        if upstream.holds_slot {
            upstream.holds_slot = false;
            ctx.window.release(service_id);
        }

        let ended =
            !upstream.sent_streaming || refresh.state.stream_state == StreamState::NonStreaming;
        if ended {
            // The provider closed its side; held-back streaming attaches
            // need a stream of their own.
            if let Some(done) = self.retire(ctx, stream_id, false) {
                for id in &done.subscribers {
                    self.subscribers.remove(id);
                }
                self.drain_window(ctx, service_id);
                self.requeue(ctx, done.queued);
            }
            return;
        }

        if upstream.is_idle() {
            self.retire(ctx, stream_id, true);
            self.drain_window(ctx, service_id);
            return;
        }

        let queued = std::mem::take(&mut upstream.queued);
        let deferred = upstream.deferred_reissue.take();
        upstream.subscribers.extend(queued.iter().copied());
        tracing::debug!(
            stream_id,
            name = upstream.key.name(),
            released = queued.len(),
            "refresh complete"
        );
        if !queued.is_empty() || deferred.is_some() {
            self.sync(ctx, stream_id, !queued.is_empty() || deferred == Some(true));
        }
        self.drain_window(ctx, service_id);
    }

    fn on_status<T: Transport>(&mut self, ctx: &mut Ctx<T>, status: StatusMsg) {
        let stream_id = status.stream_id;
        let Some(state) = status.state.clone() else {
            self.fan_out(ctx, stream_id, &Msg::Status(status), false);
            return;
        };
        match state.stream_state {
            StreamState::Open => self.fan_out(ctx, stream_id, &Msg::Status(status), false),
            StreamState::ClosedRecover => {
                tracing::info!(stream_id, text = %state.text, "item stream closed recoverably");
                if let Some(upstream) = self.retire(ctx, stream_id, false) {
                    let service_id = upstream.key.service_id();
                    self.suspend(ctx, upstream.all_consumers(), &state.text);
                    self.drain_window(ctx, service_id);
                }
            }
            StreamState::Closed | StreamState::Redirected | StreamState::NonStreaming => {
                tracing::info!(stream_id, text = %state.text, "item stream closed");
                self.close_upstream(ctx, stream_id, &state, false);
            }
        }
    }

    // ── Timer ────────────────────────────────────────────────────────

    pub(crate) fn on_timeout<T: Transport>(&mut self, ctx: &mut Ctx<T>, stream_id: StreamId) {
        let Some(upstream) = self.upstreams.get_mut(&stream_id) else {
            return;
        };
        upstream.timer = None;
        if !upstream.refresh_requested {
            return;
        }
        upstream.attempts += 1;
        let attempt = upstream.attempts;

        if ctx.config.retries_exhausted(attempt) {
            tracing::warn!(stream_id, attempt, "item request retries exhausted");
            let state = State::closed("Request timed out.").with_code(StateCode::Timeout);
            let send_close = ctx.channel_up;
            self.close_upstream(ctx, stream_id, &state, send_close);
            return;
        }

        tracing::warn!(stream_id, attempt, "item request timed out, resending");
        upstream.sent_priority = Priority::default();
        let domain = upstream.key.domain();
        let state = State::open_suspect("Request timed out.").with_code(StateCode::Timeout);
        for id in upstream.subscribers.clone() {
            if let Some(sub) = self.subscribers.get(&id) {
                emit_state(ctx, sub, state.clone());
            }
        }
        ctx.send_logged(Msg::Close(CloseMsg { stream_id, domain }));
        self.transmit(ctx, stream_id);
    }

    // ── Directory and session events ─────────────────────────────────

    pub(crate) fn on_service_changes<T: Transport>(
        &mut self,
        ctx: &mut Ctx<T>,
        changes: &[ServiceChange],
    ) {
        for change in changes {
            if change.lost() {
                let affected: Vec<StreamId> = self
                    .upstreams
                    .values()
                    .filter(|u| u.key.service_id() == change.service_id)
                    .map(|u| u.stream_id)
                    .collect();
                tracing::info!(
                    service_id = change.service_id,
                    streams = affected.len(),
                    deleted = change.deleted(),
                    "service lost"
                );
                let send_close = ctx.channel_up;
                let mut consumers = Vec::new();
                for stream_id in affected {
                    if let Some(upstream) = self.retire(ctx, stream_id, send_close) {
                        consumers.extend(upstream.all_consumers());
                    }
                }
                let text = if change.deleted() {
                    "Service for this item was deleted."
                } else {
                    "Service for this item is down."
                };
                self.suspend(ctx, consumers, text);
            }
            if change.deleted() {
                ctx.window.remove_service(change.service_id);
            } else {
                ctx.window.set_capacity(change.service_id, change.open_window);
                self.drain_window(ctx, change.service_id);
            }
        }
        self.resolve_parked(ctx);
    }

    /// Place every parked consumer whose service now resolves.
    pub(crate) fn resolve_parked<T: Transport>(&mut self, ctx: &mut Ctx<T>) {
        if self.parked.is_empty() {
            return;
        }
        let ids: Vec<StreamId> = self.parked.iter().copied().collect();
        self.place(ctx, &ids);
    }

    /// The session under every stream went away recoverably. Upstreams are
    /// dropped (closed on the wire when `send_close`) and their consumers
    /// suspended until the directory is back.
    pub(crate) fn session_lost<T: Transport>(&mut self, ctx: &mut Ctx<T>, send_close: bool, text: &str) {
        let stream_ids: Vec<StreamId> = self.upstreams.keys().copied().collect();
        let mut consumers = Vec::new();
        for stream_id in stream_ids {
            if let Some(upstream) = self.retire(ctx, stream_id, send_close) {
                consumers.extend(upstream.all_consumers());
            }
        }
        self.suspend(ctx, consumers, text);
    }

    /// Close every consumer stream with `state`. Nothing is retried.
    pub(crate) fn terminate_all<T: Transport>(&mut self, ctx: &mut Ctx<T>, state: &State) {
        let stream_ids: Vec<StreamId> = self.upstreams.keys().copied().collect();
        let mut consumers = Vec::new();
        for stream_id in stream_ids {
            if let Some(upstream) = self.retire(ctx, stream_id, false) {
                consumers.extend(upstream.all_consumers());
            }
        }
        consumers.extend(self.parked.drain(..));
        for id in consumers {
            if let Some(sub) = self.subscribers.remove(&id) {
                emit_state(ctx, &sub, state.clone());
            }
        }
        self.subscribers.clear();
    }

    /// The login reissue paused every stream on the provider side.
    pub(crate) fn pause_all(&mut self) {
        for sub in self.subscribers.values_mut() {
            if sub.streaming() {
                sub.request.pause = true;
            }
        }
        for upstream in self.upstreams.values_mut() {
            upstream.sent_paused = upstream.sent_streaming;
        }
        tracing::debug!(streams = self.upstreams.len(), "item streams paused");
    }

    /// The login reissue resumed every stream on the provider side.
    pub(crate) fn resume_all(&mut self) {
        for sub in self.subscribers.values_mut() {
            sub.request.pause = false;
        }
        for upstream in self.upstreams.values_mut() {
            upstream.sent_paused = false;
        }
        tracing::debug!(streams = self.upstreams.len(), "item streams resumed");
    }

    // ── Placement ────────────────────────────────────────────────────

    /// Resolve each consumer's service and attach it, or park it. New
    /// upstreams are launched only after every consumer is attached, so
    /// equivalent requests placed together cost one wire request.
    fn place<T: Transport>(&mut self, ctx: &mut Ctx<T>, ids: &[StreamId]) {
        let mut created = Vec::new();
        for &id in ids {
            let Some(sub) = self.subscribers.get_mut(&id) else {
                continue;
            };
            match resolve(ctx, &sub.service, &sub.request) {
                Resolution::Ready(service_id, qos) => {
                    let Some(mut key) = AggregationKey::from_request(&sub.request, service_id)
                    else {
                        continue;
                    };
                    if let Some(qos) = qos {
                        key = key.negotiated(qos);
                    }
                    if sub.info.service_name.is_none() {
                        sub.info.service_name = ctx
                            .services
                            .by_id(service_id)
                            .and_then(Service::name)
                            .map(str::to_owned);
                    }
                    self.parked.shift_remove(&id);
                    if let Some(stream_id) = self.attach(ctx, id, key) {
                        created.push(stream_id);
                    }
                }
                Resolution::Unavailable(text) if sub.request.private && ctx.directory_ready => {
                    // Private requests are not held for the service.
                    tracing::debug!(consumer = id, text, "private request cannot be placed");
                    self.parked.shift_remove(&id);
                    if let Some(sub) = self.subscribers.remove(&id) {
                        emit_state(ctx, &sub, State::closed_recover(text));
                    }
                }
                Resolution::Unavailable(text) => {
                    self.parked.insert(id);
                    if ctx.directory_ready && !sub.notified {
                        sub.notified = true;
                        emit_state(ctx, sub, State::open_suspect(text));
                    }
                }
            }
        }
        for stream_id in created {
            self.launch(ctx, stream_id);
        }
    }

    /// Attach `consumer_id` to the upstream for `key`. Returns the stream
    /// id when a new, not yet launched upstream had to be created.
    fn attach<T: Transport>(
        &mut self,
        ctx: &mut Ctx<T>,
        consumer_id: StreamId,
        key: AggregationKey,
    ) -> Option<StreamId> {
        let sub = self.subscribers.get_mut(&consumer_id)?;
        sub.notified = false;

        let existing = self.by_key.get(&key).copied();
        let Some(stream_id) = existing else {
            let stream_id = ctx.alloc_stream_id();
            let mut upstream = Upstream::new(stream_id, key.clone(), sub.request.payload.clone());
            upstream.subscribers.insert(consumer_id);
            sub.upstream = Some(stream_id);
            tracing::debug!(stream_id, consumer = consumer_id, name = key.name(), "new upstream stream");
            self.by_key.insert(key, stream_id);
            self.upstreams.insert(stream_id, upstream);
            return Some(stream_id);
        };

        sub.upstream = Some(stream_id);
        let streaming = sub.streaming();
        let wants_image = !sub.request.no_refresh;
        sub.awaiting_refresh = wants_image;
        let upstream = self.upstreams.get_mut(&stream_id)?;

        if upstream.phase == Phase::Queued {
            upstream.subscribers.insert(consumer_id);
            return None;
        }
        if upstream.refreshing || (streaming && !upstream.sent_streaming) {
            tracing::debug!(stream_id, consumer = consumer_id, "attach held until refresh completes");
            upstream.queued.push(consumer_id);
            return None;
        }

        upstream.subscribers.insert(consumer_id);
        let image_coming = upstream.phase == Phase::Requested && upstream.refresh_requested;
        self.sync(ctx, stream_id, wants_image && !image_coming);
        None
    }

    fn requeue<T: Transport>(&mut self, ctx: &mut Ctx<T>, ids: Vec<StreamId>) {
        for id in &ids {
            if let Some(sub) = self.subscribers.get_mut(id) {
                sub.upstream = None;
            }
        }
        self.place(ctx, &ids);
    }

    /// Remove `consumer_id` from its upstream, closing the upstream when it
    /// has nobody left and otherwise reissuing with the new aggregate.
    fn detach<T: Transport>(&mut self, ctx: &mut Ctx<T>, consumer_id: StreamId) {
        let Some(stream_id) = self
            .subscribers
            .get_mut(&consumer_id)
            .and_then(|s| s.upstream.take())
        else {
            return;
        };
        let Some(upstream) = self.upstreams.get_mut(&stream_id) else {
            return;
        };
        let was_attached = upstream.subscribers.shift_remove(&consumer_id);
        upstream.queued.retain(|id| *id != consumer_id);
        let service_id = upstream.key.service_id();

        if upstream.is_idle() {
            self.retire(ctx, stream_id, true);
            self.drain_window(ctx, service_id);
        } else if was_attached && !upstream.subscribers.is_empty() {
            self.sync(ctx, stream_id, false);
        }
    }

    /// Suspend consumers whose upstream went away recoverably. With
    /// single-open they see OPEN/SUSPECT and are placed again; without it,
    /// and always for private streams, they see CLOSED_RECOVER and are
    /// dropped.
    fn suspend<T: Transport>(&mut self, ctx: &mut Ctx<T>, ids: Vec<StreamId>, text: &str) {
        let mut kept = Vec::with_capacity(ids.len());
        for id in ids {
            let private = self.subscribers.get(&id).is_some_and(|s| s.request.private);
            if ctx.single_open && !private {
                kept.push(id);
            } else if let Some(sub) = self.subscribers.remove(&id) {
                emit_state(ctx, &sub, State::closed_recover(text));
            }
        }
        if kept.is_empty() {
            return;
        }
        for id in &kept {
            if let Some(sub) = self.subscribers.get_mut(id) {
                sub.upstream = None;
                sub.awaiting_refresh = true;
                sub.has_image = false;
                sub.notified = true;
                emit_state(ctx, sub, State::open_suspect(text));
            }
        }
        self.place(ctx, &kept);
    }

    // ── Upstream traffic ─────────────────────────────────────────────

    fn launch<T: Transport>(&mut self, ctx: &mut Ctx<T>, stream_id: StreamId) {
        let Some(upstream) = self.upstreams.get_mut(&stream_id) else {
            return;
        };
        let service_id = upstream.key.service_id();
        match ctx.window.try_admit(service_id, stream_id) {
            Admission::Admitted => {
                upstream.holds_slot = true;
                self.transmit(ctx, stream_id);
            }
            Admission::Deferred => {
                tracing::debug!(stream_id, service_id, "request deferred by open window");
            }
        }
    }

    fn drain_window<T: Transport>(&mut self, ctx: &mut Ctx<T>, service_id: u16) {
        for stream_id in ctx.window.drain(service_id) {
            match self.upstreams.get_mut(&stream_id) {
                Some(upstream) if upstream.phase == Phase::Queued => {
                    upstream.holds_slot = true;
                    self.transmit(ctx, stream_id);
                }
                _ => ctx.window.release(service_id),
            }
        }
    }

    fn aggregate(&self, stream_id: StreamId) -> Option<Priority> {
        let upstream = self.upstreams.get(&stream_id)?;
        aggregate_priority(
            upstream
                .subscribers
                .iter()
                .filter_map(|id| self.subscribers.get(id)),
        )
    }

    /// Send the initial request for an admitted upstream.
    fn transmit<T: Transport>(&mut self, ctx: &mut Ctx<T>, stream_id: StreamId) {
        let priority = self.aggregate(stream_id);
        let pause = self.wants_pause(stream_id);
        let Some(upstream) = self.upstreams.get_mut(&stream_id) else {
            return;
        };
        let streaming = priority.is_some();
        let echo = priority.filter(|p| *p != upstream.sent_priority);
        let mut request = upstream.request(streaming, echo);
        request.pause = pause;

        upstream.phase = Phase::Requested;
        upstream.sent_streaming = streaming;
        upstream.sent_paused = pause;
        if let Some(p) = priority {
            upstream.sent_priority = p;
        }
        upstream.refresh_requested = true;
        upstream.timer = Some(ctx.rearm_request(upstream.timer, TimerKind::ItemRequest(stream_id)));
        tracing::debug!(
            stream_id,
            name = upstream.key.name(),
            service_id = upstream.key.service_id(),
            streaming,
            "requesting item"
        );
        ctx.send_logged(Msg::Request(request));
    }

    /// Every attached streaming subscriber has asked for a pause.
    fn wants_pause(&self, stream_id: StreamId) -> bool {
        let Some(upstream) = self.upstreams.get(&stream_id) else {
            return false;
        };
        let mut streaming = upstream
            .subscribers
            .iter()
            .filter_map(|id| self.subscribers.get(id))
            .filter(|s| s.streaming())
            .peekable();
        streaming.peek().is_some() && streaming.all(Subscriber::paused)
    }

    /// Bring the provider in line with the subscribers: reissue when the
    /// aggregate priority or the pause state changed, or an image is wanted.
    fn sync<T: Transport>(&mut self, ctx: &mut Ctx<T>, stream_id: StreamId, want_refresh: bool) {
        let priority = self.aggregate(stream_id);
        let pause = self.wants_pause(stream_id);
        let Some(upstream) = self.upstreams.get_mut(&stream_id) else {
            return;
        };
        if upstream.phase == Phase::Queued {
            return;
        }
        if upstream.refreshing {
            let wants = upstream.deferred_reissue.unwrap_or(false) || want_refresh;
            upstream.deferred_reissue = Some(wants);
            return;
        }

        let changed = priority.filter(|p| *p != upstream.sent_priority);
        let pause_changed = pause != upstream.sent_paused;
        if !want_refresh && changed.is_none() && !pause_changed {
            return;
        }
        // A pause flip alone never closes the stream.
        let policy = if want_refresh || changed.is_some() {
            ctx.config.reissue_policy
        } else {
            ReissuePolicy::InPlace
        };

        match policy {
            ReissuePolicy::InPlace => {
                let mut request = upstream.request(upstream.sent_streaming, changed);
                request.no_refresh = !want_refresh;
                request.pause = pause;
                upstream.sent_paused = pause;
                if let Some(p) = changed {
                    upstream.sent_priority = p;
                }
                if want_refresh {
                    upstream.refresh_requested = true;
                    upstream.timer =
                        Some(ctx.rearm_request(upstream.timer, TimerKind::ItemRequest(stream_id)));
                }
                tracing::debug!(stream_id, priority = ?changed, want_refresh, pause, "reissuing item");
                ctx.send_logged(Msg::Request(request));
            }
            ReissuePolicy::CloseAndResend => {
                let domain = upstream.key.domain();
                let echo = priority.filter(|p| *p != Priority::default());
                let mut request = upstream.request(upstream.sent_streaming, echo);
                request.pause = pause;
                upstream.sent_paused = pause;
                upstream.sent_priority = priority.unwrap_or_default();
                upstream.phase = Phase::Requested;
                upstream.refresh_requested = true;
                upstream.timer =
                    Some(ctx.rearm_request(upstream.timer, TimerKind::ItemRequest(stream_id)));
                tracing::debug!(stream_id, priority = ?priority, "closing and re-requesting item");
                ctx.send_logged(Msg::Close(CloseMsg { stream_id, domain }));
                ctx.send_logged(Msg::Request(request));
            }
        }
    }

    /// Drop an upstream from the arena and the window. Subscribers keep
    /// pointing at it; callers decide what happens to them.
    fn retire<T: Transport>(
        &mut self,
        ctx: &mut Ctx<T>,
        stream_id: StreamId,
        send_close: bool,
    ) -> Option<Upstream> {
        let mut upstream = self.upstreams.remove(&stream_id)?;
        self.by_key.remove(&upstream.key);
        ctx.disarm(&mut upstream.timer);
        let service_id = upstream.key.service_id();
        if upstream.phase == Phase::Queued {
            ctx.window.remove_queued(service_id, stream_id);
        } else {
            if upstream.holds_slot {
                upstream.holds_slot = false;
                ctx.window.release(service_id);
            }
            if send_close {
                let domain = upstream.key.domain();
                ctx.send_logged(Msg::Close(CloseMsg { stream_id, domain }));
            }
        }
        tracing::debug!(stream_id, name = upstream.key.name(), "upstream stream retired");
        Some(upstream)
    }

    /// `stream_id` is finished for good: every consumer on it is told and
    /// dropped. `send_close` when the provider still holds the stream.
    fn close_upstream<T: Transport>(
        &mut self,
        ctx: &mut Ctx<T>,
        stream_id: StreamId,
        state: &State,
        send_close: bool,
    ) {
        let Some(upstream) = self.retire(ctx, stream_id, send_close) else {
            return;
        };
        for id in upstream.all_consumers() {
            if let Some(sub) = self.subscribers.remove(&id) {
                emit_state(ctx, &sub, state.clone());
            }
        }
        self.drain_window(ctx, upstream.key.service_id());
    }

    /// Copy `msg` to every attached subscriber. With `needs_image`,
    /// subscribers still waiting for their first refresh are skipped.
    fn fan_out<T: Transport>(
        &self,
        ctx: &mut Ctx<T>,
        stream_id: StreamId,
        msg: &Msg,
        needs_image: bool,
    ) {
        let Some(upstream) = self.upstreams.get(&stream_id) else {
            return;
        };
        for id in &upstream.subscribers {
            let Some(sub) = self.subscribers.get(id) else {
                continue;
            };
            if needs_image && !sub.has_image {
                continue;
            }
            let mut copy = msg.clone();
            copy.set_stream_id(*id);
            emit(ctx, sub, copy);
        }
    }
}

fn resolve<T>(ctx: &Ctx<T>, service: &ServiceRef, request: &RequestMsg) -> Resolution {
    let found = match service {
        ServiceRef::Id(id) => ctx.services.by_id(*id),
        ServiceRef::Name(name) => ctx.services.by_name(name),
    };
    match found {
        None => Resolution::Unavailable("Requested service not found."),
        Some(svc) if !svc.is_up() => Resolution::Unavailable("Requested service is down."),
        Some(svc) if !svc.accepting_requests() => {
            Resolution::Unavailable("Requested service is not accepting requests.")
        }
        Some(svc) => match negotiate(svc, request) {
            Ok(qos) => Resolution::Ready(svc.service_id, qos),
            Err(text) => Resolution::Unavailable(text),
        },
    }
}

/// Check the request against what the service advertises. Returns the
/// qos the stream will carry; dictionaries carry none.
fn negotiate(service: &Service, request: &RequestMsg) -> Result<Option<Qos>, &'static str> {
    let Some(info) = service.info.as_ref() else {
        return Err("Capability not supported.");
    };
    if !info.supports(request.domain) {
        return Err("Capability not supported.");
    }
    if request.domain == DomainType::Dictionary {
        return Ok(None);
    }
    let Some(wanted) = request.qos else {
        return Ok(Some(info.best_qos().unwrap_or(Qos::realtime())));
    };
    // A service that advertises nothing offers realtime tick-by-tick.
    let default = [Qos::realtime()];
    let offered: &[Qos] = if info.qos.is_empty() {
        &default
    } else {
        &info.qos
    };
    let matched = match request.worst_qos {
        None => offered.iter().copied().find(|q| *q == wanted),
        Some(worst) => offered
            .iter()
            .copied()
            .filter(|q| q.is_in_range(wanted, worst))
            .reduce(|best, q| if q.is_better(best) { q } else { best }),
    };
    matched
        .map(Some)
        .ok_or("Service does not provide a matching QoS.")
}

/// Aggregation key `sub` would be placed under right now.
fn key_for<T>(ctx: &Ctx<T>, sub: &Subscriber) -> Option<AggregationKey> {
    let Resolution::Ready(service_id, qos) = resolve(ctx, &sub.service, &sub.request) else {
        return None;
    };
    let key = AggregationKey::from_request(&sub.request, service_id)?;
    Some(match qos {
        Some(qos) => key.negotiated(qos),
        None => key,
    })
}

fn emit<T: Transport>(ctx: &mut Ctx<T>, sub: &Subscriber, msg: Msg) {
    let event = MsgEvent {
        msg,
        info: sub.info.clone(),
    };
    ctx.emit(if sub.request.domain == DomainType::Dictionary {
        ConsumerEvent::Dictionary(event)
    } else {
        ConsumerEvent::Default(event)
    });
}

fn emit_state<T: Transport>(ctx: &mut Ctx<T>, sub: &Subscriber, state: State) {
    let mut status = StatusMsg::new(sub.consumer_id(), sub.request.domain, state);
    status.key = Some(sub.request.key.clone());
    emit(ctx, sub, Msg::Status(status));
}
