// ── Watchlist facade ──
//
// One watchlist per connection. Owns the context and every handler, routes
// consumer submissions and provider messages to them, and turns what one
// handler reports (session established, lost, terminated) into work for
// the handlers that depend on it.

use std::collections::HashMap;

use streamwatch_api::{
    AckMsg, ChannelEvent, CloseMsg, DirectoryMsg, DirectoryRequest, DomainType, GenericMsg,
    LoginMsg, LoginRequest, Msg, MsgKey, PostMsg, RequestMsg, State, StatusMsg, StreamId,
    Transport, WireMsg,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::WatchlistConfig;
use crate::context::{Ctx, DIRECTORY_STREAM_ID, LOGIN_STREAM_ID};
use crate::directory::{DirectoryCache, DirectoryHandler, DirectoryOutcome};
use crate::error::{ReturnCode, WatchlistError};
use crate::event::{
    ConsumerCallback, ConsumerEvent, DirectoryEvent, LoginEvent, MsgEvent, StreamInfo,
    SubmitOptions,
};
use crate::item::ItemHandler;
use crate::login::LoginHandler;
use crate::post::{PostKey, PostRecord, PostTable};
use crate::state::{PauseChange, SessionChange, StreamStatus};
use crate::timer::TimerKind;

/// A consumer operation, for callers that queue work (see the reactor).
#[derive(Debug, Clone)]
pub enum Submission {
    Login(LoginRequest),
    Directory(DirectoryRequest),
    Item(RequestMsg),
    /// One item request per name on consecutive stream ids after the
    /// template's.
    Batch {
        request: RequestMsg,
        names: Vec<String>,
    },
    Post(PostMsg),
    Generic(GenericMsg),
    Close(StreamId),
}

pub struct Watchlist<T: Transport> {
    ctx: Ctx<T>,
    login: LoginHandler,
    directory: DirectoryHandler,
    items: ItemHandler,
    posts: PostTable,
    /// Streams forwarded untouched while the watchlist is disabled.
    passthrough: HashMap<StreamId, (DomainType, StreamInfo)>,
}

impl<T: Transport> Watchlist<T> {
    pub fn new(config: WatchlistConfig, transport: T) -> Self {
        info!(
            enabled = config.enable_watchlist,
            obey_open_window = config.obey_open_window,
            reissue_policy = %config.reissue_policy,
            "watchlist created"
        );
        Self {
            ctx: Ctx::new(config, transport),
            login: LoginHandler::new(),
            directory: DirectoryHandler::new(),
            items: ItemHandler::new(),
            posts: PostTable::new(),
            passthrough: HashMap::new(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &WatchlistConfig {
        &self.ctx.config
    }

    pub fn transport(&self) -> &T {
        &self.ctx.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.ctx.transport
    }

    pub fn login_status(&self) -> StreamStatus {
        self.login.status()
    }

    pub fn directory_status(&self) -> StreamStatus {
        self.directory.status()
    }

    pub fn directory_cache(&self) -> &DirectoryCache {
        &self.ctx.services
    }

    /// Posts still waiting for an acknowledgement.
    pub fn outstanding_posts(&self) -> usize {
        self.posts.len()
    }

    /// Timers armed for requests and post acknowledgements.
    pub fn pending_timers(&self) -> usize {
        self.ctx.timers.len()
    }

    /// Provider-facing item streams currently held.
    pub fn upstream_count(&self) -> usize {
        self.items.upstream_count()
    }

    /// Consumer item streams currently held, attached or waiting.
    pub fn item_stream_count(&self) -> usize {
        self.items.subscriber_count()
    }

    /// Provider-facing stream serving consumer item stream `stream_id`.
    pub fn item_upstream(&self, stream_id: StreamId) -> Option<StreamId> {
        self.items.upstream_of(stream_id)
    }

    fn enabled(&self) -> bool {
        self.ctx.config.enable_watchlist
    }

    // ── Submission ───────────────────────────────────────────────────

    /// Apply `submission` and report the outcome as a return code.
    pub fn submit(&mut self, submission: Submission, opts: &SubmitOptions) -> ReturnCode {
        let result = self.apply(submission, opts);
        if let Err(e) = &result {
            debug!(error = %e, "submission rejected");
        }
        result.into()
    }

    pub fn apply(
        &mut self,
        submission: Submission,
        opts: &SubmitOptions,
    ) -> Result<(), WatchlistError> {
        match submission {
            Submission::Login(request) => self.submit_login_request(request, opts),
            Submission::Directory(request) => self.submit_directory_request(request, opts),
            Submission::Item(request) => self.submit_item_request(request, opts),
            Submission::Batch { request, names } => {
                self.submit_batch_request(request, &names, opts)
            }
            Submission::Post(post) => self.submit_post(post, opts),
            Submission::Generic(msg) => self.submit_generic(msg, opts),
            Submission::Close(stream_id) => self.close_stream(stream_id),
        }
    }

    pub fn submit_login_request(
        &mut self,
        request: LoginRequest,
        opts: &SubmitOptions,
    ) -> Result<(), WatchlistError> {
        if !self.enabled() {
            return self.forward(LoginMsg::Request(request), opts);
        }
        let stream_id = request.stream_id;
        if self.directory.owns(stream_id) || self.items.owns(stream_id) {
            return Err(stream_in_use());
        }
        match self.login.submit(&mut self.ctx, request, opts)? {
            PauseChange::None => {}
            PauseChange::PauseAll => self.items.pause_all(),
            PauseChange::ResumeAll => self.items.resume_all(),
        }
        Ok(())
    }

    pub fn submit_directory_request(
        &mut self,
        request: DirectoryRequest,
        opts: &SubmitOptions,
    ) -> Result<(), WatchlistError> {
        if !self.enabled() {
            return self.forward(DirectoryMsg::Request(request), opts);
        }
        let stream_id = request.stream_id;
        if self.login.consumer_id() == Some(stream_id) || self.items.owns(stream_id) {
            return Err(stream_in_use());
        }
        self.directory.submit(&mut self.ctx, request, opts)
    }

    pub fn submit_item_request(
        &mut self,
        request: RequestMsg,
        opts: &SubmitOptions,
    ) -> Result<(), WatchlistError> {
        if matches!(request.domain, DomainType::Login | DomainType::Source) {
            return Err(WatchlistError::invalid(
                "Login and directory requests have their own submit calls.",
            ));
        }
        if !self.enabled() {
            return self.forward(Msg::Request(request), opts);
        }
        let stream_id = request.stream_id;
        if self.login.consumer_id() == Some(stream_id) || self.directory.owns(stream_id) {
            return Err(stream_in_use());
        }
        self.items.submit(&mut self.ctx, request, opts)
    }

    /// Expand `request` into one item request per name on stream ids
    /// following its own. The batch stream itself is answered with a
    /// single closed status.
    pub fn submit_batch_request(
        &mut self,
        request: RequestMsg,
        names: &[String],
        opts: &SubmitOptions,
    ) -> Result<(), WatchlistError> {
        if names.is_empty() {
            return Err(WatchlistError::invalid("Batch request has no item names."));
        }
        let batch_id = request.stream_id;
        let mut ids = Vec::with_capacity(names.len());
        for offset in 1..=names.len() {
            let id = StreamId::try_from(offset)
                .ok()
                .and_then(|offset| batch_id.checked_add(offset))
                .ok_or_else(|| WatchlistError::invalid("Batch request stream IDs overflow."))?;
            ids.push(id);
        }
        if std::iter::once(batch_id)
            .chain(ids.iter().copied())
            .any(|id| self.stream_in_use(id))
        {
            return Err(WatchlistError::invalid(
                "Batch request stream ID is already in use.",
            ));
        }

        for (stream_id, name) in ids.into_iter().zip(names) {
            let mut item = request.clone();
            item.stream_id = stream_id;
            item.key.name = Some(name.clone());
            self.submit_item_request(item, opts)?;
        }

        debug!(batch_id, count = names.len(), "batch request expanded");
        let status = StatusMsg::new(
            batch_id,
            request.domain,
            State::closed(format!("Processed {} total requests.", names.len())),
        );
        self.ctx.emit(ConsumerEvent::Default(MsgEvent {
            msg: Msg::Status(status),
            info: StreamInfo::from(opts),
        }));
        Ok(())
    }

    /// Post on a consumer item stream, or off-stream through the login
    /// stream.
    pub fn submit_post(
        &mut self,
        mut post: PostMsg,
        opts: &SubmitOptions,
    ) -> Result<(), WatchlistError> {
        if !self.enabled() {
            self.ctx.send(Msg::Post(post))?;
            return Ok(());
        }

        self.translate_service_name(post.key.as_mut(), opts, "Post")?;

        let owner = post.stream_id;
        let (wire_id, info) = if self.login.consumer_id() == Some(owner) {
            if !self.login.is_open() {
                return Err(WatchlistError::invalid(
                    "Post message submitted to login stream that is not established.",
                ));
            }
            if post.key.as_ref().and_then(|k| k.name.as_ref()).is_none() {
                return Err(WatchlistError::invalid(
                    "Off-stream post message has no key name.",
                ));
            }
            (LOGIN_STREAM_ID, self.login.info().clone())
        } else if let Some(target) = self.items.stream_target(owner) {
            if !target.open {
                return Err(WatchlistError::invalid(
                    "Post message submitted to stream that is not established.",
                ));
            }
            (target.stream_id, target.info)
        } else {
            return Err(WatchlistError::invalid(
                "Post message submitted for unknown stream.",
            ));
        };

        let tracked = if post.ack {
            let Some(post_id) = post.post_id else {
                return Err(WatchlistError::invalid(
                    "Post message requests acknowledgement but has no post ID.",
                ));
            };
            let key = PostKey {
                stream_id: wire_id,
                post_id,
                seq_num: post.seq_num,
            };
            if self.posts.len() >= self.ctx.config.max_outstanding_posts {
                return Err(WatchlistError::invalid("maxOutstandingPosts limit reached."));
            }
            if self.posts.contains(&key) {
                return Err(WatchlistError::invalid(
                    "Post message with this post ID is already outstanding.",
                ));
            }
            Some(key)
        } else {
            None
        };

        post.stream_id = wire_id;
        let domain = post.domain;
        let part_num = post.part_num;
        let complete = post.complete;
        let msg_key = post.key.clone();
        self.ctx.send(Msg::Post(post))?;

        if let Some(key) = tracked {
            let after = self.ctx.config.post_ack_timeout;
            let timer = self.ctx.arm(TimerKind::PostAck(key), after);
            let record = PostRecord {
                key,
                owner,
                domain,
                info,
                part_num,
                complete,
                msg_key,
                submitted: Instant::now(),
                timer,
            };
            if let Err(record) = self.posts.insert(record) {
                self.ctx.timers.cancel(record.timer);
            }
            debug!(
                stream_id = wire_id,
                post_id = key.post_id,
                seq_num = ?key.seq_num,
                "post awaiting acknowledgement"
            );
        }
        Ok(())
    }

    /// Send a generic message on an open consumer item stream.
    pub fn submit_generic(
        &mut self,
        mut msg: GenericMsg,
        opts: &SubmitOptions,
    ) -> Result<(), WatchlistError> {
        if !self.enabled() {
            self.ctx.send(Msg::Generic(msg))?;
            return Ok(());
        }
        self.translate_service_name(msg.key.as_mut(), opts, "Generic")?;

        let owner = msg.stream_id;
        let Some(target) = self.items.stream_target(owner) else {
            if self.login.consumer_id() == Some(owner) || self.directory.owns(owner) {
                return Err(WatchlistError::invalid(
                    "Generic messages are only supported on item streams.",
                ));
            }
            return Err(WatchlistError::invalid(
                "Generic message submitted for unknown stream.",
            ));
        };
        if !target.open {
            return Err(WatchlistError::invalid(
                "Generic message submitted to stream that is not established.",
            ));
        }
        debug!(consumer = owner, stream_id = target.stream_id, "forwarding generic message");
        msg.stream_id = target.stream_id;
        self.ctx.send(Msg::Generic(msg))?;
        Ok(())
    }

    /// Put the id of the consumer's named service into `key`.
    fn translate_service_name(
        &self,
        key: Option<&mut MsgKey>,
        opts: &SubmitOptions,
        class: &str,
    ) -> Result<(), WatchlistError> {
        let Some(name) = &opts.service_name else {
            return Ok(());
        };
        let Some(key) = key else {
            return Err(WatchlistError::invalid(format!(
                "{class} message submitted with service name but no message key."
            )));
        };
        let Some(service_id) = self.ctx.services.id_for_name(name) else {
            return Err(WatchlistError::invalid(format!(
                "{class} message submitted with unknown service name."
            )));
        };
        key.service_id = Some(service_id);
        Ok(())
    }

    /// Close a consumer stream. Local state goes immediately; the provider
    /// is told when no other consumer needs the upstream.
    pub fn close_stream(&mut self, stream_id: StreamId) -> Result<(), WatchlistError> {
        if !self.enabled() {
            return self.forward_close(stream_id);
        }
        if self.login.consumer_id() == Some(stream_id) {
            info!(stream_id, "consumer closed the login stream");
            self.login.close(&mut self.ctx);
            self.directory
                .session_lost(&mut self.ctx, false, "Login stream was closed.");
            self.items
                .terminate_all(&mut self.ctx, &State::closed("Login stream was closed."));
            self.ctx.window.clear();
            return Ok(());
        }
        if self.directory.close(stream_id) || self.items.close(&mut self.ctx, stream_id) {
            debug!(stream_id, "consumer stream closed");
            return Ok(());
        }
        Err(WatchlistError::invalid("Stream is not open."))
    }

    fn stream_in_use(&self, stream_id: StreamId) -> bool {
        self.login.consumer_id() == Some(stream_id)
            || self.directory.owns(stream_id)
            || self.items.owns(stream_id)
            || self.passthrough.contains_key(&stream_id)
    }

    // ── Provider messages ────────────────────────────────────────────

    /// Handle one decoded message from the provider.
    pub fn process_msg(&mut self, msg: impl Into<WireMsg>) {
        let msg = msg.into();
        if !self.enabled() {
            self.route_passthrough(msg);
            return;
        }
        match msg {
            WireMsg::Login(msg) => {
                if msg.stream_id() != LOGIN_STREAM_ID {
                    warn!(stream_id = msg.stream_id(), "login message on unexpected stream");
                    return;
                }
                let change = self.login.on_msg(&mut self.ctx, msg);
                self.on_login_change(change);
            }
            WireMsg::Directory(msg) => {
                if msg.stream_id() != DIRECTORY_STREAM_ID {
                    warn!(stream_id = msg.stream_id(), "directory message on unexpected stream");
                    return;
                }
                let outcome = self.directory.on_msg(&mut self.ctx, msg);
                self.on_directory_outcome(outcome, "Directory stream closed.");
            }
            WireMsg::Generic(Msg::Ack(ack)) => self.on_ack(ack),
            WireMsg::Generic(Msg::Generic(generic)) if generic.stream_id == LOGIN_STREAM_ID => {
                self.on_login_generic(generic);
            }
            WireMsg::Generic(msg) if msg.stream_id() == LOGIN_STREAM_ID => {
                warn!(class = msg.class(), "generic message on the login stream");
            }
            WireMsg::Generic(msg) => self.items.on_msg(&mut self.ctx, msg),
        }
    }

    fn on_ack(&mut self, mut ack: AckMsg) {
        let stream_id = ack.stream_id;
        if let Some(record) = self.posts.acknowledge(stream_id, ack.ack_id, ack.seq_num) {
            self.ctx.timers.cancel(record.timer);
            debug!(
                stream_id,
                post_id = ack.ack_id,
                nak = ack.is_nak(),
                elapsed = ?record.submitted.elapsed(),
                "post acknowledged"
            );
            ack.stream_id = record.owner;
            self.ctx.emit(ConsumerEvent::Default(MsgEvent {
                msg: Msg::Ack(ack),
                info: record.info,
            }));
            return;
        }
        if stream_id == LOGIN_STREAM_ID {
            let Some(consumer_id) = self.login.consumer_id() else {
                return;
            };
            ack.stream_id = consumer_id;
            let info = self.login.info().clone();
            self.ctx.emit(ConsumerEvent::Default(MsgEvent {
                msg: Msg::Ack(ack),
                info,
            }));
            return;
        }
        self.items.on_msg(&mut self.ctx, Msg::Ack(ack));
    }

    fn on_login_generic(&mut self, mut generic: GenericMsg) {
        let Some(consumer_id) = self.login.consumer_id() else {
            return;
        };
        generic.stream_id = consumer_id;
        let info = self.login.info().clone();
        self.ctx.emit(ConsumerEvent::Default(MsgEvent {
            msg: Msg::Generic(generic),
            info,
        }));
    }

    fn on_login_change(&mut self, change: SessionChange) {
        match change {
            SessionChange::None => {}
            SessionChange::Established => {
                self.ctx.single_open = self.login.single_open();
                info!(single_open = self.ctx.single_open, "login established");
                self.directory.reset();
                if self.ctx.channel_up {
                    self.directory.request_upstream(&mut self.ctx);
                }
            }
            SessionChange::Recovering => {
                info!("login recovering, suspending dependent streams");
                self.directory
                    .session_lost(&mut self.ctx, true, "Login stream is recovering.");
                self.items
                    .session_lost(&mut self.ctx, false, "Login stream is recovering.");
                self.ctx.window.clear();
            }
            SessionChange::Terminated => {
                info!("login closed, tearing down dependent streams");
                self.directory
                    .session_lost(&mut self.ctx, false, "Login stream was closed.");
                self.items
                    .terminate_all(&mut self.ctx, &State::closed("Login stream was closed."));
                self.ctx.window.clear();
                self.ctx.emit(ConsumerEvent::Channel(ChannelEvent::Down));
            }
        }
    }

    fn on_directory_outcome(&mut self, outcome: DirectoryOutcome, closed_text: &str) {
        if !outcome.changes.is_empty() {
            self.items.on_service_changes(&mut self.ctx, &outcome.changes);
        }
        match outcome.session {
            SessionChange::None => {}
            SessionChange::Established => {
                info!(services = self.ctx.services.len(), "directory established");
                self.items.resolve_parked(&mut self.ctx);
            }
            SessionChange::Recovering => {
                self.items
                    .session_lost(&mut self.ctx, true, "Directory stream is recovering.");
                self.ctx.window.clear();
                if self.ctx.channel_up && self.login.is_open() {
                    self.directory.request_upstream(&mut self.ctx);
                }
            }
            SessionChange::Terminated => {
                self.items
                    .terminate_all(&mut self.ctx, &State::closed(closed_text));
                self.ctx.window.clear();
            }
        }
    }

    // ── Channel lifecycle ────────────────────────────────────────────

    pub fn channel_event(&mut self, event: ChannelEvent) {
        debug!(%event, "channel event");
        if event != ChannelEvent::Opened || self.ctx.config.channel_open_callback {
            self.ctx.emit(ConsumerEvent::Channel(event));
        }
        if !self.enabled() {
            return;
        }
        match event {
            ChannelEvent::Opened | ChannelEvent::FdChange => {}
            ChannelEvent::Up | ChannelEvent::Ready => {
                self.ctx.channel_up = true;
                self.login.on_channel_up(&mut self.ctx);
                if self.login.is_open() {
                    self.directory.request_upstream(&mut self.ctx);
                }
            }
            ChannelEvent::DownReconnecting => {
                info!("channel down, waiting for reconnection");
                self.ctx.channel_up = false;
                self.login.on_channel_lost(&mut self.ctx);
                self.directory
                    .session_lost(&mut self.ctx, true, "Channel is down.");
                self.items
                    .session_lost(&mut self.ctx, false, "Channel is down.");
                self.ctx.window.clear();
            }
            ChannelEvent::Down => {
                info!("channel down for good");
                self.ctx.channel_up = false;
                let state = State::closed("Channel is down.");
                self.login.terminate(&mut self.ctx, state.clone());
                self.directory
                    .session_lost(&mut self.ctx, false, "Channel is down.");
                self.items.terminate_all(&mut self.ctx, &state);
                self.ctx.window.clear();
            }
        }
    }

    // ── Timers ───────────────────────────────────────────────────────

    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.ctx.timers.next_deadline()
    }

    /// Fire every timer due by now.
    pub fn process_timers(&mut self) {
        let expired = self.ctx.timers.pop_expired(Instant::now());
        for kind in expired {
            match kind {
                TimerKind::LoginRequest => {
                    let change = self.login.on_timeout(&mut self.ctx);
                    self.on_login_change(change);
                }
                TimerKind::DirectoryRequest => {
                    let session = self.directory.on_timeout(&mut self.ctx);
                    let outcome = DirectoryOutcome {
                        changes: Vec::new(),
                        session,
                    };
                    self.on_directory_outcome(outcome, "Directory request timed out.");
                }
                TimerKind::ItemRequest(stream_id) => self.items.on_timeout(&mut self.ctx, stream_id),
                TimerKind::PostAck(key) => self.on_post_timeout(key),
            }
        }
    }

    fn on_post_timeout(&mut self, key: PostKey) {
        let Some(record) = self.posts.expire(&key) else {
            return;
        };
        warn!(
            stream_id = key.stream_id,
            post_id = key.post_id,
            part_num = ?record.part_num,
            complete = record.complete,
            "post acknowledgement timed out"
        );
        let nak = record.timeout_nak();
        self.ctx.emit(ConsumerEvent::Default(MsgEvent {
            msg: Msg::Ack(nak),
            info: record.info,
        }));
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Take every event queued since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<ConsumerEvent> {
        self.ctx.events.drain(..).collect()
    }

    /// Hand queued events to `callback`. Returns how many were delivered.
    pub fn dispatch(&mut self, callback: &mut (impl ConsumerCallback + ?Sized)) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.ctx.events.pop_front() {
            event.deliver(callback);
            delivered += 1;
        }
        delivered
    }

    // ── Pass-through ─────────────────────────────────────────────────

    fn forward(
        &mut self,
        msg: impl Into<WireMsg>,
        opts: &SubmitOptions,
    ) -> Result<(), WatchlistError> {
        let msg = msg.into();
        let stream_id = msg.stream_id();
        self.ctx.send(msg.clone())?;
        self.passthrough
            .insert(stream_id, (msg.domain(), StreamInfo::from(opts)));
        Ok(())
    }

    fn forward_close(&mut self, stream_id: StreamId) -> Result<(), WatchlistError> {
        let Some((domain, _)) = self.passthrough.remove(&stream_id) else {
            return Err(WatchlistError::invalid("Stream is not open."));
        };
        let close: WireMsg = match domain {
            DomainType::Login => LoginMsg::Close { stream_id }.into(),
            DomainType::Source => DirectoryMsg::Close { stream_id }.into(),
            domain => Msg::Close(CloseMsg { stream_id, domain }).into(),
        };
        self.ctx.send(close)?;
        Ok(())
    }

    fn route_passthrough(&mut self, msg: WireMsg) {
        let info = self
            .passthrough
            .get(&msg.stream_id())
            .map(|(_, info)| info.clone())
            .unwrap_or_default();
        let event = match msg {
            WireMsg::Login(msg) => ConsumerEvent::Login(LoginEvent { msg, info }),
            WireMsg::Directory(msg) => ConsumerEvent::Directory(DirectoryEvent { msg, info }),
            WireMsg::Generic(msg) if msg.domain() == DomainType::Dictionary => {
                ConsumerEvent::Dictionary(MsgEvent { msg, info })
            }
            WireMsg::Generic(msg) => ConsumerEvent::Default(MsgEvent { msg, info }),
        };
        self.ctx.emit(event);
    }
}

fn stream_in_use() -> WatchlistError {
    WatchlistError::invalid("Stream ID is already in use by another domain.")
}
