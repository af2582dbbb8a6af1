// ── Login handler ──
//
// Owns the single login stream of the connection: caches the consumer's
// request, validates reissues against it, retries on request timeout and
// tells the facade when the session is established, recovering or gone.

use streamwatch_api::{
    DataState, LoginMsg, LoginRefresh, LoginRequest, LoginStatus, State, StateCode, StreamId,
    StreamState, Transport,
};

use crate::context::{Ctx, LOGIN_STREAM_ID};
use crate::error::WatchlistError;
use crate::event::{ConsumerEvent, LoginEvent, StreamInfo, SubmitOptions};
use crate::state::{PauseChange, SessionChange, StreamStatus};
use crate::timer::{TimerId, TimerKind};

#[derive(Debug, Default)]
pub(crate) struct LoginHandler {
    request: Option<LoginRequest>,
    info: StreamInfo,
    status: StreamStatus,
    granted: Option<LoginRefresh>,
    timer: Option<TimerId>,
    attempts: u32,
    /// A pausing reissue paused every item stream.
    awaiting_resume_all: bool,
}

impl LoginHandler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn consumer_id(&self) -> Option<StreamId> {
        self.request.as_ref().map(|r| r.stream_id)
    }

    pub(crate) fn status(&self) -> StreamStatus {
        self.status
    }

    pub(crate) fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub(crate) fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Single-open as granted by the provider, else as requested.
    pub(crate) fn single_open(&self) -> bool {
        self.granted
            .as_ref()
            .map(|g| g.single_open)
            .or_else(|| self.request.as_ref().map(|r| r.single_open))
            .unwrap_or(true)
    }

    // ── Consumer operations ──────────────────────────────────────────

    /// Submit or reissue the login request. A reissue may pause or resume
    /// every item stream at once when the provider supports it.
    pub(crate) fn submit<T: Transport>(
        &mut self,
        ctx: &mut Ctx<T>,
        request: LoginRequest,
        opts: &SubmitOptions,
    ) -> Result<PauseChange, WatchlistError> {
        let fresh = match &self.request {
            None => true,
            Some(_) if self.status == StreamStatus::ClosedTerminal => true,
            Some(current) => {
                if current.stream_id != request.stream_id {
                    return Err(WatchlistError::invalid(
                        "Cannot have more than one login stream",
                    ));
                }
                if self.granted.is_some() {
                    validate_reissue(current, &request)?;
                }
                if current.same_content(&request) {
                    tracing::debug!("login reissue identical to cached request, nothing to send");
                    return Ok(PauseChange::None);
                }
                false
            }
        };
        let pause = if fresh {
            PauseChange::None
        } else {
            self.pause_change(&request)
        };

        self.request = Some(request);
        self.info = StreamInfo::from(opts);
        if fresh {
            self.status = StreamStatus::NotEstablished;
            self.granted = None;
            self.attempts = 0;
        }
        if ctx.channel_up {
            self.send_request(ctx)?;
        }
        Ok(pause)
    }

    fn pause_change(&mut self, request: &LoginRequest) -> PauseChange {
        if request.pause {
            let supported = self
                .granted
                .as_ref()
                .is_some_and(|g| g.support_optimized_pause_resume);
            if supported && !self.awaiting_resume_all {
                self.awaiting_resume_all = true;
                return PauseChange::PauseAll;
            }
            return PauseChange::None;
        }
        let token_change = self
            .request
            .as_ref()
            .is_some_and(|current| current.user_name != request.user_name);
        if self.awaiting_resume_all && !token_change {
            self.awaiting_resume_all = false;
            return PauseChange::ResumeAll;
        }
        PauseChange::None
    }

    /// Consumer closed the login stream.
    pub(crate) fn close<T: Transport>(&mut self, ctx: &mut Ctx<T>) {
        if !matches!(
            self.status,
            StreamStatus::NotEstablished | StreamStatus::ClosedTerminal
        ) {
            ctx.send_logged(LoginMsg::Close {
                stream_id: LOGIN_STREAM_ID,
            });
        }
        ctx.disarm(&mut self.timer);
        *self = Self::default();
    }

    // ── Channel lifecycle ────────────────────────────────────────────

    pub(crate) fn on_channel_up<T: Transport>(&mut self, ctx: &mut Ctx<T>) {
        if self.request.is_none() {
            return;
        }
        if matches!(
            self.status,
            StreamStatus::NotEstablished | StreamStatus::ClosedRecoverable
        ) {
            if let Err(e) = self.send_request(ctx) {
                tracing::warn!(error = %e, "login request could not be sent on channel up");
            }
        }
    }

    /// Connection dropped and is reconnecting.
    pub(crate) fn on_channel_lost<T: Transport>(&mut self, ctx: &mut Ctx<T>) {
        if self.request.is_none() || self.status == StreamStatus::ClosedTerminal {
            return;
        }
        ctx.disarm(&mut self.timer);
        let notify = self.status != StreamStatus::NotEstablished;
        self.status = StreamStatus::ClosedRecoverable;
        if notify {
            self.emit_status(ctx, State::open_suspect("Channel is down."));
        }
    }

    /// Terminal close from outside the login stream (channel down).
    pub(crate) fn terminate<T: Transport>(&mut self, ctx: &mut Ctx<T>, state: State) {
        if self.request.is_none() || self.status == StreamStatus::ClosedTerminal {
            return;
        }
        ctx.disarm(&mut self.timer);
        self.status = StreamStatus::ClosedTerminal;
        self.emit_status(ctx, state);
    }

    // ── Provider messages ────────────────────────────────────────────

    pub(crate) fn on_msg<T: Transport>(&mut self, ctx: &mut Ctx<T>, msg: LoginMsg) -> SessionChange {
        if self.request.is_none() {
            tracing::warn!("login message received without a consumer login stream");
            return SessionChange::None;
        }
        match msg {
            LoginMsg::Refresh(refresh) => self.on_refresh(ctx, refresh),
            LoginMsg::Status(status) => self.on_status(ctx, status),
            LoginMsg::Request(_) | LoginMsg::Close { .. } => {
                tracing::warn!("unexpected login message class from provider");
                SessionChange::None
            }
        }
    }

    fn on_refresh<T: Transport>(&mut self, ctx: &mut Ctx<T>, refresh: LoginRefresh) -> SessionChange {
        match refresh.state.stream_state {
            StreamState::ClosedRecover | StreamState::Closed | StreamState::Redirected => {
                let status = LoginStatus::new(refresh.stream_id, refresh.state);
                return self.on_status(ctx, status);
            }
            StreamState::Open | StreamState::NonStreaming => {}
        }

        ctx.disarm(&mut self.timer);
        self.attempts = 0;
        let was_open = self.status.is_open();
        self.status = open_status(refresh.state.data_state);
        self.granted = Some(refresh.clone());
        tracing::info!(
            status = %self.status,
            single_open = refresh.single_open,
            "login refresh received"
        );
        self.emit(ctx, LoginMsg::Refresh(refresh));

        if was_open {
            SessionChange::None
        } else {
            SessionChange::Established
        }
    }

    fn on_status<T: Transport>(&mut self, ctx: &mut Ctx<T>, status: LoginStatus) -> SessionChange {
        let Some(state) = status.state.clone() else {
            self.emit(ctx, LoginMsg::Status(status));
            return SessionChange::None;
        };

        match state.stream_state {
            StreamState::Open | StreamState::NonStreaming => {
                if self.status.is_open() {
                    self.status = open_status(state.data_state);
                }
                self.emit(ctx, LoginMsg::Status(status));
                SessionChange::None
            }
            StreamState::ClosedRecover => {
                ctx.disarm(&mut self.timer);
                self.status = StreamStatus::ClosedRecoverable;
                tracing::info!(text = %state.text, "login stream closed recoverably");
                self.emit_status(ctx, State::open_suspect(state.text).with_code(state.code));
                if ctx.channel_up {
                    if let Err(e) = self.send_request(ctx) {
                        tracing::warn!(error = %e, "login recovery request could not be sent");
                    }
                }
                SessionChange::Recovering
            }
            StreamState::Closed | StreamState::Redirected => {
                ctx.disarm(&mut self.timer);
                self.status = StreamStatus::ClosedTerminal;
                tracing::info!(text = %state.text, "login stream closed");
                self.emit(ctx, LoginMsg::Status(status));
                SessionChange::Terminated
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
            tracing::warn!(attempt = self.attempts, "login request retries exhausted");
            self.status = StreamStatus::ClosedTerminal;
            self.emit_status(
                ctx,
                State::closed("Login request timed out.").with_code(StateCode::Timeout),
            );
            return SessionChange::Terminated;
        }

        tracing::warn!(attempt = self.attempts, "login request timed out, resending");
        self.emit_status(
            ctx,
            State::open_suspect("Login request timed out.").with_code(StateCode::Timeout),
        );
        ctx.send_logged(LoginMsg::Close {
            stream_id: LOGIN_STREAM_ID,
        });
        if let Err(e) = self.send_request(ctx) {
            tracing::warn!(error = %e, "login retry could not be sent");
        }
        SessionChange::None
    }

    // ── Internals ────────────────────────────────────────────────────

    fn send_request<T: Transport>(&mut self, ctx: &mut Ctx<T>) -> Result<(), WatchlistError> {
        let Some(request) = &self.request else {
            return Ok(());
        };
        let mut wire = request.clone();
        wire.stream_id = LOGIN_STREAM_ID;
        wire.no_refresh = false;

        if !self.status.is_open() {
            self.status = StreamStatus::PendingRequest;
            self.timer = Some(ctx.rearm_request(self.timer, TimerKind::LoginRequest));
        }
        tracing::debug!(user = %wire.user_name, "sending login request");
        ctx.send(LoginMsg::Request(wire))?;
        Ok(())
    }

    fn emit_status<T: Transport>(&self, ctx: &mut Ctx<T>, state: State) {
        self.emit(ctx, LoginMsg::Status(LoginStatus::new(LOGIN_STREAM_ID, state)));
    }

    fn emit<T: Transport>(&self, ctx: &mut Ctx<T>, mut msg: LoginMsg) {
        let Some(consumer_id) = self.consumer_id() else {
            return;
        };
        msg.set_stream_id(consumer_id);
        ctx.emit(ConsumerEvent::Login(LoginEvent {
            msg,
            info: self.info.clone(),
        }));
    }
}

fn open_status(data_state: DataState) -> StreamStatus {
    if data_state == DataState::Suspect {
        StreamStatus::OpenSuspect
    } else {
        StreamStatus::Open
    }
}

/// Identity changes on an established login are only allowed for
/// token-style identities, which the provider re-authenticates.
fn validate_reissue(current: &LoginRequest, next: &LoginRequest) -> Result<(), WatchlistError> {
    if next.user_name_type != current.user_name_type && !next.user_name_type.is_token() {
        return Err(WatchlistError::invalid(
            "Login userNameType does not match existing request.",
        ));
    }
    if next.user_name != current.user_name && !next.user_name_type.is_token() {
        return Err(WatchlistError::invalid(
            "Login userName does not match existing request.",
        ));
    }
    Ok(())
}
