// ── Consumer events ──
//
// Everything the watchlist tells its consumer. Events queue up inside the
// watchlist and are handed out by `drain_events` or `dispatch`, never from
// inside a submit call.

use std::any::Any;
use std::sync::Arc;

use streamwatch_api::{ChannelEvent, DirectoryMsg, LoginMsg, Msg, StreamId};

/// Opaque per-stream value supplied by the consumer at submit time and
/// handed back with every message on that stream.
pub type UserSpec = Arc<dyn Any + Send + Sync>;

/// Per-submit options.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Resolve the service by name instead of by the key's service id.
    pub service_name: Option<String>,
    pub user_spec: Option<UserSpec>,
}

impl SubmitOptions {
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            service_name: Some(name.into()),
            user_spec: None,
        }
    }

    pub fn with_user_spec(mut self, user_spec: UserSpec) -> Self {
        self.user_spec = Some(user_spec);
        self
    }
}

/// Originating stream of an event, as the consumer opened it.
#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    pub service_name: Option<String>,
    pub user_spec: Option<UserSpec>,
}

impl From<&SubmitOptions> for StreamInfo {
    fn from(opts: &SubmitOptions) -> Self {
        Self {
            service_name: opts.service_name.clone(),
            user_spec: opts.user_spec.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginEvent {
    pub msg: LoginMsg,
    pub info: StreamInfo,
}

#[derive(Debug, Clone)]
pub struct DirectoryEvent {
    pub msg: DirectoryMsg,
    pub info: StreamInfo,
}

/// Item, dictionary, post-acknowledgement and batch-status messages.
#[derive(Debug, Clone)]
pub struct MsgEvent {
    pub msg: Msg,
    pub info: StreamInfo,
}

#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    Login(LoginEvent),
    Directory(DirectoryEvent),
    Dictionary(MsgEvent),
    Default(MsgEvent),
    Channel(ChannelEvent),
}

impl ConsumerEvent {
    /// Consumer stream id the event is addressed to. `None` for channel events.
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Self::Login(e) => Some(e.msg.stream_id()),
            Self::Directory(e) => Some(e.msg.stream_id()),
            Self::Dictionary(e) | Self::Default(e) => Some(e.msg.stream_id()),
            Self::Channel(_) => None,
        }
    }
}

/// Callback surface for consumers that prefer push dispatch over draining.
pub trait ConsumerCallback {
    fn on_login(&mut self, _event: LoginEvent) {}

    fn on_directory(&mut self, _event: DirectoryEvent) {}

    fn on_dictionary(&mut self, _event: MsgEvent) {}

    fn on_default(&mut self, _event: MsgEvent) {}

    fn on_channel(&mut self, _event: ChannelEvent) {}
}

impl ConsumerEvent {
    pub fn deliver(self, callback: &mut (impl ConsumerCallback + ?Sized)) {
        match self {
            Self::Login(e) => callback.on_login(e),
            Self::Directory(e) => callback.on_directory(e),
            Self::Dictionary(e) => callback.on_dictionary(e),
            Self::Default(e) => callback.on_default(e),
            Self::Channel(e) => callback.on_channel(e),
        }
    }
}
