//! Simulated provider side shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use bytes::Bytes;
use streamwatch_api::rdm::directory::filter;
use streamwatch_api::{
    DirectoryMsg, DirectoryRefresh, DomainType, Error, LoginMsg, LoginRefresh, LoginRequest, Msg,
    MsgKey, RefreshMsg, RequestMsg, Service, State, StreamId, Transport, UpdateMsg, WireMsg,
};
use streamwatch_core::{
    ConsumerEvent, MsgEvent, SubmitOptions, Watchlist, WatchlistConfig,
};

pub const LOGIN_CONSUMER: StreamId = 1;
pub const SERVICE_ID: u16 = 1;
pub const SERVICE: &str = "DIRECT_FEED";

/// Transport that records everything the watchlist sends.
#[derive(Debug, Default)]
pub struct Recorder {
    sent: Vec<WireMsg>,
    /// Reject every submit with this error.
    pub fail_with: Option<Error>,
}

impl Recorder {
    /// Everything sent since the last call.
    pub fn take(&mut self) -> Vec<WireMsg> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for Recorder {
    fn submit(&mut self, msg: WireMsg) -> Result<(), Error> {
        if let Some(e) = &self.fail_with {
            return Err(e.clone());
        }
        self.sent.push(msg);
        Ok(())
    }
}

pub fn watchlist() -> Watchlist<Recorder> {
    watchlist_with(WatchlistConfig::default())
}

pub fn watchlist_with(config: WatchlistConfig) -> Watchlist<Recorder> {
    Watchlist::new(config, Recorder::default())
}

pub fn opts() -> SubmitOptions {
    SubmitOptions::service(SERVICE)
}

pub fn login_refresh() -> LoginMsg {
    LoginMsg::Refresh(LoginRefresh::new(1, State::open_ok()))
}

pub fn directory_refresh(services: Vec<Service>) -> DirectoryMsg {
    DirectoryMsg::Refresh(DirectoryRefresh::new(2, filter::WATCHLIST, services))
}

/// Bring the channel up, log in and apply a directory with `services`.
/// Whatever this sent and emitted is discarded.
pub fn connect_with(wl: &mut Watchlist<Recorder>, services: Vec<Service>) {
    wl.channel_event(streamwatch_api::ChannelEvent::Up);
    wl.submit_login_request(LoginRequest::new(LOGIN_CONSUMER, "user"), &SubmitOptions::default())
        .unwrap();
    wl.process_msg(login_refresh());
    wl.process_msg(directory_refresh(services));
    wl.transport_mut().take();
    wl.drain_events();
}

pub fn connect(wl: &mut Watchlist<Recorder>) {
    connect_with(wl, vec![Service::added(SERVICE_ID, SERVICE)]);
}

pub fn item(stream_id: StreamId, name: &str) -> RequestMsg {
    RequestMsg::new(stream_id, DomainType::MarketPrice, MsgKey::named(name))
}

pub fn item_refresh(stream_id: StreamId) -> Msg {
    Msg::Refresh(RefreshMsg::new(stream_id, DomainType::MarketPrice, State::open_ok()))
}

pub fn item_update(stream_id: StreamId) -> Msg {
    Msg::Update(UpdateMsg::new(
        stream_id,
        DomainType::MarketPrice,
        Bytes::from_static(b"BID=1"),
    ))
}

/// Item requests among `sent`.
pub fn requests(sent: &[WireMsg]) -> Vec<&RequestMsg> {
    sent.iter()
        .filter_map(|m| match m {
            WireMsg::Generic(Msg::Request(r)) => Some(r),
            _ => None,
        })
        .collect()
}

/// Item-domain messages among `events`, in order.
pub fn default_msgs(events: &[ConsumerEvent]) -> Vec<&Msg> {
    events
        .iter()
        .filter_map(|e| match e {
            ConsumerEvent::Default(MsgEvent { msg, .. }) => Some(msg),
            _ => None,
        })
        .collect()
}

/// Consumer stream ids of the refreshes among `events`.
pub fn refreshed_ids(events: &[ConsumerEvent]) -> Vec<StreamId> {
    default_msgs(events)
        .into_iter()
        .filter_map(|m| match m {
            Msg::Refresh(r) => Some(r.stream_id),
            _ => None,
        })
        .collect()
}

/// States of the item statuses delivered to `stream_id`.
pub fn statuses_for(events: &[ConsumerEvent], stream_id: StreamId) -> Vec<State> {
    default_msgs(events)
        .into_iter()
        .filter_map(|m| match m {
            Msg::Status(s) if s.stream_id == stream_id => s.state.clone(),
            _ => None,
        })
        .collect()
}
