// ── Transport boundary ──
//
// The codec and connection layer are external. The watchlist sees them as
// a synchronous `submit` primitive for outbound messages plus a stream of
// channel lifecycle events.

use strum::Display;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::msg::Msg;
use crate::rdm::directory::DirectoryMsg;
use crate::rdm::login::LoginMsg;
use crate::types::{DomainType, StreamId};

/// A decoded message as exchanged with the codec, tagged by how it is
/// encoded: RDM login, RDM directory, or a generic message class.
#[derive(Debug, Clone)]
pub enum WireMsg {
    Login(LoginMsg),
    Directory(DirectoryMsg),
    Generic(Msg),
}

impl WireMsg {
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Login(m) => m.stream_id(),
            Self::Directory(m) => m.stream_id(),
            Self::Generic(m) => m.stream_id(),
        }
    }

    pub fn domain(&self) -> DomainType {
        match self {
            Self::Login(_) => DomainType::Login,
            Self::Directory(_) => DomainType::Source,
            Self::Generic(m) => m.domain(),
        }
    }
}

impl From<Msg> for WireMsg {
    fn from(msg: Msg) -> Self {
        Self::Generic(msg)
    }
}

impl From<LoginMsg> for WireMsg {
    fn from(msg: LoginMsg) -> Self {
        Self::Login(msg)
    }
}

impl From<DirectoryMsg> for WireMsg {
    fn from(msg: DirectoryMsg) -> Self {
        Self::Directory(msg)
    }
}

/// Channel lifecycle notifications from the connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ChannelEvent {
    /// Connection handshake started.
    Opened,
    /// Connection is usable.
    Up,
    /// Connection is usable and the watchlist has established its streams.
    Ready,
    /// Connection is gone for good.
    Down,
    /// Connection dropped; the transport is reconnecting.
    DownReconnecting,
    /// The underlying descriptor changed.
    FdChange,
}

/// Outbound half of the connection.
///
/// Called only from the single thread that drives the watchlist, so the
/// primitive is synchronous: it queues the message or reports why it could
/// not.
pub trait Transport {
    fn submit(&mut self, msg: WireMsg) -> Result<(), Error>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn submit(&mut self, msg: WireMsg) -> Result<(), Error> {
        (**self).submit(msg)
    }
}

/// Transport that hands every outbound message to an mpsc receiver,
/// typically the task that owns the socket.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<WireMsg>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WireMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn submit(&mut self, msg: WireMsg) -> Result<(), Error> {
        self.tx.send(msg).map_err(|_| Error::Closed)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::msg::CloseMsg;

    #[test]
    fn channel_transport_forwards_in_order() {
        let (mut transport, mut rx) = ChannelTransport::new();
        for id in [3, 4] {
            let close = CloseMsg {
                stream_id: id,
                domain: DomainType::MarketPrice,
            };
            assert!(transport.submit(Msg::from(close).into()).is_ok());
        }
        assert_eq!(rx.try_recv().map(|m| m.stream_id()).ok(), Some(3));
        assert_eq!(rx.try_recv().map(|m| m.stream_id()).ok(), Some(4));
    }

    #[test]
    fn channel_transport_reports_closed_receiver() {
        let (mut transport, rx) = ChannelTransport::new();
        drop(rx);
        let msg = WireMsg::Login(LoginMsg::Close { stream_id: 1 });
        assert_eq!(transport.submit(msg), Err(Error::Closed));
    }

    #[test]
    fn wire_domain_follows_encoding() {
        let msg = WireMsg::Directory(DirectoryMsg::Close { stream_id: 2 });
        assert_eq!(msg.domain(), DomainType::Source);
        assert_eq!(msg.stream_id(), 2);
    }
}
