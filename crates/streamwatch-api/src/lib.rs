//! Wire-boundary model for the streamwatch watchlist.
//!
//! Everything here is what the external codec hands us (decoded domain
//! messages) and what we hand back to it (typed outbound messages through
//! [`Transport`]). No watchlist logic lives in this crate.

pub mod error;
pub mod msg;
pub mod rdm;
pub mod transport;
pub mod types;

pub use error::Error;
pub use msg::{
    AckMsg, CloseMsg, GenericMsg, Msg, PostMsg, RefreshMsg, RequestMsg, StatusMsg, UpdateMsg,
};
pub use rdm::directory::{
    DirectoryMsg, DirectoryRefresh, DirectoryRequest, DirectoryStatus, DirectoryUpdate, MapAction,
    Service, ServiceInfo, ServiceLoad, ServiceState,
};
pub use rdm::login::{LoginMsg, LoginRefresh, LoginRequest, LoginStatus, UserIdType};
pub use transport::{ChannelEvent, ChannelTransport, Transport, WireMsg};
pub use types::{
    DataState, DomainType, MsgKey, NakCode, Priority, Qos, Rate, State, StateCode, StreamId,
    StreamState, Timeliness,
};
