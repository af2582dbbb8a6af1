// ── Source directory domain ──
//
// A directory message carries a map of services keyed by service id. Each
// entry has an action and any subset of the filter sections below.

use bytes::Bytes;

use crate::types::{DomainType, Qos, State, StreamId};

/// Directory filter bits.
pub mod filter {
    pub const INFO: u32 = 0x01;
    pub const STATE: u32 = 0x02;
    pub const GROUP: u32 = 0x04;
    pub const LOAD: u32 = 0x08;
    pub const DATA: u32 = 0x10;
    pub const LINK: u32 = 0x20;

    /// What the watchlist itself requests upstream.
    pub const WATCHLIST: u32 = INFO | STATE | GROUP | LOAD;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapAction {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInfo {
    pub service_name: String,
    pub vendor: Option<String>,
    pub is_source: bool,
    /// Domain codes this service can provide.
    pub capabilities: Vec<u8>,
    pub dictionaries_provided: Vec<String>,
    pub qos: Vec<Qos>,
    pub supports_qos_range: bool,
}

impl ServiceInfo {
    /// Info for `name` offering the market data domains and dictionaries.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            capabilities: [
                DomainType::Dictionary,
                DomainType::MarketPrice,
                DomainType::MarketByOrder,
                DomainType::MarketByPrice,
                DomainType::SymbolList,
            ]
            .iter()
            .map(|d| d.code())
            .collect(),
            ..Self::default()
        }
    }

    pub fn supports(&self, domain: DomainType) -> bool {
        self.capabilities.contains(&domain.code())
    }

    /// Best advertised qos, if the service advertises any.
    pub fn best_qos(&self) -> Option<Qos> {
        self.qos
            .iter()
            .copied()
            .reduce(|best, q| if q.is_better(best) { q } else { best })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    /// `true` when the service is up.
    pub up: bool,
    pub accepting_requests: Option<bool>,
    pub status: Option<State>,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self {
            up: true,
            accepting_requests: None,
            status: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceLoad {
    pub open_limit: Option<u32>,
    /// Maximum number of outstanding new requests the provider accepts.
    pub open_window: Option<u32>,
    pub load_factor: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceGroup {
    pub group: Bytes,
    pub merged_to: Option<Bytes>,
    pub status: Option<State>,
}

/// One entry of a directory service map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub service_id: u16,
    pub action: MapAction,
    pub info: Option<ServiceInfo>,
    pub state: Option<ServiceState>,
    pub load: Option<ServiceLoad>,
    pub groups: Vec<ServiceGroup>,
}

impl Service {
    pub fn new(service_id: u16, action: MapAction) -> Self {
        Self {
            service_id,
            action,
            info: None,
            state: None,
            load: None,
            groups: Vec::new(),
        }
    }

    /// An `Add` entry with info and an up state.
    pub fn added(service_id: u16, name: impl Into<String>) -> Self {
        Self {
            info: Some(ServiceInfo::new(name)),
            state: Some(ServiceState::default()),
            ..Self::new(service_id, MapAction::Add)
        }
    }

    pub fn deleted(service_id: u16) -> Self {
        Self::new(service_id, MapAction::Delete)
    }

    pub fn with_state(mut self, state: ServiceState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_capabilities(mut self, domains: &[DomainType]) -> Self {
        if let Some(info) = self.info.as_mut() {
            info.capabilities = domains.iter().map(|d| d.code()).collect();
        }
        self
    }

    pub fn with_qos(mut self, qos: Vec<Qos>) -> Self {
        if let Some(info) = self.info.as_mut() {
            info.qos = qos;
        }
        self
    }

    pub fn with_open_window(mut self, open_window: u32) -> Self {
        self.load.get_or_insert_with(ServiceLoad::default).open_window = Some(open_window);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.service_name.as_str())
    }

    /// A service without a state section is assumed up.
    pub fn is_up(&self) -> bool {
        self.state.as_ref().is_none_or(|s| s.up)
    }

    pub fn accepting_requests(&self) -> bool {
        self.state
            .as_ref()
            .and_then(|s| s.accepting_requests)
            .unwrap_or(true)
    }

    pub fn open_window(&self) -> Option<u32> {
        self.load.as_ref().and_then(|l| l.open_window)
    }

    /// Filter bits for the sections this entry carries.
    pub fn present_filter(&self) -> u32 {
        let mut bits = 0;
        if self.info.is_some() {
            bits |= filter::INFO;
        }
        if self.state.is_some() {
            bits |= filter::STATE;
        }
        if !self.groups.is_empty() {
            bits |= filter::GROUP;
        }
        if self.load.is_some() {
            bits |= filter::LOAD;
        }
        bits
    }

    /// Copy of this entry keeping only the sections selected by `mask`.
    pub fn filtered(&self, mask: u32) -> Self {
        Self {
            service_id: self.service_id,
            action: self.action,
            info: self.info.clone().filter(|_| mask & filter::INFO != 0),
            state: self.state.clone().filter(|_| mask & filter::STATE != 0),
            load: self.load.clone().filter(|_| mask & filter::LOAD != 0),
            groups: if mask & filter::GROUP != 0 {
                self.groups.clone()
            } else {
                Vec::new()
            },
        }
    }
}

// ── Messages ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRequest {
    pub stream_id: StreamId,
    pub filter: u32,
    /// Restrict the stream to one service.
    pub service_id: Option<u16>,
    pub streaming: bool,
}

impl DirectoryRequest {
    pub fn new(stream_id: StreamId, filter: u32) -> Self {
        Self {
            stream_id,
            filter,
            service_id: None,
            streaming: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRefresh {
    pub stream_id: StreamId,
    pub state: State,
    pub filter: u32,
    pub service_id: Option<u16>,
    pub solicited: bool,
    pub complete: bool,
    pub clear_cache: bool,
    pub services: Vec<Service>,
}

impl DirectoryRefresh {
    pub fn new(stream_id: StreamId, filter: u32, services: Vec<Service>) -> Self {
        Self {
            stream_id,
            state: State::open_ok(),
            filter,
            service_id: None,
            solicited: true,
            complete: true,
            clear_cache: true,
            services,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUpdate {
    pub stream_id: StreamId,
    pub filter: Option<u32>,
    pub service_id: Option<u16>,
    pub services: Vec<Service>,
}

impl DirectoryUpdate {
    pub fn new(stream_id: StreamId, services: Vec<Service>) -> Self {
        Self {
            stream_id,
            filter: None,
            service_id: None,
            services,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryStatus {
    pub stream_id: StreamId,
    pub state: Option<State>,
    pub filter: Option<u32>,
    pub service_id: Option<u16>,
}

impl DirectoryStatus {
    pub fn new(stream_id: StreamId, state: State) -> Self {
        Self {
            stream_id,
            state: Some(state),
            filter: None,
            service_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryMsg {
    Request(DirectoryRequest),
    Refresh(DirectoryRefresh),
    Update(DirectoryUpdate),
    Status(DirectoryStatus),
    Close { stream_id: StreamId },
}

impl DirectoryMsg {
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Request(m) => m.stream_id,
            Self::Refresh(m) => m.stream_id,
            Self::Update(m) => m.stream_id,
            Self::Status(m) => m.stream_id,
            Self::Close { stream_id } => *stream_id,
        }
    }

    pub fn set_stream_id(&mut self, id: StreamId) {
        match self {
            Self::Request(m) => m.stream_id = id,
            Self::Refresh(m) => m.stream_id = id,
            Self::Update(m) => m.stream_id = id,
            Self::Status(m) => m.stream_id = id,
            Self::Close { stream_id } => *stream_id = id,
        }
    }
}
