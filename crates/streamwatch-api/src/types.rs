// ── Primitive wire values ──
//
// Shared by every message class: stream ids, domains, stream/data state,
// quality of service, priority and the message key.

use strum::{Display, EnumString};

/// Stream identifier as carried on the wire. Consumers pick positive ids;
/// the watchlist allocates its own provider-facing ids.
pub type StreamId = i32;

/// Domain model type of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DomainType {
    Login,
    Source,
    Dictionary,
    MarketPrice,
    MarketByOrder,
    MarketByPrice,
    SymbolList,
}

impl DomainType {
    /// Numeric domain code used on the wire.
    pub const fn code(self) -> u8 {
        match self {
            Self::Login => 1,
            Self::Source => 4,
            Self::Dictionary => 5,
            Self::MarketPrice => 6,
            Self::MarketByOrder => 7,
            Self::MarketByPrice => 8,
            Self::SymbolList => 10,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Login),
            4 => Some(Self::Source),
            5 => Some(Self::Dictionary),
            6 => Some(Self::MarketPrice),
            7 => Some(Self::MarketByOrder),
            8 => Some(Self::MarketByPrice),
            10 => Some(Self::SymbolList),
            _ => None,
        }
    }
}

// ── State ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum StreamState {
    Open,
    NonStreaming,
    ClosedRecover,
    Closed,
    Redirected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DataState {
    NoChange,
    Ok,
    Suspect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum StateCode {
    #[default]
    None,
    NotFound,
    Timeout,
    NotEntitled,
    InvalidArgument,
    UsageError,
    NoResources,
    AlreadyOpen,
    NonUpdatingItem,
    Error,
}

/// Stream and data state with an optional code and explanatory text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub stream_state: StreamState,
    pub data_state: DataState,
    pub code: StateCode,
    pub text: String,
}

impl State {
    pub fn new(stream_state: StreamState, data_state: DataState) -> Self {
        Self {
            stream_state,
            data_state,
            code: StateCode::None,
            text: String::new(),
        }
    }

    pub fn open_ok() -> Self {
        Self::new(StreamState::Open, DataState::Ok)
    }

    pub fn open_suspect(text: impl Into<String>) -> Self {
        Self::new(StreamState::Open, DataState::Suspect).with_text(text)
    }

    pub fn closed_recover(text: impl Into<String>) -> Self {
        Self::new(StreamState::ClosedRecover, DataState::Suspect).with_text(text)
    }

    pub fn closed(text: impl Into<String>) -> Self {
        Self::new(StreamState::Closed, DataState::Suspect).with_text(text)
    }

    pub fn with_code(mut self, code: StateCode) -> Self {
        self.code = code;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn is_open(&self) -> bool {
        self.stream_state == StreamState::Open
    }
}

// ── Quality of service ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeliness {
    Realtime,
    DelayedUnknown,
    /// Delayed by the given number of seconds.
    Delayed(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rate {
    TickByTick,
    JitConflated,
    /// Conflated over the given number of milliseconds.
    TimeConflated(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Qos {
    pub timeliness: Timeliness,
    pub rate: Rate,
    pub dynamic: bool,
}

impl Qos {
    pub const fn realtime() -> Self {
        Self {
            timeliness: Timeliness::Realtime,
            rate: Rate::TickByTick,
            dynamic: false,
        }
    }

    pub const fn new(timeliness: Timeliness, rate: Rate) -> Self {
        Self {
            timeliness,
            rate,
            dynamic: false,
        }
    }

    /// Ordering key, lower is better. Timeliness outweighs rate.
    fn rank(self) -> (u64, u64) {
        let timeliness = match self.timeliness {
            Timeliness::Realtime => 0,
            Timeliness::Delayed(secs) => 1 + u64::from(secs),
            Timeliness::DelayedUnknown => u64::MAX,
        };
        let rate = match self.rate {
            Rate::TickByTick => 0,
            Rate::JitConflated => 1,
            Rate::TimeConflated(ms) => 2 + u64::from(ms),
        };
        (timeliness, rate)
    }

    pub fn is_better(self, other: Self) -> bool {
        self.rank() < other.rank()
    }

    /// Whether `self` lies between `best` and `worst`, both inclusive.
    pub fn is_in_range(self, best: Self, worst: Self) -> bool {
        let rank = self.rank();
        best.rank() <= rank && rank <= worst.rank()
    }
}

// ── Priority ────────────────────────────────────────────────────────

/// Request priority. The provider assumes 1/1 when a request omits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Priority {
    pub class: u8,
    pub count: u16,
}

impl Priority {
    pub const fn new(class: u8, count: u16) -> Self {
        Self { class, count }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

// ── Message key ─────────────────────────────────────────────────────

/// Identifies the item a message refers to. Every component is optional
/// on the wire; which ones are required depends on the message class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MsgKey {
    pub name: Option<String>,
    pub name_type: Option<u8>,
    pub service_id: Option<u16>,
    pub filter: Option<u32>,
    pub identifier: Option<i32>,
}

impl MsgKey {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_service_id(mut self, service_id: u16) -> Self {
        self.service_id = Some(service_id);
        self
    }

    pub fn with_name_type(mut self, name_type: u8) -> Self {
        self.name_type = Some(name_type);
        self
    }
}

// ── Negative acknowledgement ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum NakCode {
    AccessDenied,
    DeniedBySource,
    SourceDown,
    SourceUnknown,
    NoResources,
    /// No acknowledgement arrived before the post timed out.
    NoResponse,
    GatewayDown,
    SymbolUnknown,
    NotOpen,
    InvalidContent,
}
