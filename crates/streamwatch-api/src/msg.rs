// ── Generic message classes ──
//
// Decoded form of the eight message classes the watchlist handles for
// item and dictionary domains. The payload is opaque container data the
// watchlist never inspects.

use bytes::Bytes;

use crate::types::{DomainType, MsgKey, NakCode, Priority, Qos, State, StreamId};

/// Item request. Also used for reissues on an already-open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct RequestMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    pub key: MsgKey,
    /// `false` requests a snapshot: one image, then the stream closes.
    pub streaming: bool,
    /// Reissue without asking for a new image.
    pub no_refresh: bool,
    pub priority: Option<Priority>,
    pub qos: Option<Qos>,
    pub worst_qos: Option<Qos>,
    /// Ask the provider to stop sending updates until a reissue without it.
    pub pause: bool,
    /// A private stream is never shared with another request.
    pub private: bool,
    pub payload: Bytes,
}

impl RequestMsg {
    /// A streaming request for `key` with no priority, qos or payload.
    pub fn new(stream_id: StreamId, domain: DomainType, key: MsgKey) -> Self {
        Self {
            stream_id,
            domain,
            key,
            streaming: true,
            no_refresh: false,
            priority: None,
            qos: None,
            worst_qos: None,
            pause: false,
            private: false,
            payload: Bytes::new(),
        }
    }

    pub fn snapshot(mut self) -> Self {
        self.streaming = false;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = Some(qos);
        self
    }

    pub fn with_qos_range(mut self, best: Qos, worst: Qos) -> Self {
        self.qos = Some(best);
        self.worst_qos = Some(worst);
        self
    }

    pub fn paused(mut self) -> Self {
        self.pause = true;
        self
    }

    pub fn private_stream(mut self) -> Self {
        self.private = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    pub key: Option<MsgKey>,
    pub state: State,
    /// Sent in answer to a request, as opposed to provider-initiated.
    pub solicited: bool,
    /// Final part of a (possibly multi-part) image.
    pub complete: bool,
    pub clear_cache: bool,
    pub qos: Option<Qos>,
    pub seq_num: Option<u32>,
    pub payload: Bytes,
}

impl RefreshMsg {
    /// A complete, solicited refresh in state `state`.
    pub fn new(stream_id: StreamId, domain: DomainType, state: State) -> Self {
        Self {
            stream_id,
            domain,
            key: None,
            state,
            solicited: true,
            complete: true,
            clear_cache: true,
            qos: None,
            seq_num: None,
            payload: Bytes::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    pub key: Option<MsgKey>,
    pub seq_num: Option<u32>,
    pub payload: Bytes,
}

impl UpdateMsg {
    pub fn new(stream_id: StreamId, domain: DomainType, payload: Bytes) -> Self {
        Self {
            stream_id,
            domain,
            key: None,
            seq_num: None,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    pub key: Option<MsgKey>,
    pub state: Option<State>,
}

impl StatusMsg {
    pub fn new(stream_id: StreamId, domain: DomainType, state: State) -> Self {
        Self {
            stream_id,
            domain,
            key: None,
            state: Some(state),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
}

/// Content posted by the consumer, either on an item stream or
/// off-stream through the login stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    pub key: Option<MsgKey>,
    pub post_id: Option<u32>,
    pub seq_num: Option<u32>,
    pub part_num: Option<u16>,
    /// The provider must acknowledge this post.
    pub ack: bool,
    /// Last part of a multi-part post.
    pub complete: bool,
    pub payload: Bytes,
}

impl PostMsg {
    pub fn new(stream_id: StreamId, domain: DomainType) -> Self {
        Self {
            stream_id,
            domain,
            key: None,
            post_id: None,
            seq_num: None,
            part_num: None,
            ack: false,
            complete: true,
            payload: Bytes::new(),
        }
    }

    /// Request an acknowledgement for post `post_id`.
    pub fn acked(mut self, post_id: u32) -> Self {
        self.post_id = Some(post_id);
        self.ack = true;
        self
    }

    pub fn with_seq_num(mut self, seq_num: u32) -> Self {
        self.seq_num = Some(seq_num);
        self
    }

    pub fn with_key(mut self, key: MsgKey) -> Self {
        self.key = Some(key);
        self
    }
}

/// Acknowledgement of a post. A present `nak_code` makes it negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    /// The `post_id` being acknowledged.
    pub ack_id: u32,
    pub nak_code: Option<NakCode>,
    pub text: Option<String>,
    pub seq_num: Option<u32>,
    pub key: Option<MsgKey>,
}

impl AckMsg {
    pub fn new(stream_id: StreamId, domain: DomainType, ack_id: u32) -> Self {
        Self {
            stream_id,
            domain,
            ack_id,
            nak_code: None,
            text: None,
            seq_num: None,
            key: None,
        }
    }

    pub fn is_nak(&self) -> bool {
        self.nak_code.is_some()
    }
}

/// Free-form message exchanged on an open stream in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericMsg {
    pub stream_id: StreamId,
    pub domain: DomainType,
    pub key: Option<MsgKey>,
    pub seq_num: Option<u32>,
    pub complete: bool,
    pub payload: Bytes,
}

impl GenericMsg {
    pub fn new(stream_id: StreamId, domain: DomainType, payload: Bytes) -> Self {
        Self {
            stream_id,
            domain,
            key: None,
            seq_num: None,
            complete: true,
            payload,
        }
    }

    pub fn with_key(mut self, key: MsgKey) -> Self {
        self.key = Some(key);
        self
    }
}

// ── Envelope ────────────────────────────────────────────────────────

/// Any decoded generic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    Request(RequestMsg),
    Refresh(RefreshMsg),
    Update(UpdateMsg),
    Status(StatusMsg),
    Close(CloseMsg),
    Post(PostMsg),
    Ack(AckMsg),
    Generic(GenericMsg),
}

impl Msg {
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Request(m) => m.stream_id,
            Self::Refresh(m) => m.stream_id,
            Self::Update(m) => m.stream_id,
            Self::Status(m) => m.stream_id,
            Self::Close(m) => m.stream_id,
            Self::Post(m) => m.stream_id,
            Self::Ack(m) => m.stream_id,
            Self::Generic(m) => m.stream_id,
        }
    }

    pub fn set_stream_id(&mut self, stream_id: StreamId) {
        match self {
            Self::Request(m) => m.stream_id = stream_id,
            Self::Refresh(m) => m.stream_id = stream_id,
            Self::Update(m) => m.stream_id = stream_id,
            Self::Status(m) => m.stream_id = stream_id,
            Self::Close(m) => m.stream_id = stream_id,
            Self::Post(m) => m.stream_id = stream_id,
            Self::Ack(m) => m.stream_id = stream_id,
            Self::Generic(m) => m.stream_id = stream_id,
        }
    }

    pub fn domain(&self) -> DomainType {
        match self {
            Self::Request(m) => m.domain,
            Self::Refresh(m) => m.domain,
            Self::Update(m) => m.domain,
            Self::Status(m) => m.domain,
            Self::Close(m) => m.domain,
            Self::Post(m) => m.domain,
            Self::Ack(m) => m.domain,
            Self::Generic(m) => m.domain,
        }
    }

    /// Message class name, for logs.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Refresh(_) => "refresh",
            Self::Update(_) => "update",
            Self::Status(_) => "status",
            Self::Close(_) => "close",
            Self::Post(_) => "post",
            Self::Ack(_) => "ack",
            Self::Generic(_) => "generic",
        }
    }
}

impl From<RequestMsg> for Msg {
    fn from(msg: RequestMsg) -> Self {
        Self::Request(msg)
    }
}

impl From<RefreshMsg> for Msg {
    fn from(msg: RefreshMsg) -> Self {
        Self::Refresh(msg)
    }
}

impl From<UpdateMsg> for Msg {
    fn from(msg: UpdateMsg) -> Self {
        Self::Update(msg)
    }
}

impl From<StatusMsg> for Msg {
    fn from(msg: StatusMsg) -> Self {
        Self::Status(msg)
    }
}

impl From<CloseMsg> for Msg {
    fn from(msg: CloseMsg) -> Self {
        Self::Close(msg)
    }
}

impl From<PostMsg> for Msg {
    fn from(msg: PostMsg) -> Self {
        Self::Post(msg)
    }
}

impl From<AckMsg> for Msg {
    fn from(msg: AckMsg) -> Self {
        Self::Ack(msg)
    }
}

impl From<GenericMsg> for Msg {
    fn from(msg: GenericMsg) -> Self {
        Self::Generic(msg)
    }
}
