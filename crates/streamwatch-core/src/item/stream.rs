// ── Upstream streams and subscribers ──
//
// An upstream stream is the one provider-facing stream for an aggregation
// key. Subscribers refer to it by its provider stream id only; the handler
// owns both maps.

use bytes::Bytes;
use indexmap::IndexSet;
use streamwatch_api::{MsgKey, Priority, RequestMsg, StreamId};

use crate::event::StreamInfo;
use crate::key::AggregationKey;
use crate::timer::TimerId;

/// How a consumer named the service of its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ServiceRef {
    Id(u16),
    Name(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Created, waiting for open-window admission.
    Queued,
    /// Request on the wire, no refresh yet.
    Requested,
    Open,
}

#[derive(Debug)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Upstream {
    pub(crate) stream_id: StreamId,
    pub(crate) key: AggregationKey,
    pub(crate) phase: Phase,
    /// Streaming flag of the request the provider holds.
    pub(crate) sent_streaming: bool,
    /// Priority the provider currently assumes.
    pub(crate) sent_priority: Priority,
    /// Mid multi-part refresh.
    pub(crate) refreshing: bool,
    /// A request that asked for an image is outstanding.
    pub(crate) refresh_requested: bool,
    pub(crate) subscribers: IndexSet<StreamId>,
    /// Attaches held back until the current refresh completes.
    pub(crate) queued: Vec<StreamId>,
    /// Reissue held back during a multi-part refresh; `Some(true)` wants an image.
    pub(crate) deferred_reissue: Option<bool>,
    pub(crate) holds_slot: bool,
    /// The provider holds this stream paused.
    pub(crate) sent_paused: bool,
    pub(crate) timer: Option<TimerId>,
    pub(crate) attempts: u32,
    pub(crate) payload: Bytes,
}

impl Upstream {
    pub(crate) fn new(stream_id: StreamId, key: AggregationKey, payload: Bytes) -> Self {
        Self {
            stream_id,
            key,
            phase: Phase::Queued,
            sent_streaming: true,
            sent_priority: Priority::default(),
            refreshing: false,
            refresh_requested: false,
            subscribers: IndexSet::new(),
            queued: Vec::new(),
            deferred_reissue: None,
            holds_slot: false,
            sent_paused: false,
            timer: None,
            attempts: 0,
            payload,
        }
    }

    /// Consumers riding on this stream, attached first, then queued.
    pub(crate) fn all_consumers(&self) -> Vec<StreamId> {
        self.subscribers
            .iter()
            .copied()
            .chain(self.queued.iter().copied())
            .collect()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && self.queued.is_empty()
    }

    /// Wire request carrying this stream's key and the given parameters.
    pub(crate) fn request(&self, streaming: bool, priority: Option<Priority>) -> RequestMsg {
        let mut key = MsgKey::named(self.key.name()).with_service_id(self.key.service_id());
        key.name_type = self.key.name_type();
        RequestMsg {
            stream_id: self.stream_id,
            domain: self.key.domain(),
            key,
            streaming,
            no_refresh: false,
            priority,
            qos: self.key.qos(),
            worst_qos: self.key.worst_qos(),
            pause: false,
            private: self.key.is_private(),
            payload: self.payload.clone(),
        }
    }
}

#[derive(Debug)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Subscriber {
    pub(crate) request: RequestMsg,
    pub(crate) priority: Priority,
    pub(crate) service: ServiceRef,
    pub(crate) info: StreamInfo,
    /// Upstream this subscriber is attached or queued on.
    pub(crate) upstream: Option<StreamId>,
    pub(crate) awaiting_refresh: bool,
    /// Has seen at least one refresh part since it was last placed.
    /// Updates are withheld until then.
    pub(crate) has_image: bool,
    /// Already told its service is unavailable.
    pub(crate) notified: bool,
}

impl Subscriber {
    pub(crate) fn consumer_id(&self) -> StreamId {
        self.request.stream_id
    }

    pub(crate) fn streaming(&self) -> bool {
        self.request.streaming
    }

    pub(crate) fn paused(&self) -> bool {
        self.request.streaming && self.request.pause
    }
}

/// Aggregate priority over streaming subscribers: the highest class wins
/// and counts within that class add up. `None` when nobody streams.
pub(crate) fn aggregate_priority<'a>(
    subscribers: impl IntoIterator<Item = &'a Subscriber>,
) -> Option<Priority> {
    subscribers
        .into_iter()
        .filter(|s| s.streaming())
        .map(|s| s.priority)
        .fold(None, |acc: Option<Priority>, p| match acc {
            None => Some(p),
            Some(a) if p.class > a.class => Some(p),
            Some(a) if p.class == a.class => {
                Some(Priority::new(a.class, a.count.saturating_add(p.count)))
            }
            Some(a) => Some(a),
        })
}
