// ── Aggregation key ──
//
// Two item requests with equal keys share one upstream stream. A key is
// only ever built whole from a request and a resolved service id; there is
// no way to hold a partially populated one.

use streamwatch_api::{DomainType, Qos, RequestMsg, StreamId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    domain: DomainType,
    name_type: Option<u8>,
    name: String,
    service_id: u16,
    qos: Option<Qos>,
    worst_qos: Option<Qos>,
    /// Owning consumer stream of a private request.
    private_to: Option<StreamId>,
}

impl AggregationKey {
    /// Key for `request` on service `service_id`. `None` if the request
    /// carries no item name.
    pub fn from_request(request: &RequestMsg, service_id: u16) -> Option<Self> {
        let name = request.key.name.clone()?;
        Some(Self {
            domain: request.domain,
            name_type: request.key.name_type,
            name,
            service_id,
            qos: request.qos,
            worst_qos: request.worst_qos,
            private_to: request.private.then_some(request.stream_id),
        })
    }

    /// The same key with the qos settled against the service.
    #[must_use]
    pub fn negotiated(mut self, qos: Qos) -> Self {
        self.qos = Some(qos);
        self.worst_qos = None;
        self
    }

    pub fn domain(&self) -> DomainType {
        self.domain
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_type(&self) -> Option<u8> {
        self.name_type
    }

    pub fn service_id(&self) -> u16 {
        self.service_id
    }

    pub fn qos(&self) -> Option<Qos> {
        self.qos
    }

    pub fn worst_qos(&self) -> Option<Qos> {
        self.worst_qos
    }

    pub fn is_private(&self) -> bool {
        self.private_to.is_some()
    }
}
