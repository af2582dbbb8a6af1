// ── Posting ──
//
// Outstanding posts that asked for an acknowledgement, keyed by the
// provider-facing stream, post id and optional sequence number. A record
// leaves the table exactly once: on a matching ack or on timeout.

use std::collections::HashMap;

use streamwatch_api::{AckMsg, DomainType, MsgKey, NakCode, StreamId};
use tokio::time::Instant;

use crate::event::StreamInfo;
use crate::timer::TimerId;

/// Text of the acknowledgement synthesized when a post times out.
pub(crate) const ACK_TIMEOUT_TEXT: &str = "Acknowledgement timed out.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PostKey {
    pub stream_id: StreamId,
    pub post_id: u32,
    pub seq_num: Option<u32>,
}

#[derive(Debug, Clone)]
pub(crate) struct PostRecord {
    pub(crate) key: PostKey,
    /// Consumer stream the post was submitted on.
    pub(crate) owner: StreamId,
    pub(crate) domain: DomainType,
    pub(crate) info: StreamInfo,
    pub(crate) part_num: Option<u16>,
    pub(crate) complete: bool,
    pub(crate) msg_key: Option<MsgKey>,
    pub(crate) submitted: Instant,
    pub(crate) timer: TimerId,
}

impl PostRecord {
    /// Negative acknowledgement delivered when no ack arrives in time.
    pub(crate) fn timeout_nak(&self) -> AckMsg {
        let mut nak = AckMsg::new(self.owner, self.domain, self.key.post_id);
        nak.nak_code = Some(NakCode::NoResponse);
        nak.text = Some(ACK_TIMEOUT_TEXT.to_owned());
        nak.seq_num = self.key.seq_num;
        nak.key = self.msg_key.as_ref().map(|k| MsgKey {
            name: k.name.clone(),
            service_id: k.service_id,
            ..MsgKey::default()
        });
        nak
    }
}

#[derive(Debug, Default)]
pub(crate) struct PostTable {
    records: HashMap<PostKey, PostRecord>,
}

impl PostTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Track a record. Returns it back if its key is already outstanding.
    pub(crate) fn insert(&mut self, record: PostRecord) -> Result<(), PostRecord> {
        if self.records.contains_key(&record.key) {
            return Err(record);
        }
        self.records.insert(record.key, record);
        Ok(())
    }

    /// Match an incoming ack on stream, post id and sequence number.
    pub(crate) fn acknowledge(
        &mut self,
        stream_id: StreamId,
        ack_id: u32,
        seq_num: Option<u32>,
    ) -> Option<PostRecord> {
        let key = PostKey {
            stream_id,
            post_id: ack_id,
            seq_num,
        };
        self.records.remove(&key)
    }

    pub(crate) fn expire(&mut self, key: &PostKey) -> Option<PostRecord> {
        self.records.remove(key)
    }

    pub(crate) fn contains(&self, key: &PostKey) -> bool {
        self.records.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
