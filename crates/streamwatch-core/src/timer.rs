// ── Timer queue ──
//
// Single-shot deadlines ordered by (deadline, sequence). The owning
// watchlist checks them once per dispatch tick; nothing here sleeps.

use std::collections::BTreeMap;

use streamwatch_api::StreamId;
use tokio::time::Instant;

use crate::post::PostKey;

/// What a timer fires for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TimerKind {
    LoginRequest,
    DirectoryRequest,
    /// Upstream item stream, by provider-facing id.
    ItemRequest(StreamId),
    PostAck(PostKey),
}

/// Handle for cancelling a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TimerId {
    deadline: Instant,
    seq: u64,
}

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    entries: BTreeMap<TimerId, TimerKind>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn schedule(&mut self, deadline: Instant, kind: TimerKind) -> TimerId {
        let id = TimerId {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(id, kind);
        id
    }

    /// Cancel `id`. Returns `false` if it already fired or was cancelled.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|id| id.deadline)
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut fired = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().deadline > now {
                break;
            }
            fired.push(entry.remove());
        }
        fired
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
