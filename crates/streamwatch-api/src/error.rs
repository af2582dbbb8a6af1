use thiserror::Error;

/// Transport-level failures reported by the submit primitive.
///
/// The watchlist never shows these to consumers raw: recoverable ones
/// drive stream recovery, the rest are surfaced through
/// `streamwatch_core::WatchlistError::Transport`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // ── Channel ─────────────────────────────────────────────────────
    /// The carrying connection is not up.
    #[error("Channel is down")]
    ChannelDown,

    /// The connection has no output buffers left; try again later.
    #[error("No output buffers available")]
    NoBuffers,

    /// The transport was shut down and will never accept messages again.
    #[error("Transport closed")]
    Closed,

    // ── Codec ───────────────────────────────────────────────────────
    /// The codec refused to encode the message.
    #[error("Failed to encode {what}: {reason}")]
    Encode { what: String, reason: String },
}

impl Error {
    /// Returns `true` if submitting the same message later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChannelDown | Self::NoBuffers)
    }
}
