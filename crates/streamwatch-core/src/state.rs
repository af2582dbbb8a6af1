use strum::Display;

/// Lifecycle of a watchlist-owned stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum StreamStatus {
    #[default]
    NotEstablished,
    PendingRequest,
    Open,
    /// Data degraded but the stream is still up.
    OpenSuspect,
    /// Reissued automatically once the cause clears.
    ClosedRecoverable,
    ClosedTerminal,
}

impl StreamStatus {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::OpenSuspect)
    }
}

/// What a login or directory event means for the streams that depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionChange {
    None,
    /// The stream became open for the first time since it was (re)requested.
    Established,
    /// The stream closed recoverably; dependents suspend and wait.
    Recovering,
    /// The stream is gone for good; dependents are torn down.
    Terminated,
}

/// Item-wide pause carried by a login reissue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PauseChange {
    None,
    PauseAll,
    ResumeAll,
}
