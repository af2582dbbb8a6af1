// ── Watchlist error types ──
//
// User-facing errors from streamwatch-core. Consumers see the three return
// codes of the submit contract; transport errors are wrapped rather than
// exposed through a second taxonomy.

use strum::Display;
use thiserror::Error;

/// Outcome code of every submit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ReturnCode {
    Success,
    InvalidUsage,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchlistError {
    // ── Caller errors ────────────────────────────────────────────────
    /// The call misused the API: incompatible reissue, malformed post,
    /// disallowed credential change.
    #[error("Invalid usage: {message}")]
    InvalidUsage { message: String },

    /// A narrower rejection, such as changing the streaming flag on reissue.
    #[error("Request failed: {message}")]
    Failure { message: String },

    // ── Transport ────────────────────────────────────────────────────
    #[error("Transport error: {0}")]
    Transport(#[from] streamwatch_api::Error),

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Watchlist has shut down")]
    ShutDown,
}

impl WatchlistError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidUsage {
            message: message.into(),
        }
    }

    pub(crate) fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    /// Return code reported for this error.
    pub fn code(&self) -> ReturnCode {
        match self {
            Self::InvalidUsage { .. } => ReturnCode::InvalidUsage,
            Self::Failure { .. } | Self::Transport(_) | Self::ShutDown => ReturnCode::Failure,
        }
    }
}

impl From<Result<(), WatchlistError>> for ReturnCode {
    fn from(result: Result<(), WatchlistError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e) => e.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(
            WatchlistError::invalid("bad").code(),
            ReturnCode::InvalidUsage
        );
        assert_eq!(WatchlistError::failure("no").code(), ReturnCode::Failure);
        assert_eq!(
            WatchlistError::from(streamwatch_api::Error::ChannelDown).code(),
            ReturnCode::Failure
        );
        assert_eq!(ReturnCode::from(Ok(())), ReturnCode::Success);
    }

    #[test]
    fn messages_render() {
        let err = WatchlistError::invalid("Cannot have more than one login stream");
        assert_eq!(
            err.to_string(),
            "Invalid usage: Cannot have more than one login stream"
        );
    }
}
