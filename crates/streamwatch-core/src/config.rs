// ── Watchlist configuration ──
//
// Recognized per-connection options. Loading from files and environment
// lives in streamwatch-config; this is the resolved form.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How an open item stream is reissued when its aggregated priority or
/// parameters change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ReissuePolicy {
    /// Send a new request on the same stream.
    #[default]
    InPlace,
    /// Close the stream and request it again.
    CloseAndResend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchlistConfig {
    /// With `false` the watchlist only forwards messages.
    pub enable_watchlist: bool,
    /// Bound new item requests per service by the advertised open window.
    pub obey_open_window: bool,
    /// How long to wait for a refresh before retrying a request.
    pub request_timeout: Duration,
    /// How long to wait for a post acknowledgement.
    pub post_ack_timeout: Duration,
    pub max_outstanding_posts: usize,
    /// Forward `ChannelEvent::Opened` to the consumer.
    pub channel_open_callback: bool,
    /// Request timeouts tolerated before a stream is closed. `None` retries forever.
    pub max_request_retries: Option<u32>,
    pub reissue_policy: ReissuePolicy,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            enable_watchlist: true,
            obey_open_window: true,
            request_timeout: Duration::from_secs(15),
            post_ack_timeout: Duration::from_secs(15),
            max_outstanding_posts: 100_000,
            channel_open_callback: false,
            max_request_retries: None,
            reissue_policy: ReissuePolicy::InPlace,
        }
    }
}

impl WatchlistConfig {
    /// Whether `attempts` timeouts exhaust the retry budget.
    pub(crate) fn retries_exhausted(&self, attempts: u32) -> bool {
        self.max_request_retries.is_some_and(|max| attempts > max)
    }
}
