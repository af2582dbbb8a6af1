//! The streamwatch watchlist.
//!
//! Sits between a consumer and one provider connection and turns raw
//! request, refresh, update and status traffic into deduplicated,
//! recoverable, flow-controlled subscriptions. [`Watchlist`] is the entry
//! point; [`reactor`] hosts one on a tokio task.

pub mod config;
mod context;
pub mod directory;
pub mod error;
pub mod event;
mod item;
pub mod key;
mod login;
pub mod post;
pub mod reactor;
pub mod state;
mod timer;
mod watchlist;
pub mod window;

pub use config::{ReissuePolicy, WatchlistConfig};
pub use directory::{DirectoryCache, ServiceChange};
pub use error::{ReturnCode, WatchlistError};
pub use event::{
    ConsumerCallback, ConsumerEvent, DirectoryEvent, LoginEvent, MsgEvent, StreamInfo,
    SubmitOptions, UserSpec,
};
pub use key::AggregationKey;
pub use post::PostKey;
pub use reactor::ReactorHandle;
pub use state::StreamStatus;
pub use watchlist::{Submission, Watchlist};
pub use window::{Admission, OpenWindow};
