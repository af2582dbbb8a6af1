//! Source directory: the service cache and the handler that keeps it
//! current and serves consumer directory streams from it.

mod cache;
mod handler;

pub use cache::{DirectoryCache, ServiceChange};
pub(crate) use handler::{DirectoryHandler, DirectoryOutcome};
