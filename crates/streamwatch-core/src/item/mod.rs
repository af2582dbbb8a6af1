//! Item streams: consumer requests aggregated onto upstream streams.

mod handler;
mod stream;

pub(crate) use handler::ItemHandler;
