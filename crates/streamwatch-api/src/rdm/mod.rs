//! Decoded RDM messages for the administrative domains.

pub mod directory;
pub mod login;
