//! Cassette format, storage, matching and replay sequencing.

pub mod format;
pub mod matcher;
pub mod session;
pub mod store;
