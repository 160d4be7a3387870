//! Adapters implementing the process port.
//!
//! - `live`: starts real OS processes.
//! - `recording`: wraps a real process and captures it into a cassette.
//! - `replaying`: simulates a process from a recorded interaction.

pub mod live;
pub mod recording;
pub mod replaying;
