//! Replaying adapters that reproduce recorded interactions.

pub mod process;
mod timer;

pub use process::{Phase, ReplayTiming, SimulatedProcess};
