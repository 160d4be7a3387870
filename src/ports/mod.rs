//! Port traits defining external boundaries.
//!
//! The process port is the boundary between the harness and the operating
//! system. Implementations live in `src/adapters/`.

pub mod process;

pub use process::{
    ChildControl, CompletedProcess, Invocation, LaunchedChild, Launcher, ProcessFactory,
    ProcessHandle,
};
