//! Process bridge between a privileged frontend thread and child processes.
//!
//! Spawns OS commands with their three standard streams redirected through
//! pipes, drains stdout/stderr on dedicated reader threads, and delivers
//! ordered chunk notifications onto a single-threaded dispatcher. Sessions
//! are keyed by the stdin write-end descriptor, the same number the
//! frontend uses on the wire.
//!
//! The embedding runtime is modeled at its interface only: [`Responder`]
//! resolves or rejects one pending frontend call, [`Dispatch`] schedules a
//! closure on the privileged thread, and [`ipc::NATIVE_INIT_SCRIPT`] is the
//! script establishing the frontend-side consumption contract.

pub mod bridge;
pub mod dispatch;
pub mod ipc;
pub mod launcher;
pub mod pipe;
pub mod reader;
pub mod registry;

pub use bridge::{Bridge, Responder};
pub use dispatch::{Dispatch, Job, SingleThreadExecutor};
pub use ipc::{OpenResponse, NATIVE_INIT_SCRIPT};
pub use pipe::FdGuard;
pub use registry::SessionTable;

#[cfg(all(test, unix))]
mod tests;
