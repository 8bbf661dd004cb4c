//! Incremental multi-resource sync engine.
//!
//! A [`Scheduler`] drives cycles over all active accounts; each
//! (account, resource type) key is synchronised by the generic [`SyncRunner`]
//! through the [`ResourceAdapter`] registered for that type.

pub mod adapter;
pub mod admin;
pub mod events;
pub mod gating;
pub mod pool;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod window;

#[cfg(test)]
mod test_support;

pub use adapter::{AdapterError, NormalizedItem, Page, ResourceAdapter};
pub use admin::SyncAdmin;
pub use events::{FanoutEventSink, HistoryEventSink, RunEvent, RunEventSink, TracingEventSink};
pub use pool::WorkerPool;
pub use registry::{ResourceDescriptor, ResourceRegistry};
pub use runner::{RunFailure, RunOutcome, RunResult, SyncRunner};
pub use scheduler::{CycleSummary, KeyOutcome, Scheduler};
pub use window::{compute_window, SyncWindow};
