//! Admission, retry and lifecycle tracking for asynchronous completion jobs.
//!
//! A [Conveyor] accepts jobs, runs at most a configured number of them at a
//! time against a [Downstream] completion call, retries failed attempts with
//! exponential backoff, and notifies an optional callback endpoint once a
//! job reaches a terminal state. Stale job records are evicted by a
//! periodic reaper.
//!
//! ```text
//! submit ──► AdmissionQueue ──► JobExecutor ──► JobStore (terminal)
//!               ▲                    │               │
//!               └──── release ◄──────┘               └──► Notifier
//! ```

#[macro_use]
extern crate tracing as extern_tracing;

mod config;
mod conveyor;
mod downstream;
mod error;
mod executor;
mod job;
mod notifier;
mod queue;
mod reaper;
mod store;

pub mod tracing;

#[cfg(any(test, feature = "helpers"))]
pub mod helpers;

pub use config::*;
pub use conveyor::*;
pub use downstream::*;
pub use error::*;
pub use executor::*;
pub use job::*;
pub use notifier::*;
pub use queue::*;
pub use reaper::*;
pub use store::*;
