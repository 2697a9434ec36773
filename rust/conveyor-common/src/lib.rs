//! Common, generic async utilities that are shared across Conveyor packages.
#![warn(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod channel;
mod task;

pub use task::*;

#[cfg(any(test, feature = "helpers"))]
pub mod helpers;
