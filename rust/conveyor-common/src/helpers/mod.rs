//! Generic helper utilities intended to be used exclusively in tests

mod wait;

pub use wait::*;
