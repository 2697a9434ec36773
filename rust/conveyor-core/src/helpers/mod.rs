//! Test doubles for the engine's external collaborators, intended to be used
//! exclusively in tests

mod downstream;
mod transport;

pub use downstream::*;
pub use transport::*;
