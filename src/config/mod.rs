// This module re-exports important pieces for convenience,
// so we can "use crate::config::*" easily.
pub mod client;
#[allow(clippy::module_inception)]
pub mod config;
pub mod logging;
pub mod store;

pub use client::*;
pub use config::*;
pub use logging::*;
pub use store::*;
