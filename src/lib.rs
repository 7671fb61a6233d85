//! Library exports for atms-client, shared between the binary and tests.

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod navigation;
pub mod startup;
pub mod store;
pub mod utils;
