//! Haven - Offline request-interception and caching engine
//!
//! Intercepts the requests an application issues, routes them through an
//! ordered rule table to a caching strategy, and keeps answering when the
//! network is gone.

pub mod cache;
pub mod classifier;
pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod manifest;
pub mod network;
pub mod report;
pub mod signal;
pub mod strategy;

#[cfg(test)]
mod test_support;

pub use engine::{Engine, EngineDeps};
pub use error::{HavenError, HavenResult};
