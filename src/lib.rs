//! ICMP traceroute engine.
//!
//! [`TraceRouteManager`] traces hosts by name, running at most one
//! [`TraceRouteEngine`] per host and sharing its [`TraceRouteResult`] with
//! every caller that asked for that host.

pub mod cli;
pub mod config;
pub mod dns;
pub mod engine;
pub mod error;
pub mod icmp;
pub mod manager;
pub mod result;
pub mod stats;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use config::TraceConfig;
pub use engine::{EngineState, TraceEvent, TraceRouteEngine};
pub use error::{Result, TraceRouteError};
pub use manager::TraceRouteManager;
pub use result::{HopRecord, TraceRouteResult};
