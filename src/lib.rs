// ABOUTME: Root library module exposing connectors, the turn runner and the app entry points
// ABOUTME: Re-exports the platform-agnostic modules from clawlink-core for convenience
#![recursion_limit = "256"]

pub mod app;
pub mod connectors;
pub mod turn;

// Re-export platform-agnostic modules from clawlink-core
pub use clawlink_core::config;
pub use clawlink_core::metrics;
pub use clawlink_core::paths;
pub use clawlink_core::traits;

pub use connectors::{build_connector, Connector};
pub use turn::{Agent, EchoAgent, TurnRunner};
