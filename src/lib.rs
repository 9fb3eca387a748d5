//! adbridge — campaign gateway in front of the ads Graph API.
//!
//! The gateway forwards dashboard reads/writes with server-side
//! credentials; the simulator checks proposed changes against policy.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod middleware;
pub mod money;
pub mod simulator;
