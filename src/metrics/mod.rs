//! Prometheus metrics for the service broker operators
//!
//! Operators, pollers and the archive job record into the default registry;
//! `serve` exposes it together with health endpoints.

mod prometheus;

pub use prometheus::*;
