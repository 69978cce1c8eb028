//! Service Broker Operators
//!
//! Watch-driven operators and status pollers that carry service broker
//! backup, restore and bind requests through their lifecycle, plus the
//! metering archive job.

pub mod config;
pub mod controllers;
pub mod crd;
pub mod director;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod reconcilers;
pub mod retry;
pub mod services;
pub mod store;

pub use error::{Error, Result};
