//! Kind-specific operators and status pollers
//!
//! - `backup`, `restore`, `bind`: request operators routing on the resource state
//! - `restore_status`: the bosh restore phase machine
//! - `deployment`: the staggered deployment poller for director resources

pub mod backup;
pub mod bind;
pub mod deployment;
pub mod restore;
pub mod restore_status;

pub use backup::DefaultBackupOperator;
pub use bind::VirtualHostBindOperator;
pub use deployment::BoshStaggeredDeploymentPoller;
pub use restore::DefaultRestoreOperator;
pub use restore_status::BoshRestoreStatusPoller;

use serde_json::Value;

use crate::error::{Error, Result};

/// Required string field of a request options document
fn required_str<'a>(options: &'a Value, key: &str) -> Result<&'a str> {
    options
        .get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::validation(format!("Request options carry no '{}'", key)))
}
