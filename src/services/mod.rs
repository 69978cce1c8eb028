//! External service capabilities
//!
//! The operators only know these traits. Concrete executors are built per plan
//! (backup/restore) or per instance (bind/deployment) through a
//! [`ServiceFactory`].

mod catalog;
mod http;

pub use catalog::{Catalog, Plan, StaticCatalog};
pub use http::{HttpServiceExecutor, HttpServiceFactory};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

/// Backup executor for one plan
#[async_trait]
pub trait BackupService: Send + Sync {
    async fn start_backup(&self, options: &Value) -> Result<Value>;

    async fn abort_last_backup(&self, options: &Value) -> Result<Value>;

    async fn delete_backup(&self, options: &Value) -> Result<()>;
}

/// Restore executor for one plan
#[async_trait]
pub trait RestoreService: Send + Sync {
    async fn start_restore(&self, options: &Value) -> Result<Value>;

    async fn abort_last_restore(&self, options: &Value) -> Result<Value>;

    /// Build the final status payload for a restore ending in `result`
    async fn create_patch_object(&self, options: &Value, result: &str) -> Result<Value>;

    /// Persist the final restore result where the service keeps its records
    async fn patch_restore_file_with_final_result(
        &self,
        options: &Value,
        patch: &Value,
    ) -> Result<()>;
}

/// Bind executor for one service instance
#[async_trait]
pub trait BindService: Send + Sync {
    /// Create a binding and return its credentials document
    async fn bind(&self, options: &Value) -> Result<Value>;

    async fn unbind(&self, options: &Value) -> Result<()>;
}

/// Deployment operation recorded in a director resource's response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentOperation {
    Create,
    Update,
    Delete,
}

impl DeploymentOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentOperation::Create => "create",
            DeploymentOperation::Update => "update",
            DeploymentOperation::Delete => "delete",
        }
    }
}

impl std::str::FromStr for DeploymentOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(DeploymentOperation::Create),
            "update" => Ok(DeploymentOperation::Update),
            "delete" => Ok(DeploymentOperation::Delete),
            other => Err(Error::validation(format!(
                "Unknown deployment operation '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DeploymentOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment executor for one service instance
#[async_trait]
pub trait DeploymentService: Send + Sync {
    /// Trigger `operation` on the deployment; the director response carries a
    /// `task_id` once the director accepted the work
    async fn run(
        &self,
        operation: DeploymentOperation,
        options: &Value,
        deployment_name: Option<&str>,
    ) -> Result<Value>;
}

/// Builds service executors
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    async fn backup_service(&self, plan: &Plan) -> Result<Arc<dyn BackupService>>;

    async fn restore_service(&self, plan: &Plan) -> Result<Arc<dyn RestoreService>>;

    async fn bind_service(
        &self,
        instance_guid: &str,
        options: &Value,
    ) -> Result<Arc<dyn BindService>>;

    async fn deployment_service(
        &self,
        instance_id: &str,
        options: &Value,
    ) -> Result<Arc<dyn DeploymentService>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_operation_parses_lowercase() {
        assert_eq!(
            "update".parse::<DeploymentOperation>().unwrap(),
            DeploymentOperation::Update
        );
        assert!("UPDATE".parse::<DeploymentOperation>().is_err());
        assert_eq!(DeploymentOperation::Delete.to_string(), "delete");
    }
}
