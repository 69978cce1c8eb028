//! HTTP-forwarding service executor
//!
//! Each capability call becomes `POST {endpoint}/{path}/{operation}` with the
//! request options as the JSON body. The remote service owns the real backup,
//! restore, bind and deployment logic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    BackupService, BindService, DeploymentOperation, DeploymentService, Plan, RestoreService,
    ServiceFactory,
};
use crate::error::{Error, Result};

/// Executor bound to one endpoint and resource path
pub struct HttpServiceExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpServiceExecutor {
    pub fn new(client: reqwest::Client, endpoint: &str, path: &str) -> Self {
        Self {
            client,
            base_url: format!("{}/{}", endpoint.trim_end_matches('/'), path),
        }
    }

    async fn call(&self, operation: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, operation);
        debug!(url = %url, "Calling service executor");

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::service(format!(
                "{} failed with {}: {}",
                operation, status, text
            )));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl BackupService for HttpServiceExecutor {
    async fn start_backup(&self, options: &Value) -> Result<Value> {
        self.call("start", options).await
    }

    async fn abort_last_backup(&self, options: &Value) -> Result<Value> {
        self.call("abort", options).await
    }

    async fn delete_backup(&self, options: &Value) -> Result<()> {
        self.call("delete", options).await.map(|_| ())
    }
}

#[async_trait]
impl RestoreService for HttpServiceExecutor {
    async fn start_restore(&self, options: &Value) -> Result<Value> {
        self.call("start", options).await
    }

    async fn abort_last_restore(&self, options: &Value) -> Result<Value> {
        self.call("abort", options).await
    }

    async fn create_patch_object(&self, options: &Value, result: &str) -> Result<Value> {
        self.call("patch-object", &json!({"options": options, "result": result}))
            .await
    }

    async fn patch_restore_file_with_final_result(
        &self,
        options: &Value,
        patch: &Value,
    ) -> Result<()> {
        self.call("final-result", &json!({"options": options, "patch": patch}))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl BindService for HttpServiceExecutor {
    async fn bind(&self, options: &Value) -> Result<Value> {
        self.call("bind", options).await
    }

    async fn unbind(&self, options: &Value) -> Result<()> {
        self.call("unbind", options).await.map(|_| ())
    }
}

#[async_trait]
impl DeploymentService for HttpServiceExecutor {
    async fn run(
        &self,
        operation: DeploymentOperation,
        options: &Value,
        deployment_name: Option<&str>,
    ) -> Result<Value> {
        self.call(
            operation.as_str(),
            &json!({"options": options, "deployment_name": deployment_name}),
        )
        .await
    }
}

/// Factory building [`HttpServiceExecutor`]s
pub struct HttpServiceFactory {
    client: reqwest::Client,
    default_endpoint: String,
}

impl HttpServiceFactory {
    pub fn new(default_endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            default_endpoint: default_endpoint.into(),
        })
    }

    fn executor_for_plan(&self, plan: &Plan, path: &str) -> Arc<HttpServiceExecutor> {
        let endpoint = plan.endpoint.as_deref().unwrap_or(&self.default_endpoint);
        Arc::new(HttpServiceExecutor::new(self.client.clone(), endpoint, path))
    }

    fn executor(&self, path: &str) -> Arc<HttpServiceExecutor> {
        Arc::new(HttpServiceExecutor::new(
            self.client.clone(),
            &self.default_endpoint,
            path,
        ))
    }
}

#[async_trait]
impl ServiceFactory for HttpServiceFactory {
    async fn backup_service(&self, plan: &Plan) -> Result<Arc<dyn BackupService>> {
        Ok(self.executor_for_plan(plan, &format!("plans/{}/backup", plan.id)))
    }

    async fn restore_service(&self, plan: &Plan) -> Result<Arc<dyn RestoreService>> {
        Ok(self.executor_for_plan(plan, &format!("plans/{}/restore", plan.id)))
    }

    async fn bind_service(
        &self,
        instance_guid: &str,
        _options: &Value,
    ) -> Result<Arc<dyn BindService>> {
        if instance_guid.is_empty() {
            return Err(Error::validation("Bind request carries no instance guid"));
        }
        Ok(self.executor(&format!("instances/{}/virtualhost", instance_guid)))
    }

    async fn deployment_service(
        &self,
        instance_id: &str,
        _options: &Value,
    ) -> Result<Arc<dyn DeploymentService>> {
        Ok(self.executor(&format!("instances/{}/deployment", instance_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_url_joins_endpoint_and_path() {
        let executor =
            HttpServiceExecutor::new(reqwest::Client::new(), "http://broker:9293/", "plans/p1/backup");
        assert_eq!(executor.base_url, "http://broker:9293/plans/p1/backup");
    }
}
