//! Staggered deployment poller
//!
//! Director resources wait in `WAITING` until the director accepts their
//! deployment. Every tick re-triggers the recorded operation; once the
//! director hands back a task id the resource moves to `IN_PROGRESS`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::controllers::{Context, PollerHandle, StatusPoller};
use crate::crd::{Resource, ResourceKind, ResourceState};
use crate::error::{Error, ErrorJson, Result};
use crate::services::DeploymentOperation;
use crate::store::{merge_json, ResourceChange};

const VALID_STATES: [ResourceState; 1] = [ResourceState::Waiting];

pub struct BoshStaggeredDeploymentPoller {
    ctx: Context,
    poll_interval: Duration,
}

impl BoshStaggeredDeploymentPoller {
    pub fn new(ctx: Context, poll_interval: Duration) -> Self {
        Self { ctx, poll_interval }
    }

    async fn trigger(&self, resource: &Resource, operation: Option<&str>) -> Result<Value> {
        let operation: DeploymentOperation = operation
            .ok_or_else(|| Error::validation("Director resource has no operation type"))?
            .parse()?;
        let options = resource.options_value()?;
        let deployment_name = response_str(resource, "deployment_name");

        let service = self
            .ctx
            .services
            .deployment_service(resource.name(), &options)
            .await?;
        service.run(operation, &options, deployment_name).await
    }
}

#[async_trait]
impl StatusPoller for BoshStaggeredDeploymentPoller {
    fn name(&self) -> &'static str {
        "BoshStaggeredDeploymentPoller"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::DIRECTOR
    }

    fn valid_states(&self) -> &[ResourceState] {
        &VALID_STATES
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn get_status(&self, resource: &Resource, handle: &PollerHandle) -> Result<()> {
        let operation = response_str(resource, "type");

        match self.trigger(resource, operation).await {
            Ok(director_response) => {
                if director_response.get("task_id").map_or(true, Value::is_null) {
                    return Ok(());
                }
                let mut response = resource
                    .status
                    .response
                    .clone()
                    .unwrap_or_else(|| json!({}));
                merge_json(&mut response, &director_response);

                info!(name = %resource.name(), "Deployment accepted by the director");
                self.ctx
                    .store
                    .update_resource(
                        ResourceChange::new(self.kind(), resource.name())
                            .response(response)
                            .state(ResourceState::InProgress),
                    )
                    .await?;
                handle.clear();
                Ok(())
            }
            Err(err) => {
                error!(name = %resource.name(), error = %err, "Error occurred while triggering deployment");
                handle.clear();

                let description = format!(
                    "{} deployment {} failed at {} with Error \"{}\"",
                    operation.unwrap_or_default(),
                    response_str(resource, "deployment_name").unwrap_or_default(),
                    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                    err.description()
                );
                self.ctx
                    .store
                    .update_resource(
                        ResourceChange::new(self.kind(), resource.name())
                            .state(ResourceState::Failed)
                            .last_operation(json!({
                                "state": ResourceState::Failed.to_string(),
                                "description": description,
                            }))
                            .error(ErrorJson::from(&err)),
                    )
                    .await?;
                Ok(())
            }
        }
    }
}

fn response_str<'a>(resource: &'a Resource, key: &str) -> Option<&'a str> {
    resource
        .status
        .response
        .as_ref()
        .and_then(|r| r.get(key))
        .and_then(Value::as_str)
}
