//! Virtual host bind operator
//!
//! Binds and unbinds against the instance named by the `instance_guid` label.
//! Only errors raised by the bind service or by request parsing are turned into
//! a FAILED resource; resource store errors surface to the engine unchanged.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use tracing::info;

use crate::controllers::{Context, Operator};
use crate::crd::{Resource, ResourceKind, ResourceState, INSTANCE_GUID_LABEL};
use crate::error::{Error, Result};
use crate::store::ResourceChange;

const VALID_STATES: [ResourceState; 2] = [ResourceState::InQueue, ResourceState::Delete];

pub struct VirtualHostBindOperator {
    ctx: Context,
}

impl VirtualHostBindOperator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    fn instance_guid(resource: &Resource) -> Result<&str> {
        resource.label(INSTANCE_GUID_LABEL).ok_or_else(|| {
            Error::validation(format!(
                "Bind {} has no {} label",
                resource.name(),
                INSTANCE_GUID_LABEL
            ))
        })
    }

    async fn process_bind(&self, resource: &Resource) -> Result<()> {
        let options = resource.options_value()?;
        let instance_guid = Self::instance_guid(resource)?;
        info!(name = %resource.name(), instance_guid = %instance_guid, "Triggering bind for virtualhost");

        let service = self.ctx.services.bind_service(instance_guid, &options).await?;
        let response = service.bind(&options).await?;
        let encoded = STANDARD.encode(serde_json::to_vec(&response)?);

        self.ctx
            .store
            .update_resource(
                ResourceChange::new(self.kind(), resource.name())
                    .response(Value::String(encoded))
                    .state(ResourceState::Succeeded),
            )
            .await?;
        Ok(())
    }

    async fn process_unbind(&self, resource: &Resource) -> Result<()> {
        let options = resource.options_value()?;
        let instance_guid = Self::instance_guid(resource)?;
        info!(name = %resource.name(), instance_guid = %instance_guid, "Triggering unbind for virtualhost");

        let service = self.ctx.services.bind_service(instance_guid, &options).await?;
        service.unbind(&options).await?;
        self.ctx
            .store
            .delete_resource(self.kind(), resource.name())
            .await
    }
}

#[async_trait]
impl Operator for VirtualHostBindOperator {
    fn name(&self) -> &'static str {
        "VirtualHostBindOperator"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::VIRTUALHOST_BIND
    }

    fn valid_states(&self) -> &[ResourceState] {
        &VALID_STATES
    }

    async fn process_request(&self, resource: &Resource) -> Result<()> {
        match resource.state() {
            Some(ResourceState::InQueue) => self.process_bind(resource).await,
            Some(ResourceState::Delete) => self.process_unbind(resource).await,
            _ => Ok(()),
        }
    }

    fn downgrade_to_failure(&self, err: &Error) -> bool {
        !err.is_store_error()
    }
}
