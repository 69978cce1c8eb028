//! Default restore operator

use async_trait::async_trait;
use tracing::info;

use super::required_str;
use crate::controllers::{Context, Operator};
use crate::crd::{Resource, ResourceKind, ResourceState};
use crate::error::Result;

const VALID_STATES: [ResourceState; 3] = [
    ResourceState::InQueue,
    ResourceState::Abort,
    ResourceState::Delete,
];

pub struct DefaultRestoreOperator {
    ctx: Context,
}

impl DefaultRestoreOperator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn process_restore(&self, resource: &Resource) -> Result<()> {
        let options = resource.options_value()?;
        info!(name = %resource.name(), "Triggering restore");
        let plan = self.ctx.catalog.get_plan(required_str(&options, "plan_id")?)?;
        let service = self.ctx.services.restore_service(&plan).await?;
        service.start_restore(&options).await?;
        Ok(())
    }

    /// Abort uses the request's own options; restores are not looked up by guid
    async fn process_abort(&self, resource: &Resource) -> Result<()> {
        let options = resource.options_value()?;
        info!(name = %resource.name(), "Triggering abort restore");
        let plan = self.ctx.catalog.get_plan(required_str(&options, "plan_id")?)?;
        let service = self.ctx.services.restore_service(&plan).await?;
        service.abort_last_restore(&options).await?;
        Ok(())
    }
}

#[async_trait]
impl Operator for DefaultRestoreOperator {
    fn name(&self) -> &'static str {
        "DefaultRestoreOperator"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::DEFAULT_RESTORE
    }

    fn valid_states(&self) -> &[ResourceState] {
        &VALID_STATES
    }

    async fn process_request(&self, resource: &Resource) -> Result<()> {
        match resource.state() {
            Some(ResourceState::InQueue) => self.process_restore(resource).await,
            Some(ResourceState::Abort) => self.process_abort(resource).await,
            Some(ResourceState::Delete) => {
                info!(name = %resource.name(), "Restore has no delete action, ignoring");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
