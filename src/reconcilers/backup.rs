//! Default backup operator
//!
//! - `IN_QUEUE`: start a backup for the requested plan
//! - `ABORT` / `DELETE`: look up the stored options of the backup named by
//!   `options.guid` and abort or delete it

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::required_str;
use crate::controllers::{Context, Operator};
use crate::crd::{Resource, ResourceKind, ResourceState};
use crate::error::{Error, Result};
use crate::store::ResourceChange;

const VALID_STATES: [ResourceState; 3] = [
    ResourceState::InQueue,
    ResourceState::Abort,
    ResourceState::Delete,
];

pub struct DefaultBackupOperator {
    ctx: Context,
}

impl DefaultBackupOperator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn process_backup(&self, resource: &Resource) -> Result<()> {
        let options = resource.options_value()?;
        info!(name = %resource.name(), "Triggering backup");
        let plan = self.ctx.catalog.get_plan(required_str(&options, "plan_id")?)?;
        let service = self.ctx.services.backup_service(&plan).await?;
        service.start_backup(&options).await?;
        Ok(())
    }

    async fn process_abort(&self, resource: &Resource) -> Result<()> {
        let options = self.stored_options(resource).await?;
        info!(name = %resource.name(), "Aborting last backup");
        let plan = self.ctx.catalog.get_plan(required_str(&options, "plan_id")?)?;
        let service = self.ctx.services.backup_service(&plan).await?;
        service.abort_last_backup(&options).await?;
        Ok(())
    }

    async fn process_delete(&self, resource: &Resource) -> Result<()> {
        let options = self.stored_options(resource).await?;
        info!(name = %resource.name(), "Deleting backup");
        let plan = self.ctx.catalog.get_plan(required_str(&options, "plan_id")?)?;
        let service = self.ctx.services.backup_service(&plan).await?;
        service.delete_backup(&options).await
    }

    /// Options of the backup the request refers to
    async fn stored_options(&self, resource: &Resource) -> Result<Value> {
        let request = resource.options_value()?;
        let guid = required_str(&request, "guid")?;
        self.ctx.store.get_options(self.kind(), guid).await
    }
}

#[async_trait]
impl Operator for DefaultBackupOperator {
    fn name(&self) -> &'static str {
        "DefaultBackupOperator"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::DEFAULT_BACKUP
    }

    /// Director resources are created while a backup runs
    fn crds(&self) -> Vec<ResourceKind> {
        vec![ResourceKind::DEFAULT_BACKUP, ResourceKind::DIRECTOR]
    }

    fn valid_states(&self) -> &[ResourceState] {
        &VALID_STATES
    }

    async fn process_request(&self, resource: &Resource) -> Result<()> {
        match resource.state() {
            Some(ResourceState::InQueue) => self.process_backup(resource).await,
            Some(ResourceState::Abort) => self.process_abort(resource).await,
            Some(ResourceState::Delete) => self.process_delete(resource).await,
            _ => Ok(()),
        }
    }

    fn failure_change(&self, resource: &Resource, err: &Error) -> ResourceChange {
        ResourceChange::new(self.kind(), resource.name())
            .state(ResourceState::Failed)
            .response(json!({
                "state": ResourceState::Failed.to_string(),
                "description": err.description(),
            }))
            .error(err.into())
    }
}
