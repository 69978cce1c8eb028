//! Bosh restore phase machine
//!
//! A bosh restore moves through
//! `BOSH_STOP → CREATE_DISK → ATTACH_DISK → PUT_FILE → BASEBACKUP_ERRAND →
//! PITR_ERRAND → BOSH_START → POST_BOSH_START → FINALIZE`. The restore service
//! triggers each phase; this poller watches the `IN_PROGRESS_*` phases that
//! wait on director tasks and patches the successor state once they finish.
//!
//! Task results are merged into the restore options under `stateResults`
//! (or `restoreMetadata.deploymentInstancesInfo` for disk attachment) so a
//! restarted operator resumes from what is already recorded.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{error, info};

use super::required_str;
use crate::controllers::{Context, PollerHandle, StatusPoller};
use crate::crd::{Resource, ResourceKind, ResourceState, RestoreOptions, RestorePhase};
use crate::director::TaskResult;
use crate::error::{Error, Result};
use crate::metrics;
use crate::store::ResourceChange;

/// What a polled phase waits on
#[derive(Clone, Copy, Debug)]
enum PhaseTask {
    /// One director task recorded under `stateResults.<key>`
    Single {
        key: &'static str,
        action: &'static str,
    },
    /// An optional errand recorded under `stateResults.errands.<key>`
    Errand { key: &'static str },
    /// One attach-disk task per deployment instance
    AttachDisk,
}

#[derive(Clone, Copy, Debug)]
struct PhaseStep {
    phase: RestorePhase,
    task: PhaseTask,
    next: ResourceState,
}

static PHASES: [PhaseStep; 6] = [
    PhaseStep {
        phase: RestorePhase::BoshStop,
        task: PhaseTask::Single {
            key: "boshStop",
            action: "Stopping bosh deployment",
        },
        next: ResourceState::in_progress(RestorePhase::CreateDisk),
    },
    PhaseStep {
        phase: RestorePhase::AttachDisk,
        task: PhaseTask::AttachDisk,
        next: ResourceState::in_progress(RestorePhase::PutFile),
    },
    PhaseStep {
        phase: RestorePhase::BaseBackupErrand,
        task: PhaseTask::Errand {
            key: "baseBackupErrand",
        },
        next: ResourceState::trigger(RestorePhase::PitrErrand),
    },
    PhaseStep {
        phase: RestorePhase::PitrErrand,
        task: PhaseTask::Errand {
            key: "pointInTimeErrand",
        },
        next: ResourceState::trigger(RestorePhase::BoshStart),
    },
    PhaseStep {
        phase: RestorePhase::BoshStart,
        task: PhaseTask::Single {
            key: "boshStart",
            action: "Starting bosh deployment",
        },
        next: ResourceState::trigger(RestorePhase::PostBoshStart),
    },
    PhaseStep {
        phase: RestorePhase::PostBoshStart,
        task: PhaseTask::Errand {
            key: "postStartErrand",
        },
        next: ResourceState::Finalize,
    },
];

const VALID_STATES: [ResourceState; 6] = [
    ResourceState::in_progress(RestorePhase::BoshStop),
    ResourceState::in_progress(RestorePhase::AttachDisk),
    ResourceState::in_progress(RestorePhase::BaseBackupErrand),
    ResourceState::in_progress(RestorePhase::PitrErrand),
    ResourceState::in_progress(RestorePhase::BoshStart),
    ResourceState::in_progress(RestorePhase::PostBoshStart),
];

/// Step polled in `state`, `None` for states this poller does not own
fn step_for(state: ResourceState) -> Option<&'static PhaseStep> {
    PHASES
        .iter()
        .find(|step| ResourceState::in_progress(step.phase) == state)
}

pub struct BoshRestoreStatusPoller {
    ctx: Context,
    poll_interval: Duration,
}

impl BoshRestoreStatusPoller {
    pub fn new(ctx: Context, poll_interval: Duration) -> Self {
        Self { ctx, poll_interval }
    }

    async fn run_phase(
        &self,
        step: &PhaseStep,
        resource: &Resource,
        options: &Value,
        handle: &PollerHandle,
    ) -> Result<()> {
        let options: RestoreOptions = serde_json::from_value(options.clone())?;
        match step.task {
            PhaseTask::Single { key, action } => {
                self.poll_single_task(step, key, action, resource, &options, handle)
                    .await
            }
            PhaseTask::Errand { key } => {
                self.poll_errand(step, key, resource, &options, handle)
                    .await
            }
            PhaseTask::AttachDisk => self.poll_attach_disk(step, resource, &options, handle).await,
        }
    }

    async fn poll_single_task(
        &self,
        step: &PhaseStep,
        key: &str,
        action: &str,
        resource: &Resource,
        options: &RestoreOptions,
        handle: &PollerHandle,
    ) -> Result<()> {
        let task_id = options.state_results.operation_task_id(key).ok_or_else(|| {
            Error::internal(format!(
                "Task id for {} not found for restore {}",
                key,
                resource.name()
            ))
        })?;
        info!(name = %resource.name(), operation = key, task_id = %task_id, "Polling operation task");

        let task = self.ctx.director.get_task(task_id).await?;
        if task.is_in_progress() {
            return Ok(());
        }
        record_outcome(step.phase, &task);

        let succeeded = task.is_succeeded();
        let results = json!({ "stateResults": { key: task_record(task_id, &task)? } });
        self.patch(resource, Some(results), next_or_failed(step, succeeded))
            .await?;

        if !succeeded {
            return Err(Error::internal(format!(
                "{} with id {} failed.",
                action,
                resource.name()
            )));
        }
        info!(name = %resource.name(), operation = key, "Operation successful, clearing the poller");
        handle.clear();
        Ok(())
    }

    async fn poll_errand(
        &self,
        step: &PhaseStep,
        key: &str,
        resource: &Resource,
        options: &RestoreOptions,
        handle: &PollerHandle,
    ) -> Result<()> {
        let Some(task_id) = options.state_results.errand_task_id(key) else {
            // Errand not defined for this plan
            info!(name = %resource.name(), errand = key, "No errand task, moving to next state");
            self.patch(resource, None, step.next).await?;
            handle.clear();
            return Ok(());
        };
        info!(name = %resource.name(), errand = key, task_id = %task_id, "Polling errand task");

        let task = self.ctx.director.get_task(task_id).await?;
        if task.is_in_progress() {
            return Ok(());
        }
        record_outcome(step.phase, &task);

        let succeeded = task.is_succeeded();
        let results =
            json!({ "stateResults": { "errands": { key: task_record(task_id, &task)? } } });
        self.patch(resource, Some(results), next_or_failed(step, succeeded))
            .await?;

        if !succeeded {
            return Err(Error::internal(format!(
                "Errand {} failed as {}. Check task {}",
                key, task.state, task_id
            )));
        }
        info!(name = %resource.name(), errand = key, "Errand successful, clearing the poller");
        handle.clear();
        Ok(())
    }

    /// Every instance is polled each tick; nothing is patched until all
    /// attach-disk tasks have finished
    async fn poll_attach_disk(
        &self,
        step: &PhaseStep,
        resource: &Resource,
        options: &RestoreOptions,
        handle: &PollerHandle,
    ) -> Result<()> {
        let instances = &options.restore_metadata.deployment_instances_info;
        if instances.is_empty() {
            return Err(Error::internal(format!(
                "Deployment instances info not found for restore {}. Polling could not be continued.",
                resource.name()
            )));
        }
        let polls = instances.iter().map(|instance| async move {
            let task_id = instance.attach_disk_task_id().ok_or_else(|| {
                Error::internal(format!(
                    "Task id for attaching disk not found for instance {}. Polling could not be continued.",
                    instance.id
                ))
            })?;
            self.ctx.director.get_task(task_id).await
        });
        let results: Vec<Result<TaskResult>> = join_all(polls).await;

        let mut updated = instances.clone();
        let mut all_completed = true;
        let mut all_succeeded = true;
        let mut first_error = None;
        for (instance, result) in updated.iter_mut().zip(results) {
            match result {
                Ok(task) if task.is_in_progress() => all_completed = false,
                Ok(task) => {
                    record_outcome(step.phase, &task);
                    all_succeeded &= task.is_succeeded();
                    instance.attach_disk_task_result = Some(task);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        if !all_completed {
            return Ok(());
        }

        let metadata = json!({
            "restoreMetadata": { "deploymentInstancesInfo": serde_json::to_value(&updated)? }
        });
        self.patch(resource, Some(metadata), next_or_failed(step, all_succeeded))
            .await?;

        if !all_succeeded {
            return Err(Error::internal(
                "Attaching disk to some of the instances failed.",
            ));
        }
        handle.clear();
        Ok(())
    }

    async fn patch(
        &self,
        resource: &Resource,
        options: Option<Value>,
        state: ResourceState,
    ) -> Result<()> {
        let mut change = ResourceChange::new(self.kind(), resource.name()).state(state);
        if let Some(options) = options {
            change = change.options(options);
        }
        self.ctx.store.patch_resource(change).await?;
        Ok(())
    }

    /// Record the failure with the restore service and force the resource to FAILED
    async fn fail_restore(&self, resource: &Resource, options: &Value) -> Result<()> {
        let plan = self.ctx.catalog.get_plan(required_str(options, "plan_id")?)?;
        let service = self.ctx.services.restore_service(&plan).await?;
        let final_result = service.create_patch_object(options, "failed").await?;

        let mut change =
            ResourceChange::new(self.kind(), resource.name()).state(ResourceState::Failed);
        if !is_empty(&final_result) {
            change = change.response(final_result.clone());
        }
        self.ctx.store.patch_resource(change).await?;
        service
            .patch_restore_file_with_final_result(options, &final_result)
            .await
    }
}

#[async_trait]
impl StatusPoller for BoshRestoreStatusPoller {
    fn name(&self) -> &'static str {
        "BoshRestoreStatusPoller"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::DEFAULT_BOSH_RESTORE
    }

    fn valid_states(&self) -> &[ResourceState] {
        &VALID_STATES
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn get_status(&self, resource: &Resource, handle: &PollerHandle) -> Result<()> {
        let Some(state) = resource.state() else {
            return Ok(());
        };
        let Some(step) = step_for(state) else {
            return Ok(());
        };
        let options = resource.options_value()?;
        info!(name = %resource.name(), state = %state, "Routing restore phase");

        let Err(err) = self.run_phase(step, resource, &options, handle).await else {
            return Ok(());
        };

        handle.clear();
        error!(
            name = %resource.name(),
            state = %state,
            error = %err,
            "Error occurred in restore phase"
        );
        if let Err(e) = self.fail_restore(resource, &options).await {
            error!(name = %resource.name(), error = %e, "Failed to record restore failure");
        }
        Err(err)
    }
}

fn next_or_failed(step: &PhaseStep, succeeded: bool) -> ResourceState {
    if succeeded {
        step.next
    } else {
        ResourceState::Failed
    }
}

fn task_record(task_id: &str, task: &TaskResult) -> Result<Value> {
    Ok(json!({ "taskId": task_id, "taskResult": serde_json::to_value(task)? }))
}

fn record_outcome(phase: RestorePhase, task: &TaskResult) {
    metrics::TASK_OUTCOMES
        .with_label_values(&[phase.as_str(), &task.state])
        .inc();
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
