//! Typed view of a bosh restore's `spec.options`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::director::TaskResult;

/// Options document of a bosh restore resource
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RestoreOptions {
    #[serde(default)]
    pub restore_guid: String,

    #[serde(default)]
    pub plan_id: String,

    /// Per-phase task ids and results
    #[serde(rename = "stateResults", default)]
    pub state_results: StateResults,

    #[serde(rename = "restoreMetadata", default)]
    pub restore_metadata: RestoreMetadata,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Task records accumulated across phases
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StateResults {
    /// Errand tasks keyed by errand name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errands: BTreeMap<String, TaskRecord>,

    /// Single-task operations keyed by operation name (`boshStop`, `boshStart`, ...)
    #[serde(flatten)]
    pub operations: BTreeMap<String, TaskRecord>,
}

impl StateResults {
    /// Task id of a single-task operation
    pub fn operation_task_id(&self, operation: &str) -> Option<&str> {
        self.operations
            .get(operation)
            .and_then(TaskRecord::task_id)
    }

    /// Task id of an errand
    pub fn errand_task_id(&self, errand: &str) -> Option<&str> {
        self.errands.get(errand).and_then(TaskRecord::task_id)
    }
}

/// Task id and, once finished, its result
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TaskRecord {
    #[serde(rename = "taskId", default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    #[serde(rename = "taskResult", default, skip_serializing_if = "Option::is_none")]
    pub task_result: Option<TaskResult>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskRecord {
    /// Non-empty task id
    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Restore metadata gathered while preparing the restore
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RestoreMetadata {
    #[serde(rename = "deploymentInstancesInfo", default)]
    pub deployment_instances_info: Vec<DeploymentInstance>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One deployment instance receiving a restored disk
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DeploymentInstance {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "attachDiskTaskId", default, skip_serializing_if = "Option::is_none")]
    pub attach_disk_task_id: Option<String>,

    #[serde(
        rename = "attachDiskTaskResult",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attach_disk_task_result: Option<TaskResult>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeploymentInstance {
    /// Non-empty attach-disk task id
    pub fn attach_disk_task_id(&self) -> Option<&str> {
        self.attach_disk_task_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}
