//! Director task client
//!
//! Long-running deployment operations (stop, start, disk attach, errands) are
//! tracked by the director as tasks. Pollers only need the task state.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};

/// Task state reported while the task is still running
pub const TASK_PROCESSING: &str = "processing";

/// Task state reported on success
pub const TASK_DONE: &str = "done";

/// Result of a director task lookup
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TaskResult {
    /// `processing`, `done`, or any other terminal state (`error`, `cancelled`, ...)
    pub state: String,

    /// Remaining task attributes, persisted verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskResult {
    pub fn new(state: impl Into<String>) -> Self {
        TaskResult {
            state: state.into(),
            extra: Map::new(),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.state == TASK_PROCESSING
    }

    pub fn is_succeeded(&self) -> bool {
        self.state == TASK_DONE
    }
}

/// Director capability used by the pollers
#[async_trait]
pub trait DirectorClient: Send + Sync {
    /// Look up a task by id
    async fn get_task(&self, task_id: &str) -> Result<TaskResult>;
}

/// Director client over the director's HTTP API
pub struct HttpDirectorClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDirectorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DirectorClient for HttpDirectorClient {
    async fn get_task(&self, task_id: &str) -> Result<TaskResult> {
        let url = format!("{}/tasks/{}", self.base_url, task_id);
        debug!(task_id = %task_id, "Fetching director task");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::task(format!(
                "Director returned {} for task {}",
                status, task_id
            )));
        }

        Ok(response.json::<TaskResult>().await?)
    }
}
