//! Resource store client
//!
//! The store owns every persisted resource; operators and pollers never keep
//! an authoritative copy. Two implementations are provided: one backed by the
//! Kubernetes API server and one in memory.

mod kubernetes;
mod memory;
mod selector;

pub use self::kubernetes::KubeResourceStore;
pub use self::memory::InMemoryStore;
pub use self::selector::LabelSelector;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::crd::{Resource, ResourceKind, ResourceState, WatchEvent};
use crate::error::{ErrorJson, Result};

/// Typed CRUD and watch over broker resources
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Register (create or update) the CRD for `kind`
    async fn register_crd(&self, kind: ResourceKind) -> Result<()>;

    /// Fetch one resource
    async fn get_resource(&self, kind: ResourceKind, resource_id: &str) -> Result<Resource>;

    /// List resources, optionally filtered by label selector
    async fn get_resources(
        &self,
        kind: ResourceKind,
        label_selector: Option<&str>,
    ) -> Result<Vec<Resource>>;

    /// Parsed `spec.options` of one resource
    async fn get_options(&self, kind: ResourceKind, resource_id: &str) -> Result<Value> {
        self.get_resource(kind, resource_id).await?.options_value()
    }

    /// Replace the fields named by `change`
    async fn update_resource(&self, change: ResourceChange) -> Result<Resource>;

    /// Merge `change` into the stored resource
    async fn patch_resource(&self, change: ResourceChange) -> Result<Resource>;

    /// Delete one resource
    async fn delete_resource(&self, kind: ResourceKind, resource_id: &str) -> Result<()>;

    /// Subscribe to changes of `kind`; existing objects are delivered first as `Added`
    fn watch(&self, kind: ResourceKind) -> BoxStream<'static, Result<WatchEvent>>;
}

/// How a [`ResourceChange`] is applied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeMode {
    /// Provided fields replace stored ones
    Update,
    /// Provided objects are deep-merged into stored ones
    Patch,
}

/// A set of field changes to one resource
#[derive(Clone, Debug)]
pub struct ResourceChange {
    pub kind: ResourceKind,
    pub resource_id: String,
    pub options: Option<Value>,
    pub state: Option<ResourceState>,
    pub response: Option<Value>,
    pub error: Option<ErrorJson>,
    pub last_operation: Option<Value>,
}

impl ResourceChange {
    pub fn new(kind: ResourceKind, resource_id: impl Into<String>) -> Self {
        Self {
            kind,
            resource_id: resource_id.into(),
            options: None,
            state: None,
            response: None,
            error: None,
            last_operation: None,
        }
    }

    pub fn options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    pub fn state(mut self, state: ResourceState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }

    pub fn error(mut self, error: ErrorJson) -> Self {
        self.error = Some(error);
        self
    }

    pub fn last_operation(mut self, last_operation: Value) -> Self {
        self.last_operation = Some(last_operation);
        self
    }

    /// Apply this change to `resource` in place
    pub fn apply_to(&self, resource: &mut Resource, mode: ChangeMode) -> Result<()> {
        if let Some(options) = &self.options {
            let merged = match (mode, resource.spec.options.as_deref()) {
                (ChangeMode::Patch, Some(raw)) => {
                    let mut current: Value = serde_json::from_str(raw)?;
                    merge_json(&mut current, options);
                    current
                }
                _ => options.clone(),
            };
            resource.spec.options = Some(merged.to_string());
        }

        if let Some(state) = &self.state {
            resource.status.state = Some(state.to_string());
        }
        if let Some(error) = &self.error {
            resource.status.error = Some(error.clone());
        }
        apply_value(&mut resource.status.response, &self.response, mode);
        apply_value(&mut resource.status.last_operation, &self.last_operation, mode);
        Ok(())
    }
}

fn apply_value(target: &mut Option<Value>, change: &Option<Value>, mode: ChangeMode) {
    let Some(change) = change else {
        return;
    };
    match (mode, target.as_mut()) {
        (ChangeMode::Patch, Some(current)) => merge_json(current, change),
        _ => *target = Some(change.clone()),
    }
}

/// Deep-merge `patch` into `target`: objects merge key by key, anything else replaces
pub fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_json_is_deep() {
        let mut target = json!({"stateResults": {"boshStop": {"taskId": "t1"}}, "plan_id": "P"});
        merge_json(
            &mut target,
            &json!({"stateResults": {"errands": {"pitr": {"taskId": "t2"}}}}),
        );

        assert_eq!(target["stateResults"]["boshStop"]["taskId"], "t1");
        assert_eq!(target["stateResults"]["errands"]["pitr"]["taskId"], "t2");
        assert_eq!(target["plan_id"], "P");
    }

    #[test]
    fn test_patch_merges_options_update_replaces() {
        let mut resource = Resource::new("r1", &json!({"a": 1, "b": {"c": 2}}), ResourceState::InQueue);
        let change = ResourceChange::new(ResourceKind::DEFAULT_BACKUP, "r1")
            .options(json!({"b": {"d": 3}}))
            .state(ResourceState::InProgress);

        let mut patched = resource.clone();
        change.apply_to(&mut patched, ChangeMode::Patch).unwrap();
        let options = patched.options_value().unwrap();
        assert_eq!(options, json!({"a": 1, "b": {"c": 2, "d": 3}}));
        assert_eq!(patched.state(), Some(ResourceState::InProgress));

        change.apply_to(&mut resource, ChangeMode::Update).unwrap();
        assert_eq!(resource.options_value().unwrap(), json!({"b": {"d": 3}}));
    }

    #[test]
    fn test_update_replaces_response_wholesale() {
        let mut resource = Resource::new("r1", &json!({}), ResourceState::Waiting);
        resource.status.response = Some(json!({"type": "create", "old": true}));

        ResourceChange::new(ResourceKind::DIRECTOR, "r1")
            .response(json!({"type": "create"}))
            .apply_to(&mut resource, ChangeMode::Update)
            .unwrap();

        assert_eq!(resource.status.response, Some(json!({"type": "create"})));
    }
}
