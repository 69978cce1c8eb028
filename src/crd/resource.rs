//! Resource model shared by every operator and poller
//!
//! All broker resources have the same shape: a JSON-encoded request payload in
//! `spec.options` and a lifecycle `status`. The kind only decides which group
//! and CRD the object lives in.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{ApiResource, DynamicObject};
use schemars::gen::SchemaGenerator;
use schemars::schema::{Schema, SchemaObject};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ResourceState;
use crate::error::{Error, ErrorJson, Result};

/// API version shared by every broker resource
pub const API_VERSION: &str = "v1alpha1";

/// Label carrying the service instance guid of a resource
pub const INSTANCE_GUID_LABEL: &str = "instance_guid";

/// Logical resource group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceGroup {
    Backup,
    Restore,
    Bind,
    Deployment,
    Instance,
}

impl ResourceGroup {
    /// Kubernetes API group
    pub fn api_group(&self) -> &'static str {
        match self {
            ResourceGroup::Backup => "backup.servicefabrik.io",
            ResourceGroup::Restore => "restore.servicefabrik.io",
            ResourceGroup::Bind => "bind.servicefabrik.io",
            ResourceGroup::Deployment => "deployment.servicefabrik.io",
            ResourceGroup::Instance => "instance.servicefabrik.io",
        }
    }
}

impl fmt::Display for ResourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_group())
    }
}

/// Resource kind within a group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    DefaultBackup,
    DefaultRestore,
    DefaultBoshRestore,
    VirtualHostBind,
    Director,
    SfEvent,
}

impl ResourceType {
    /// Kubernetes kind
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceType::DefaultBackup => "DefaultBackup",
            ResourceType::DefaultRestore => "DefaultRestore",
            ResourceType::DefaultBoshRestore => "DefaultBoshRestore",
            ResourceType::VirtualHostBind => "VirtualHostBind",
            ResourceType::Director => "Director",
            ResourceType::SfEvent => "Sfevent",
        }
    }

    /// Lowercase singular name
    pub fn singular(&self) -> String {
        self.kind().to_lowercase()
    }

    /// Lowercase plural name used in API paths
    pub fn plural(&self) -> String {
        format!("{}s", self.singular())
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// A (group, type) pair identifying one CRD
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKind {
    pub group: ResourceGroup,
    pub resource_type: ResourceType,
}

impl ResourceKind {
    pub const DEFAULT_BACKUP: ResourceKind =
        ResourceKind::new(ResourceGroup::Backup, ResourceType::DefaultBackup);
    pub const DEFAULT_RESTORE: ResourceKind =
        ResourceKind::new(ResourceGroup::Restore, ResourceType::DefaultRestore);
    pub const DEFAULT_BOSH_RESTORE: ResourceKind =
        ResourceKind::new(ResourceGroup::Restore, ResourceType::DefaultBoshRestore);
    pub const VIRTUALHOST_BIND: ResourceKind =
        ResourceKind::new(ResourceGroup::Bind, ResourceType::VirtualHostBind);
    pub const DIRECTOR: ResourceKind =
        ResourceKind::new(ResourceGroup::Deployment, ResourceType::Director);
    pub const SFEVENT: ResourceKind =
        ResourceKind::new(ResourceGroup::Instance, ResourceType::SfEvent);

    pub const fn new(group: ResourceGroup, resource_type: ResourceType) -> Self {
        Self {
            group,
            resource_type,
        }
    }

    /// Fully qualified CRD name (`<plural>.<group>`)
    pub fn crd_name(&self) -> String {
        format!("{}.{}", self.resource_type.plural(), self.group.api_group())
    }

    /// Dynamic API descriptor for the Kubernetes client
    pub fn api_resource(&self) -> ApiResource {
        let group = self.group.api_group();
        ApiResource {
            group: group.to_string(),
            version: API_VERSION.to_string(),
            api_version: format!("{}/{}", group, API_VERSION),
            kind: self.resource_type.kind().to_string(),
            plural: self.resource_type.plural(),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.resource_type)
    }
}

/// Resource spec: the serialized request payload
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ResourceSpec {
    /// JSON-encoded request options (plan id, instance id, operation parameters)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
}

/// Resource lifecycle status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Current lifecycle state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Accumulated result/progress payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "any_value")]
    pub response: Option<Value>,

    /// Structured error when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorJson>,

    /// Last operation summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "any_value")]
    pub last_operation: Option<Value>,
}

fn any_value(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject::default();
    schema
        .extensions
        .insert("x-kubernetes-preserve-unknown-fields".to_string(), Value::Bool(true));
    Schema::Object(schema)
}

/// A broker custom resource as stored in the resource store
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Resource {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ResourceSpec,

    #[serde(default)]
    pub status: ResourceStatus,
}

impl Resource {
    /// Build a new resource with the given id, options and state
    pub fn new(name: impl Into<String>, options: &Value, state: ResourceState) -> Self {
        Resource {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            spec: ResourceSpec {
                options: Some(options.to_string()),
            },
            status: ResourceStatus {
                state: Some(state.to_string()),
                ..Default::default()
            },
        }
    }

    /// Attach a label
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Resource id (`metadata.name`)
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Optimistic concurrency token
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    /// Label value
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    /// Raw `status.state`
    pub fn raw_state(&self) -> Option<&str> {
        self.status.state.as_deref()
    }

    /// Typed `status.state`; `None` when absent or not a known state
    pub fn state(&self) -> Option<ResourceState> {
        self.raw_state().and_then(|s| s.parse().ok())
    }

    /// Whether the current state is one of `states`
    pub fn state_in(&self, states: &[ResourceState]) -> bool {
        self.state().map(|s| states.contains(&s)).unwrap_or(false)
    }

    /// Parsed `spec.options` as untyped JSON
    pub fn options_value(&self) -> Result<Value> {
        let raw = self.spec.options.as_deref().ok_or_else(|| {
            Error::validation(format!("Resource {} has no options", self.name()))
        })?;
        Ok(serde_json::from_str(raw)?)
    }

    /// Parsed `spec.options` as a typed payload
    pub fn options<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.options_value()?)?)
    }

    /// Convert from the dynamic Kubernetes representation
    pub fn from_dynamic(obj: DynamicObject) -> Result<Self> {
        let value = serde_json::to_value(obj)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Convert into the dynamic Kubernetes representation for `kind`
    pub fn to_dynamic(&self, kind: &ResourceKind) -> Result<DynamicObject> {
        let mut obj = DynamicObject::new(self.name(), &kind.api_resource());
        obj.metadata = self.metadata.clone();
        obj.data = serde_json::json!({
            "spec": serde_json::to_value(&self.spec)?,
            "status": serde_json::to_value(&self.status)?,
        });
        Ok(obj)
    }
}

/// Kind of a watch notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for WatchEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchEventType::Added => write!(f, "ADDED"),
            WatchEventType::Modified => write!(f, "MODIFIED"),
            WatchEventType::Deleted => write!(f, "DELETED"),
        }
    }
}

/// A single change delivered by a watch subscription
#[derive(Clone, Debug)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub object: Resource,
}
