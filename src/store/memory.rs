//! In-memory resource store
//!
//! Mirrors the API server semantics the engines rely on: monotonically
//! increasing resource versions, update/patch merge rules, label selectors and
//! a watch that replays existing objects before live changes.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use super::{ChangeMode, LabelSelector, ResourceChange, ResourceStore};
use crate::crd::{Resource, ResourceKind, WatchEvent, WatchEventType};
use crate::error::{Error, Result};

const WATCH_CHANNEL_CAPACITY: usize = 1024;

type Key = (ResourceKind, String);

/// Resource store kept entirely in process memory
pub struct InMemoryStore {
    objects: DashMap<Key, Resource>,
    crds: DashSet<ResourceKind>,
    version: AtomicU64,
    events: broadcast::Sender<(ResourceKind, WatchEvent)>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            objects: DashMap::new(),
            crds: DashSet::new(),
            version: AtomicU64::new(0),
            events,
        }
    }

    /// Create or replace a resource, notifying watchers
    pub fn insert(&self, kind: ResourceKind, mut resource: Resource) -> Resource {
        self.bump_version(&mut resource);
        let key = (kind, resource.name().to_string());
        let event_type = if self.objects.contains_key(&key) {
            WatchEventType::Modified
        } else {
            WatchEventType::Added
        };
        self.objects.insert(key, resource.clone());
        self.publish(kind, event_type, resource.clone());
        resource
    }

    /// Snapshot of one resource
    pub fn get(&self, kind: ResourceKind, resource_id: &str) -> Option<Resource> {
        self.objects
            .get(&(kind, resource_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Number of stored resources of `kind`
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.objects.iter().filter(|e| e.key().0 == kind).count()
    }

    /// Whether the CRD for `kind` has been registered
    pub fn is_registered(&self, kind: ResourceKind) -> bool {
        self.crds.contains(&kind)
    }

    fn bump_version(&self, resource: &mut Resource) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        resource.metadata.resource_version = Some(version.to_string());
    }

    fn publish(&self, kind: ResourceKind, event_type: WatchEventType, object: Resource) {
        // No receivers is fine: nobody is watching yet
        let _ = self.events.send((kind, WatchEvent { event_type, object }));
    }

    fn not_found(kind: ResourceKind, resource_id: &str) -> Error {
        Error::NotFound {
            kind: kind.to_string(),
            name: resource_id.to_string(),
        }
    }

    fn write(&self, change: ResourceChange, mode: ChangeMode) -> Result<Resource> {
        let key = (change.kind, change.resource_id.clone());
        let updated = {
            let mut entry = self
                .objects
                .get_mut(&key)
                .ok_or_else(|| Self::not_found(change.kind, &change.resource_id))?;
            let mut resource = entry.value().clone();
            change.apply_to(&mut resource, mode)?;
            self.bump_version(&mut resource);
            *entry.value_mut() = resource.clone();
            resource
        };
        self.publish(change.kind, WatchEventType::Modified, updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn register_crd(&self, kind: ResourceKind) -> Result<()> {
        self.crds.insert(kind);
        Ok(())
    }

    async fn get_resource(&self, kind: ResourceKind, resource_id: &str) -> Result<Resource> {
        self.get(kind, resource_id)
            .ok_or_else(|| Self::not_found(kind, resource_id))
    }

    async fn get_resources(
        &self,
        kind: ResourceKind,
        label_selector: Option<&str>,
    ) -> Result<Vec<Resource>> {
        let selector = match label_selector {
            Some(s) => LabelSelector::parse(s)?,
            None => LabelSelector::default(),
        };
        let mut resources: Vec<Resource> = self
            .objects
            .iter()
            .filter(|e| e.key().0 == kind && selector.matches(e.value().metadata.labels.as_ref()))
            .map(|e| e.value().clone())
            .collect();
        resources.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(resources)
    }

    async fn update_resource(&self, change: ResourceChange) -> Result<Resource> {
        self.write(change, ChangeMode::Update)
    }

    async fn patch_resource(&self, change: ResourceChange) -> Result<Resource> {
        self.write(change, ChangeMode::Patch)
    }

    async fn delete_resource(&self, kind: ResourceKind, resource_id: &str) -> Result<()> {
        let (_, resource) = self
            .objects
            .remove(&(kind, resource_id.to_string()))
            .ok_or_else(|| Self::not_found(kind, resource_id))?;
        self.publish(kind, WatchEventType::Deleted, resource);
        Ok(())
    }

    fn watch(&self, kind: ResourceKind) -> BoxStream<'static, Result<WatchEvent>> {
        // Subscribe before the snapshot so no change falls in between
        let rx = self.events.subscribe();
        let existing: Vec<Result<WatchEvent>> = self
            .objects
            .iter()
            .filter(|e| e.key().0 == kind)
            .map(|e| {
                Ok(WatchEvent {
                    event_type: WatchEventType::Added,
                    object: e.value().clone(),
                })
            })
            .collect();

        let live = stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok((event_kind, event)) if event_kind == kind => return Some((Ok(event), rx)),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(kind = %kind, skipped, "In-memory watch lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        stream::iter(existing).chain(live).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ResourceState;
    use serde_json::json;

    #[tokio::test]
    async fn test_versions_increase_on_every_write() {
        let store = InMemoryStore::new();
        let kind = ResourceKind::DEFAULT_BACKUP;
        let created = store.insert(kind, Resource::new("b1", &json!({}), ResourceState::InQueue));

        let updated = store
            .update_resource(ResourceChange::new(kind, "b1").state(ResourceState::InProgress))
            .await
            .unwrap();

        let v1: u64 = created.resource_version().unwrap().parse().unwrap();
        let v2: u64 = updated.resource_version().unwrap().parse().unwrap();
        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn test_watch_replays_existing_then_streams_changes() {
        let store = InMemoryStore::new();
        let kind = ResourceKind::VIRTUALHOST_BIND;
        store.insert(kind, Resource::new("a", &json!({}), ResourceState::InQueue));

        let mut watch = store.watch(kind);
        let first = watch.next().await.unwrap().unwrap();
        assert_eq!(first.event_type, WatchEventType::Added);
        assert_eq!(first.object.name(), "a");

        store.insert(
            ResourceKind::DEFAULT_BACKUP,
            Resource::new("other", &json!({}), ResourceState::InQueue),
        );
        store.delete_resource(kind, "a").await.unwrap();

        let next = watch.next().await.unwrap().unwrap();
        assert_eq!(next.event_type, WatchEventType::Deleted);
        assert_eq!(next.object.name(), "a");
    }

    #[tokio::test]
    async fn test_missing_resource_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .patch_resource(ResourceChange::new(ResourceKind::DIRECTOR, "nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
