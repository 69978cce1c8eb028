//! Resource store backed by the Kubernetes API server

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::DynamicObject,
    runtime::{
        wait::{await_condition, conditions},
        watcher, WatchStreamExt,
    },
    Api, Client,
};
use tracing::{debug, info};

use super::{ChangeMode, ResourceChange, ResourceStore};
use crate::crd::{crd_for, Resource, ResourceKind, WatchEvent, WatchEventType};
use crate::error::{Error, Result};

/// Field manager used for server-side apply
const FIELD_MANAGER: &str = "service-broker-operator";

/// Optimistic writes retried this many times on a version conflict
const MAX_CONFLICT_RETRIES: u32 = 3;

/// How long CRD registration waits for the CRD to become established
const CRD_ESTABLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Store over namespaced custom resources in the API server
#[derive(Clone)]
pub struct KubeResourceStore {
    client: Client,
    namespace: String,
}

impl KubeResourceStore {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self, kind: ResourceKind) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &kind.api_resource())
    }

    /// Read-modify-replace guarded by the resource version
    async fn write(&self, change: ResourceChange, mode: ChangeMode) -> Result<Resource> {
        let api = self.api(change.kind);
        let id = change.resource_id.as_str();

        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let current = api
                .get(id)
                .await
                .map_err(|e| map_kube_error(e, change.kind, id))?;
            let mut resource = Resource::from_dynamic(current)?;
            change.apply_to(&mut resource, mode)?;

            let obj = resource.to_dynamic(&change.kind)?;
            match api.replace(id, &PostParams::default(), &obj).await {
                Ok(updated) => return Resource::from_dynamic(updated),
                Err(kube::Error::Api(ae)) if ae.code == 409 && attempt < MAX_CONFLICT_RETRIES => {
                    debug!(kind = %change.kind, name = %id, attempt, "Version conflict, re-reading");
                }
                Err(e) => return Err(map_kube_error(e, change.kind, id)),
            }
        }

        Err(Error::Conflict {
            kind: change.kind.to_string(),
            name: id.to_string(),
        })
    }
}

fn map_kube_error(err: kube::Error, kind: ResourceKind, name: &str) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        other => Error::Kube(other),
    }
}

fn to_event(event_type: WatchEventType, obj: DynamicObject) -> Result<WatchEvent> {
    Ok(WatchEvent {
        event_type,
        object: Resource::from_dynamic(obj)?,
    })
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn register_crd(&self, kind: ResourceKind) -> Result<()> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let crd = crd_for(&kind)?;
        let name = kind.crd_name();

        crds.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&crd),
        )
        .await?;

        let established = await_condition(crds, &name, conditions::is_crd_established());
        tokio::time::timeout(CRD_ESTABLISH_TIMEOUT, established)
            .await
            .map_err(|_| Error::store(format!("Timed out waiting for CRD {} to be established", name)))?
            .map_err(|e| Error::store(format!("Waiting for CRD {} failed: {}", name, e)))?;

        info!(crd = %name, "Registered CRD");
        Ok(())
    }

    async fn get_resource(&self, kind: ResourceKind, resource_id: &str) -> Result<Resource> {
        let obj = self
            .api(kind)
            .get(resource_id)
            .await
            .map_err(|e| map_kube_error(e, kind, resource_id))?;
        Resource::from_dynamic(obj)
    }

    async fn get_resources(
        &self,
        kind: ResourceKind,
        label_selector: Option<&str>,
    ) -> Result<Vec<Resource>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }

        self.api(kind)
            .list(&params)
            .await?
            .items
            .into_iter()
            .map(Resource::from_dynamic)
            .collect()
    }

    async fn update_resource(&self, change: ResourceChange) -> Result<Resource> {
        self.write(change, ChangeMode::Update).await
    }

    async fn patch_resource(&self, change: ResourceChange) -> Result<Resource> {
        self.write(change, ChangeMode::Patch).await
    }

    async fn delete_resource(&self, kind: ResourceKind, resource_id: &str) -> Result<()> {
        self.api(kind)
            .delete(resource_id, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(e, kind, resource_id))?;
        Ok(())
    }

    fn watch(&self, kind: ResourceKind) -> BoxStream<'static, Result<WatchEvent>> {
        watcher(self.api(kind), watcher::Config::default())
            .default_backoff()
            .filter_map(move |event| async move {
                match event {
                    Ok(watcher::Event::InitApply(obj)) => Some(to_event(WatchEventType::Added, obj)),
                    Ok(watcher::Event::Apply(obj)) => Some(to_event(WatchEventType::Modified, obj)),
                    Ok(watcher::Event::Delete(obj)) => Some(to_event(WatchEventType::Deleted, obj)),
                    Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => None,
                    Err(e) => Some(Err(Error::store(format!("Watch error on {}: {}", kind, e)))),
                }
            })
            .boxed()
    }
}
