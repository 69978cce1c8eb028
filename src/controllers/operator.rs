//! Base operator engine
//!
//! Registers the CRDs of an [`Operator`], watches its resource kind and hands
//! every resource that enters one of the operator's trigger states to
//! `process_request`. Events for the same resource are serialized and each
//! resource version is processed at most once.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{Resource, ResourceKind, ResourceState, WatchEvent, WatchEventType};
use crate::error::{Error, ErrorJson, Result};
use crate::metrics;
use crate::store::{ResourceChange, ResourceStore};

/// Kind-specific request handler
#[async_trait]
pub trait Operator: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Kind whose changes are watched
    fn kind(&self) -> ResourceKind;

    /// CRDs registered before watching
    fn crds(&self) -> Vec<ResourceKind> {
        vec![self.kind()]
    }

    /// States that trigger `process_request`
    fn valid_states(&self) -> &[ResourceState];

    /// Route the resource on its current state and invoke the external action
    async fn process_request(&self, resource: &Resource) -> Result<()>;

    /// Whether a handler error is persisted as a FAILED resource. Errors that
    /// are not downgraded are surfaced to the engine instead.
    fn downgrade_to_failure(&self, _err: &Error) -> bool {
        true
    }

    /// Change written when a handler error is downgraded
    fn failure_change(&self, resource: &Resource, err: &Error) -> ResourceChange {
        ResourceChange::new(self.kind(), resource.name())
            .state(ResourceState::Failed)
            .error(ErrorJson::from(err))
    }
}

/// Last resource version handled for one resource id
type VersionLock = Arc<Mutex<Option<String>>>;

/// Drives one [`Operator`] from the resource store's watch stream
pub struct OperatorRunner {
    store: Arc<dyn ResourceStore>,
    operator: Arc<dyn Operator>,
    locks: DashMap<String, VersionLock>,
}

impl OperatorRunner {
    pub fn new(store: Arc<dyn ResourceStore>, operator: Arc<dyn Operator>) -> Arc<Self> {
        Arc::new(Self {
            store,
            operator,
            locks: DashMap::new(),
        })
    }

    /// Register every CRD the operator needs
    pub async fn init(&self) -> Result<()> {
        for kind in self.operator.crds() {
            self.store.register_crd(kind).await?;
            debug!(operator = self.operator.name(), kind = %kind, "Registered CRD");
        }
        Ok(())
    }

    /// Register CRDs, then dispatch watch events until the stream ends
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.init().await?;

        let kind = self.operator.kind();
        info!(operator = self.operator.name(), kind = %kind, "Starting operator");

        let mut events = self.store.watch(kind);
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => self.on_event(event),
                Err(e) => {
                    warn!(operator = self.operator.name(), error = %e, "Watch error");
                    metrics::WATCH_ERRORS
                        .with_label_values(&[kind.resource_type.kind()])
                        .inc();
                }
            }
        }

        warn!(operator = self.operator.name(), "Watch stream ended");
        Ok(())
    }

    fn on_event(self: &Arc<Self>, event: WatchEvent) {
        let name = event.object.name().to_string();
        if event.event_type == WatchEventType::Deleted
            || !event.object.state_in(self.operator.valid_states())
        {
            self.forget(&name);
            return;
        }

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = runner.dispatch(event.object).await {
                error!(
                    operator = runner.operator.name(),
                    name = %name,
                    error = %e,
                    "Request handling failed"
                );
            }
        });
    }

    /// Process one resource if its current stored version has not been handled.
    ///
    /// Returns whether `process_request` ran. The resource is re-read under the
    /// per-resource lock so only the latest version is acted upon.
    #[instrument(skip(self, resource), fields(operator = self.operator.name(), name = %resource.name()))]
    pub async fn dispatch(&self, resource: Resource) -> Result<bool> {
        let id = resource.name().to_string();
        let kind = self.operator.kind();
        let lock = self.locks.entry(id.clone()).or_default().value().clone();
        let mut handled_version = lock.lock().await;

        let current = match self.store.get_resource(kind, &id).await {
            Ok(current) => current,
            Err(Error::NotFound { .. }) => {
                debug!("Resource is gone, skipping");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let Some(state) = current.state().filter(|s| self.operator.valid_states().contains(s))
        else {
            debug!(state = ?current.raw_state(), "Resource left the trigger states, skipping");
            return Ok(false);
        };

        let version = current.resource_version().map(str::to_string);
        if version.is_some() && *handled_version == version {
            debug!(version = ?version, "Resource version already handled");
            return Ok(false);
        }
        *handled_version = version;

        let kind_label = kind.resource_type.kind();
        metrics::OPERATOR_REQUESTS
            .with_label_values(&[kind_label, &state.to_string()])
            .inc();
        let _timer = metrics::OPERATOR_DURATION
            .with_label_values(&[kind_label])
            .start_timer();

        info!(state = %state, "Processing request");
        match self.operator.process_request(&current).await {
            Ok(()) => Ok(true),
            Err(err) => {
                metrics::OPERATOR_FAILURES.with_label_values(&[kind_label]).inc();
                error!(
                    state = %state,
                    error = %err,
                    "Error occurred in processing request by {}",
                    self.operator.name()
                );
                if !self.operator.downgrade_to_failure(&err) {
                    return Err(err);
                }
                self.store
                    .update_resource(self.operator.failure_change(&current, &err))
                    .await?;
                Ok(true)
            }
        }
    }

    /// Drop the lock entry of a resource nobody is handling
    fn forget(&self, id: &str) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
