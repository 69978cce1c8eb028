//! Base status poller engine
//!
//! A resource entering one of the poller's states gets exactly one
//! fixed-interval timer. Each tick re-reads the resource and calls
//! `get_status`; the poller clears its [`PollerHandle`] once the resource has
//! left the polled state space. A failing `get_status` always clears the handle
//! and marks the resource FAILED.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::crd::{Resource, ResourceKind, ResourceState, WatchEvent, WatchEventType};
use crate::error::{Error, ErrorJson, Result};
use crate::metrics;
use crate::store::{ResourceChange, ResourceStore};

/// Kind-specific status check
#[async_trait]
pub trait StatusPoller: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn kind(&self) -> ResourceKind;

    /// States in which a resource is polled
    fn valid_states(&self) -> &[ResourceState];

    fn poll_interval(&self) -> Duration;

    /// Check external progress; must clear `handle` once polling is finished
    async fn get_status(&self, resource: &Resource, handle: &PollerHandle) -> Result<()>;
}

struct PollerEntry {
    id: u64,
    token: CancellationToken,
}

/// Resource id to timer registry owned by one poller
#[derive(Clone)]
pub struct PollerRegistry {
    name: &'static str,
    entries: Arc<DashMap<String, PollerEntry>>,
    next_id: Arc<AtomicU64>,
}

impl PollerRegistry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Claim the timer slot for `resource_id`; `None` when it is already polled
    pub fn try_register(&self, resource_id: &str) -> Option<PollerHandle> {
        match self.entries.entry(resource_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let token = CancellationToken::new();
                slot.insert(PollerEntry {
                    id,
                    token: token.clone(),
                });
                metrics::ACTIVE_POLLERS.with_label_values(&[self.name]).inc();
                Some(PollerHandle {
                    registry: self.clone(),
                    resource_id: resource_id.to_string(),
                    id,
                    token,
                })
            }
        }
    }

    pub fn is_polling(&self, resource_id: &str) -> bool {
        self.entries.contains_key(resource_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stop whichever timer polls `resource_id`
    pub fn clear(&self, resource_id: &str) -> bool {
        match self.entries.remove(resource_id) {
            Some((_, entry)) => {
                entry.token.cancel();
                metrics::ACTIVE_POLLERS.with_label_values(&[self.name]).dec();
                true
            }
            None => false,
        }
    }

    fn clear_entry(&self, resource_id: &str, id: u64) -> bool {
        let removed = self
            .entries
            .remove_if(resource_id, |_, entry| entry.id == id)
            .is_some();
        if removed {
            metrics::ACTIVE_POLLERS.with_label_values(&[self.name]).dec();
        }
        removed
    }
}

/// One resource's timer
pub struct PollerHandle {
    registry: PollerRegistry,
    resource_id: String,
    id: u64,
    token: CancellationToken,
}

impl PollerHandle {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Stop this timer and release its registry slot. Idempotent.
    pub fn clear(&self) {
        self.token.cancel();
        if self.registry.clear_entry(&self.resource_id, self.id) {
            debug!(poller = self.registry.name, name = %self.resource_id, "Cleared poller");
        }
    }

    pub fn is_cleared(&self) -> bool {
        self.token.is_cancelled()
    }

    async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Drives one [`StatusPoller`] from the resource store's watch stream
pub struct PollerRunner {
    store: Arc<dyn ResourceStore>,
    poller: Arc<dyn StatusPoller>,
    registry: PollerRegistry,
}

impl PollerRunner {
    pub fn new(store: Arc<dyn ResourceStore>, poller: Arc<dyn StatusPoller>) -> Arc<Self> {
        let registry = PollerRegistry::new(poller.name());
        Arc::new(Self {
            store,
            poller,
            registry,
        })
    }

    pub fn registry(&self) -> &PollerRegistry {
        &self.registry
    }

    /// Register the polled kind's CRD, then start timers for watch events
    /// until the stream ends
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let kind = self.poller.kind();
        self.store.register_crd(kind).await?;
        info!(poller = self.poller.name(), kind = %kind, "Starting status poller");

        let mut events = self.store.watch(kind);
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => self.on_event(event),
                Err(e) => {
                    warn!(poller = self.poller.name(), error = %e, "Watch error");
                    metrics::WATCH_ERRORS
                        .with_label_values(&[kind.resource_type.kind()])
                        .inc();
                }
            }
        }

        warn!(poller = self.poller.name(), "Watch stream ended");
        Ok(())
    }

    fn on_event(self: &Arc<Self>, event: WatchEvent) {
        let name = event.object.name();
        match event.event_type {
            WatchEventType::Deleted => {
                self.registry.clear(name);
            }
            WatchEventType::Added | WatchEventType::Modified => {
                if event.object.state_in(self.poller.valid_states()) {
                    self.track(name);
                }
            }
        }
    }

    /// Start a timer for `resource_id` unless one is already running
    pub fn track(self: &Arc<Self>, resource_id: &str) -> bool {
        let Some(handle) = self.registry.try_register(resource_id) else {
            return false;
        };
        debug!(poller = self.poller.name(), name = %resource_id, "Started poller");

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.poll_loop(&handle).await;
            runner.resume(handle.resource_id()).await;
        });
        true
    }

    async fn poll_loop(&self, handle: &PollerHandle) {
        let period = self.poller.poll_interval();
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = handle.cancelled() => break,
                _ = interval.tick() => {}
            }
            if !self.poll_once(handle).await {
                break;
            }
        }
    }

    /// A phase handoff can move the resource into another polled state while
    /// the old timer still held the slot; pick it up again
    async fn resume(self: &Arc<Self>, resource_id: &str) {
        match self.store.get_resource(self.poller.kind(), resource_id).await {
            Ok(resource) if resource.state_in(self.poller.valid_states()) => {
                self.track(resource_id);
            }
            _ => {}
        }
    }

    /// Run one tick for `handle`; returns whether polling continues
    pub async fn poll_once(&self, handle: &PollerHandle) -> bool {
        if handle.is_cleared() {
            return false;
        }
        metrics::POLL_TICKS
            .with_label_values(&[self.poller.name()])
            .inc();

        let id = handle.resource_id();
        let resource = match self.store.get_resource(self.poller.kind(), id).await {
            Ok(resource) => resource,
            Err(Error::NotFound { .. }) => {
                debug!(poller = self.poller.name(), name = %id, "Resource is gone");
                handle.clear();
                return false;
            }
            Err(e) => {
                warn!(poller = self.poller.name(), name = %id, error = %e, "Failed to read resource, skipping tick");
                return true;
            }
        };

        if !resource.state_in(self.poller.valid_states()) {
            debug!(
                poller = self.poller.name(),
                name = %id,
                state = ?resource.raw_state(),
                "Resource left the polled states"
            );
            handle.clear();
            return false;
        }

        match self.poller.get_status(&resource, handle).await {
            Ok(()) => !handle.is_cleared(),
            Err(err) => {
                self.fail(&resource, handle, &err).await;
                false
            }
        }
    }

    async fn fail(&self, resource: &Resource, handle: &PollerHandle, err: &Error) {
        handle.clear();
        metrics::POLL_FAILURES
            .with_label_values(&[self.poller.name()])
            .inc();
        error!(
            poller = self.poller.name(),
            name = %resource.name(),
            state = ?resource.raw_state(),
            error = %err,
            "Status poll failed"
        );

        let change = ResourceChange::new(self.poller.kind(), resource.name())
            .state(ResourceState::Failed)
            .error(ErrorJson::from(err));
        if let Err(e) = self.store.patch_resource(change).await {
            warn!(
                poller = self.poller.name(),
                name = %resource.name(),
                error = %e,
                "Failed to mark resource as failed"
            );
        }
    }
}
