//! Archive metered events job
//!
//! One run moves a bounded batch of `METERED` events into the metering archive
//! and deletes them from the resource store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, error, info};

use super::MeteringArchiveStore;
use crate::crd::{Resource, ResourceKind, METERED_STATE};
use crate::error::Result;
use crate::metrics;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::store::ResourceStore;

/// Tunables of one archive run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveJobSettings {
    /// Maximum number of events archived per run
    pub events_to_patch: usize,
    /// Pause after each archived event
    pub sleep_duration: Duration,
    /// Delete attempts per event
    pub delete_attempts: u32,
    /// Delay before the first delete retry
    pub delete_min_delay: Duration,
}

impl Default for ArchiveJobSettings {
    fn default() -> Self {
        Self {
            events_to_patch: 500,
            sleep_duration: Duration::from_millis(1000),
            delete_attempts: 4,
            delete_min_delay: Duration::from_millis(1000),
        }
    }
}

/// Outcome of a successful run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveRunSummary {
    /// Metered events found in the store
    pub found: usize,
    /// Events archived and deleted
    pub archived: usize,
    /// Timestamp keying the archive file, when one was opened
    pub archive_file: Option<String>,
}

pub struct ArchiveMeteredEventsJob {
    store: Arc<dyn ResourceStore>,
    archive: Arc<dyn MeteringArchiveStore>,
    settings: ArchiveJobSettings,
}

impl ArchiveMeteredEventsJob {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        archive: Arc<dyn MeteringArchiveStore>,
        settings: ArchiveJobSettings,
    ) -> Self {
        Self {
            store,
            archive,
            settings,
        }
    }

    /// Run once; any archive or delete failure fails the run
    pub async fn run(&self) -> Result<ArchiveRunSummary> {
        info!(settings = ?self.settings, "Starting ArchiveMeteredEventsJob");
        let result = self.run_once().await;
        match &result {
            Ok(summary) => {
                info!(archived = summary.archived, "ArchiveMeteredEventsJob succeeded");
                metrics::ARCHIVE_RUNS.with_label_values(&["succeeded"]).inc();
            }
            Err(e) => {
                error!(error = %e, "ArchiveMeteredEventsJob failed");
                metrics::ARCHIVE_RUNS.with_label_values(&["failed"]).inc();
            }
        }
        result
    }

    async fn run_once(&self) -> Result<ArchiveRunSummary> {
        let events = self.metered_events().await?;
        info!(count = events.len(), "Metered events obtained from the resource store");
        if events.is_empty() {
            return Ok(ArchiveRunSummary::default());
        }

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let archived = self.patch_to_archive(&events, &timestamp).await?;
        Ok(ArchiveRunSummary {
            found: events.len(),
            archived,
            archive_file: Some(timestamp),
        })
    }

    async fn metered_events(&self) -> Result<Vec<Resource>> {
        let selector = format!("state in ({})", METERED_STATE);
        self.store
            .get_resources(ResourceKind::SFEVENT, Some(&selector))
            .await
    }

    async fn patch_to_archive(&self, events: &[Resource], timestamp: &str) -> Result<usize> {
        self.archive.put_archive_file(timestamp).await?;

        let count = self.settings.events_to_patch.min(events.len());
        for event in &events[..count] {
            self.process_event(event, timestamp).await?;
            tokio::time::sleep(self.settings.sleep_duration).await;
        }
        Ok(count)
    }

    async fn process_event(&self, event: &Resource, timestamp: &str) -> Result<()> {
        info!(name = %event.name(), "Processing event");
        self.archive
            .patch_event_to_archive_file(event, timestamp)
            .await?;

        let retry = RetryConfig::new(self.settings.delete_attempts, self.settings.delete_min_delay);
        retry_with_backoff(&retry, "delete_metered_event", || {
            debug!(name = %event.name(), "Deleting metered event");
            metrics::ARCHIVE_DELETE_ATTEMPTS.inc();
            self.store
                .delete_resource(ResourceKind::SFEVENT, event.name())
        })
        .await?;

        metrics::ARCHIVED_EVENTS.inc();
        Ok(())
    }
}
