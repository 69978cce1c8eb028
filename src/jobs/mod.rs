//! Periodic batch jobs

mod archive;
mod archive_store;

pub use archive::{ArchiveJobSettings, ArchiveMeteredEventsJob, ArchiveRunSummary};
pub use archive_store::{FileArchiveStore, MeteringArchiveStore};
