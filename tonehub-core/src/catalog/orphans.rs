use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tonehub_model::{EntryId, SourceId};
use tracing::warn;

use crate::error::{IndexError, Result};
use crate::events::{IndexEvent, IndexObserver};
use crate::repository::CatalogRepository;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepStats {
    pub disabled: u64,
    pub deleted: u64,
    pub tags_collected: u64,
}

/// Soft-disables entries a completed pass did not observe and deletes the
/// ones that stayed unobserved for longer than the grace period.
pub struct OrphanSweeper {
    repository: Arc<dyn CatalogRepository>,
    observer: Arc<dyn IndexObserver>,
    grace: chrono::Duration,
}

impl fmt::Debug for OrphanSweeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrphanSweeper")
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl OrphanSweeper {
    pub fn new(
        repository: Arc<dyn CatalogRepository>,
        observer: Arc<dyn IndexObserver>,
        grace: chrono::Duration,
    ) -> Self {
        Self {
            repository,
            observer,
            grace,
        }
    }

    /// Run both sweeps for `source`, then collect unreferenced tags.
    ///
    /// Must only be called after a pass that started at `pass_start` has
    /// walked the whole source. Cancellation is checked between entries;
    /// whatever was committed before it stands, and tag collection is
    /// skipped. Entries in `spared` were found on disk by the pass but their
    /// liveness could not be recorded; they are neither disabled nor deleted.
    pub async fn sweep(
        &self,
        source: SourceId,
        pass_start: DateTime<Utc>,
        spared: &HashSet<EntryId>,
        cancel: &CancellationToken,
    ) -> Result<SweepStats> {
        let mut stats = SweepStats::default();

        let unobserved = self
            .repository
            .entries_checked_before(source, pass_start, true)
            .await?;
        for entry in unobserved {
            check(cancel, source)?;
            if spared.contains(&entry.id) {
                continue;
            }
            match self.repository.disable_entry(entry.id).await {
                Ok(()) => {
                    stats.disabled += 1;
                    self.observer.on_event(&IndexEvent::EntryDisabled {
                        source_id: source,
                        entry_id: entry.id,
                        location: entry.location,
                    });
                }
                Err(err) => {
                    warn!(source_id = %source, entry_id = %entry.id, error = %err, "failed to disable entry")
                }
            }
        }

        let cutoff = pass_start - self.grace;
        let expired = self
            .repository
            .entries_checked_before(source, cutoff, false)
            .await?;
        for entry in expired {
            check(cancel, source)?;
            if spared.contains(&entry.id) {
                continue;
            }
            match self.repository.delete_entry(entry.id).await {
                Ok(()) => {
                    stats.deleted += 1;
                    self.observer.on_event(&IndexEvent::EntryDeleted {
                        source_id: source,
                        entry_id: entry.id,
                        location: entry.location,
                    });
                }
                Err(err) => {
                    warn!(source_id = %source, entry_id = %entry.id, error = %err, "failed to delete entry")
                }
            }
        }

        // Collection has to follow the deletes, or tags of entries deleted in
        // this sweep would survive until the next one.
        check(cancel, source)?;
        match self.repository.delete_orphan_tags().await {
            Ok(count) => {
                stats.tags_collected = count;
                if count > 0 {
                    self.observer.on_event(&IndexEvent::TagsCollected { count });
                }
            }
            Err(err) => warn!(error = %err, "failed to collect orphan tags"),
        }

        Ok(stats)
    }
}

fn check(cancel: &CancellationToken, source: SourceId) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(IndexError::Cancelled(format!("orphan sweep of source {source}")));
    }
    Ok(())
}
