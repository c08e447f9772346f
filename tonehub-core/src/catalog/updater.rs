use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tonehub_model::{CatalogEntry, EntryId, FormatCategory, MimeType, Source};
use tracing::{debug, warn};

use super::normalize::normalize_location;
use super::reconcile::{reconcile_tags, reconcile_values};
use crate::discovery::{DiscoveredFile, FileSystem};
use crate::error::{IndexError, Result};
use crate::events::{IndexEvent, IndexObserver, IndexOutcome};
use crate::hash::ContentHash;
use crate::metadata::{
    ExtractedTag, ExtractedValue, ExtractionSession, ExtractorRegistry,
    FormatExtractor, MAX_TAG_VALUE_BYTES, detect_mime, truncate_tag_value,
};
use crate::repository::{CatalogRepository, EntryChanges, EntryRecord};

/// Per-pass tally of file outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStats {
    pub created: u64,
    pub updated: u64,
    pub moved: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub failed: u64,
    pub filtered: u64,
}

impl UpdateStats {
    pub fn processed(&self) -> u64 {
        self.created
            + self.updated
            + self.moved
            + self.unchanged
            + self.skipped
            + self.failed
            + self.filtered
    }

    fn record(&mut self, outcome: IndexOutcome) {
        match outcome {
            IndexOutcome::Created => self.created += 1,
            IndexOutcome::Updated => self.updated += 1,
            IndexOutcome::Moved => self.moved += 1,
            IndexOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Everything a full extraction yields for one file.
struct Extracted {
    format: FormatCategory,
    mime: MimeType,
    hash: ContentHash,
    tags: Vec<ExtractedTag>,
    values: Vec<ExtractedValue>,
}

enum Resolution {
    Indexed(CatalogEntry, IndexOutcome),
    Filtered(FormatCategory),
}

/// Resolves discovered files against the catalog, one batch at a time.
///
/// A file is either created, updated, moved or merely re-validated. Failures
/// stay local to the file that caused them.
pub struct CatalogUpdater {
    repository: Arc<dyn CatalogRepository>,
    extractors: ExtractorRegistry,
    fs: Arc<dyn FileSystem>,
    observer: Arc<dyn IndexObserver>,
    max_tag_bytes: usize,
}

impl fmt::Debug for CatalogUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogUpdater")
            .field("extractors", &self.extractors)
            .field("max_tag_bytes", &self.max_tag_bytes)
            .finish_non_exhaustive()
    }
}

impl CatalogUpdater {
    pub fn new(
        repository: Arc<dyn CatalogRepository>,
        extractors: ExtractorRegistry,
        fs: Arc<dyn FileSystem>,
        observer: Arc<dyn IndexObserver>,
    ) -> Self {
        Self {
            repository,
            extractors,
            fs,
            observer,
            max_tag_bytes: MAX_TAG_VALUE_BYTES,
        }
    }

    pub fn with_max_tag_bytes(mut self, max_tag_bytes: usize) -> Self {
        self.max_tag_bytes = max_tag_bytes;
        self
    }

    pub fn extractors(&self) -> &ExtractorRegistry {
        &self.extractors
    }

    /// Resolve one batch of files for `source`.
    ///
    /// Only a failure to read existing entries, or cancellation, ends the
    /// batch early. Everything else is counted in `stats` and reported
    /// through the observer. Entries whose files were found but could not be
    /// marked as seen are added to `unrefreshed`.
    pub async fn update_batch(
        &self,
        source: &Source,
        batch: Vec<DiscoveredFile>,
        cancel: &CancellationToken,
        stats: &mut UpdateStats,
        unrefreshed: &mut HashSet<EntryId>,
    ) -> Result<()> {
        let mut keyed = Vec::with_capacity(batch.len());
        for file in batch {
            match normalize_location(&source.location, &file.path) {
                Some(location) => keyed.push((location, file)),
                None => {
                    warn!(
                        source_id = %source.id,
                        path = %file.path.display(),
                        "file is outside the source root"
                    );
                    self.skip(source, &file.path, "outside the source root", stats, false);
                }
            }
        }
        if keyed.is_empty() {
            return Ok(());
        }

        let locations: Vec<String> =
            keyed.iter().map(|(location, _)| location.clone()).collect();
        let mut existing: HashMap<String, EntryRecord> = self
            .repository
            .entries_by_paths(source.id, &locations)
            .await?
            .into_iter()
            .map(|record| (record.entry.location.clone(), record))
            .collect();
        let batch_locations: HashSet<String> = locations.into_iter().collect();

        for (location, file) in keyed {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled(format!(
                    "update of source {} interrupted",
                    source.id
                )));
            }

            let record = existing.remove(&location);
            let resolved = match record {
                Some(record) => {
                    self.resolve_existing(source, location, &file, record, unrefreshed)
                        .await
                }
                None => {
                    self.resolve_new(source, location, &file, &batch_locations)
                        .await
                }
            };

            match resolved {
                Ok(Resolution::Indexed(entry, outcome)) => {
                    stats.record(outcome);
                    self.observer.on_event(&IndexEvent::FileIndexed {
                        source_id: source.id,
                        entry_id: entry.id,
                        location: entry.location,
                        outcome,
                    });
                }
                Ok(Resolution::Filtered(format)) => {
                    stats.filtered += 1;
                    self.observer.on_event(&IndexEvent::FileFiltered {
                        source_id: source.id,
                        path: file.path.clone(),
                        format,
                    });
                }
                Err(err) => {
                    let persistence = is_persistence_failure(&err);
                    self.skip(source, &file.path, &err.to_string(), stats, persistence);
                }
            }
        }
        Ok(())
    }

    fn skip(
        &self,
        source: &Source,
        path: &Path,
        reason: &str,
        stats: &mut UpdateStats,
        failed: bool,
    ) {
        if failed {
            stats.failed += 1;
        } else {
            stats.skipped += 1;
        }
        self.observer.on_event(&IndexEvent::FileSkipped {
            source_id: source.id,
            path: path.to_path_buf(),
            reason: reason.to_string(),
        });
    }

    async fn resolve_existing(
        &self,
        source: &Source,
        location: String,
        file: &DiscoveredFile,
        record: EntryRecord,
        unrefreshed: &mut HashSet<EntryId>,
    ) -> Result<Resolution> {
        let now = Utc::now();
        let modified = file_time(file.modified);
        let mut entry = record.entry.clone();

        if !entry.mark_if_modified(modified) {
            // The filter may have changed since the entry was indexed.
            if admit(entry.format, source.format_filter).is_none() {
                return Ok(Resolution::Filtered(entry.format));
            }
            self.refresh(entry.id, now, unrefreshed).await?;
            return Ok(Resolution::Indexed(entry, IndexOutcome::Unchanged));
        }

        debug!(
            source_id = %source.id,
            %location,
            "modification time advanced, re-extracting"
        );
        let extracted = match self.extract(&file.path).await {
            Ok(extracted) => extracted,
            Err(err) => {
                // The file exists, so the sweep must not disable it.
                if let Err(seen_err) = self.refresh(entry.id, now, unrefreshed).await {
                    debug!(entry_id = %entry.id, error = %seen_err, "could not refresh entry after failed extraction");
                }
                return Err(err);
            }
        };

        let Some(format) = admit(extracted.format, source.format_filter) else {
            return Ok(Resolution::Filtered(extracted.format));
        };

        entry.observe(location, file.size, modified, now);
        entry.hash = extracted.hash.to_hex();
        entry.format = format;
        entry.mime = extracted.mime;

        let tags = self.bounded_tags(extracted.tags);
        let tag_diff = reconcile_tags(&record.tags, &tags);
        let value_diff = reconcile_values(&record.values, &extracted.values);
        let changes = EntryChanges {
            entry,
            add_tags: tag_diff.add,
            remove_tags: tag_diff.remove,
            add_values: value_diff.add,
            remove_values: value_diff.remove,
        };
        let entry_id = changes.entry.id;
        match self.repository.apply_entry_changes(changes).await {
            Ok(stored) => Ok(Resolution::Indexed(stored.entry, IndexOutcome::Updated)),
            Err(err) => {
                if let Err(seen_err) = self.refresh(entry_id, now, unrefreshed).await {
                    debug!(%entry_id, error = %seen_err, "could not refresh entry after failed update");
                }
                Err(err)
            }
        }
    }

    async fn resolve_new(
        &self,
        source: &Source,
        location: String,
        file: &DiscoveredFile,
        batch_locations: &HashSet<String>,
    ) -> Result<Resolution> {
        let now = Utc::now();
        let modified = file_time(file.modified);
        let extractor = self.extractor_for(&file.path)?;

        let path = file.path.clone();
        let (session, hash) = blocking(move || {
            let mut session = extractor.initialize(&path)?;
            let hash = session.compute_hash()?;
            Ok((session, hash))
        })
        .await?;

        let hex = hash.to_hex();
        let (mut entry, outcome) = match self.move_source(source, &hex, batch_locations).await? {
            Some(mut entry) => {
                debug!(
                    source_id = %source.id,
                    from = %entry.location,
                    to = %location,
                    "content hash matched a vanished entry"
                );
                if let Ok(mime) = detect_mime(&file.path) {
                    entry.mime = mime;
                }
                entry.observe(location, file.size, modified, now);
                (entry, IndexOutcome::Moved)
            }
            None => {
                let mut entry =
                    CatalogEntry::discovered(source.id, location, file.size, modified, now);
                entry.hash = hex;
                (entry, IndexOutcome::Created)
            }
        };

        // Same bytes under a new name: the stored tags still hold.
        if !entry.dirty.needs_extraction() {
            if admit(entry.format, source.format_filter).is_none() {
                return Ok(Resolution::Filtered(entry.format));
            }
            let stored = self
                .repository
                .apply_entry_changes(EntryChanges::entry_only(entry))
                .await?;
            return Ok(Resolution::Indexed(stored.entry, outcome));
        }

        let path = file.path.clone();
        let extracted = blocking(move || extract_session(session, &path, Some(hash))).await?;
        let Some(format) = admit(extracted.format, source.format_filter) else {
            return Ok(Resolution::Filtered(extracted.format));
        };
        entry.format = format;
        entry.mime = extracted.mime;

        let tags = self.bounded_tags(extracted.tags);
        let changes = EntryChanges {
            entry,
            add_tags: reconcile_tags(&[], &tags).add,
            remove_tags: Vec::new(),
            add_values: reconcile_values(&[], &extracted.values).add,
            remove_values: Vec::new(),
        };
        let stored = self.repository.apply_entry_changes(changes).await?;
        Ok(Resolution::Indexed(stored.entry, outcome))
    }

    /// Record that the entry's file was seen at `at`. On failure the entry is
    /// remembered so the sweep does not disable a file that is present.
    async fn refresh(
        &self,
        entry_id: EntryId,
        at: DateTime<Utc>,
        unrefreshed: &mut HashSet<EntryId>,
    ) -> Result<()> {
        if let Err(err) = self.repository.mark_seen(entry_id, at).await {
            unrefreshed.insert(entry_id);
            return Err(err);
        }
        Ok(())
    }

    /// An entry carrying `hash` whose file is gone and which is not part of
    /// the current batch. Live duplicates never qualify.
    async fn move_source(
        &self,
        source: &Source,
        hash: &str,
        batch_locations: &HashSet<String>,
    ) -> Result<Option<CatalogEntry>> {
        let candidates = self.repository.entries_by_hash(source.id, hash).await?;
        for candidate in candidates {
            if batch_locations.contains(&candidate.entry.location) {
                continue;
            }
            let previous = source.location.join(&candidate.entry.location);
            if self.fs.path_exists(&previous).await {
                continue;
            }
            return Ok(Some(candidate.entry));
        }
        Ok(None)
    }

    async fn extract(&self, path: &Path) -> Result<Extracted> {
        let extractor = self.extractor_for(path)?;
        let path = path.to_path_buf();
        blocking(move || {
            let session = extractor.initialize(&path)?;
            extract_session(session, &path, None)
        })
        .await
    }

    fn extractor_for(&self, path: &Path) -> Result<Arc<dyn FormatExtractor>> {
        self.extractors
            .select(path)
            .ok_or_else(|| IndexError::extraction(path, "no extractor supports this file"))
    }

    fn bounded_tags(&self, tags: Vec<ExtractedTag>) -> Vec<ExtractedTag> {
        tags.into_iter()
            .map(|mut tag| {
                if tag.value.len() > self.max_tag_bytes {
                    tag.value = truncate_tag_value(&tag.value, self.max_tag_bytes).to_string();
                }
                tag
            })
            .collect()
    }
}

fn extract_session(
    mut session: Box<dyn ExtractionSession>,
    path: &Path,
    hash: Option<ContentHash>,
) -> Result<Extracted> {
    let format = session.classify()?;
    let mime = detect_mime(path)?;
    let hash = match hash {
        Some(hash) => hash,
        None => session.compute_hash()?,
    };
    let tags = session.extract_tags()?;
    let values = session.extract_values()?;
    Ok(Extracted {
        format,
        mime,
        hash,
        tags,
        values,
    })
}

/// Category to store under `filter`, or `None` when the file is rejected.
fn admit(format: FormatCategory, filter: FormatCategory) -> Option<FormatCategory> {
    if !format.passes_filter(filter) {
        return None;
    }
    Some(if format.is_specified() { format } else { filter })
}

/// Filesystem times are compared at the precision the catalog stores.
fn file_time(modified: DateTime<Utc>) -> DateTime<Utc> {
    modified.trunc_subsecs(3)
}

fn is_persistence_failure(err: &IndexError) -> bool {
    match err {
        IndexError::Persistence(_) | IndexError::NotFound(_) => true,
        #[cfg(feature = "database")]
        IndexError::Database(_) => true,
        _ => false,
    }
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| IndexError::Internal(format!("extraction task failed: {err}")))?
}

