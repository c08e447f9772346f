use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tonehub_model::{
    CatalogEntry, DirtyMarkers, EntryId, EntryTag, EntryTagId, EntryValue,
    EntryValueId, Source, SourceId, Tag, TagId,
};

use super::{CatalogRepository, EntryChanges, EntryRecord};
use crate::error::{IndexError, Result};

/// Predicate deciding whether a commit for the given entry should fail.
pub type FailureHook = Arc<dyn Fn(&CatalogEntry) -> bool + Send + Sync>;

#[derive(Default)]
struct CatalogState {
    sources: BTreeMap<SourceId, Source>,
    entries: HashMap<EntryId, CatalogEntry>,
    tags: HashMap<TagId, Tag>,
    entry_tags: HashMap<EntryTagId, EntryTag>,
    entry_values: HashMap<EntryValueId, EntryValue>,
}

impl CatalogState {
    fn record(&self, entry: &CatalogEntry) -> EntryRecord {
        let mut tags: Vec<EntryTag> = self
            .entry_tags
            .values()
            .filter(|assoc| assoc.entry_id == entry.id)
            .cloned()
            .collect();
        tags.sort_by_key(|assoc| assoc.id);
        let mut values: Vec<EntryValue> = self
            .entry_values
            .values()
            .filter(|assoc| assoc.entry_id == entry.id)
            .cloned()
            .collect();
        values.sort_by_key(|assoc| assoc.id);
        EntryRecord {
            entry: entry.clone(),
            tags,
            values,
        }
    }

    fn tag_by_value(&self, value: &str) -> Option<&Tag> {
        self.tags.values().find(|tag| tag.value == value)
    }
}

/// Process-local catalog used for tests and embedding.
///
/// All state sits behind one `RwLock`, so each call observes and commits a
/// consistent snapshot.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
    failure_hook: Option<FailureHook>,
    seen_failure_hook: Option<FailureHook>,
    writes: Arc<AtomicU64>,
}

impl fmt::Debug for InMemoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCatalog")
            .field("writes", &self.writes.load(Ordering::Relaxed))
            .field("failure_hook", &self.failure_hook.is_some())
            .field("seen_failure_hook", &self.seen_failure_hook.is_some())
            .finish_non_exhaustive()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `apply_entry_changes` fail for every entry `hook` matches.
    pub fn with_failure_hook(
        mut self,
        hook: impl Fn(&CatalogEntry) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.failure_hook = Some(Arc::new(hook));
        self
    }

    /// Make `mark_seen` fail for every entry `hook` matches.
    pub fn with_seen_failure_hook(
        mut self,
        hook: impl Fn(&CatalogEntry) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.seen_failure_hook = Some(Arc::new(hook));
        self
    }

    pub async fn upsert_source(&self, source: Source) {
        self.state.write().await.sources.insert(source.id, source);
    }

    pub async fn remove_source(&self, id: SourceId) -> Option<Source> {
        self.state.write().await.sources.remove(&id)
    }

    /// Content-changing writes so far. `mark_seen` does not count.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn entry_count(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn tag_count(&self) -> usize {
        self.state.read().await.tags.len()
    }

    pub async fn entries(&self, source: SourceId) -> Vec<CatalogEntry> {
        let state = self.state.read().await;
        let mut entries: Vec<CatalogEntry> = state
            .entries
            .values()
            .filter(|entry| entry.source_id == source)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.location.cmp(&b.location));
        entries
    }

    pub async fn record_at(
        &self,
        source: SourceId,
        location: &str,
    ) -> Option<EntryRecord> {
        let state = self.state.read().await;
        state
            .entries
            .values()
            .find(|entry| entry.source_id == source && entry.location == location)
            .map(|entry| state.record(entry))
    }

    fn bump_writes(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalog {
    async fn list_sources(&self) -> Result<Vec<Source>> {
        Ok(self.state.read().await.sources.values().cloned().collect())
    }

    async fn get_source(&self, id: SourceId) -> Result<Option<Source>> {
        Ok(self.state.read().await.sources.get(&id).cloned())
    }

    async fn entries_by_paths(
        &self,
        source: SourceId,
        locations: &[String],
    ) -> Result<Vec<EntryRecord>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .values()
            .filter(|entry| {
                entry.source_id == source && locations.contains(&entry.location)
            })
            .map(|entry| state.record(entry))
            .collect())
    }

    async fn entries_by_hash(
        &self,
        source: SourceId,
        hash: &str,
    ) -> Result<Vec<EntryRecord>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .values()
            .filter(|entry| entry.source_id == source && entry.hash == hash)
            .map(|entry| state.record(entry))
            .collect())
    }

    async fn find_tag_by_value(&self, value: &str) -> Result<Option<Tag>> {
        Ok(self.state.read().await.tag_by_value(value).cloned())
    }

    async fn apply_entry_changes(&self, changes: EntryChanges) -> Result<EntryRecord> {
        if self
            .failure_hook
            .as_ref()
            .is_some_and(|hook| hook(&changes.entry))
        {
            return Err(IndexError::Persistence(format!(
                "injected failure for {}",
                changes.entry.location
            )));
        }

        let mut state = self.state.write().await;
        let EntryChanges {
            mut entry,
            add_tags,
            remove_tags,
            add_values,
            remove_values,
        } = changes;

        let clash = state.entries.values().any(|other| {
            other.id != entry.id
                && other.source_id == entry.source_id
                && other.location == entry.location
        });
        if clash {
            return Err(IndexError::Persistence(format!(
                "location {} already cataloged for source {}",
                entry.location, entry.source_id
            )));
        }

        entry.dirty = DirtyMarkers::default();
        let entry_id = entry.id;
        state.entries.insert(entry_id, entry);

        for id in remove_tags {
            if state
                .entry_tags
                .get(&id)
                .is_some_and(|assoc| assoc.entry_id == entry_id)
            {
                state.entry_tags.remove(&id);
            }
        }
        for id in remove_values {
            if state
                .entry_values
                .get(&id)
                .is_some_and(|assoc| assoc.entry_id == entry_id)
            {
                state.entry_values.remove(&id);
            }
        }

        for added in add_tags {
            let tag = match state.tag_by_value(&added.value) {
                Some(tag) => tag.clone(),
                None => {
                    let tag = Tag::new(added.value);
                    state.tags.insert(tag.id, tag.clone());
                    tag
                }
            };
            let assoc = EntryTag {
                id: EntryTagId::new(),
                entry_id,
                namespace: added.namespace,
                type_code: added.type_code,
                tag,
            };
            state.entry_tags.insert(assoc.id, assoc);
        }
        for added in add_values {
            let assoc = EntryValue {
                id: EntryValueId::new(),
                entry_id,
                namespace: added.namespace,
                type_code: added.type_code,
                value: added.value,
            };
            state.entry_values.insert(assoc.id, assoc);
        }

        self.bump_writes();
        let entry = &state.entries[&entry_id];
        Ok(state.record(entry))
    }

    async fn mark_seen(&self, entry: EntryId, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get_mut(&entry)
            .ok_or_else(|| IndexError::NotFound(format!("entry {entry}")))?;
        if self
            .seen_failure_hook
            .as_ref()
            .is_some_and(|hook| hook(entry))
        {
            return Err(IndexError::Persistence(format!(
                "injected failure for {}",
                entry.location
            )));
        }
        entry.last_checked_at = at;
        entry.enabled = true;
        Ok(())
    }

    async fn entries_checked_before(
        &self,
        source: SourceId,
        before: DateTime<Utc>,
        only_enabled: bool,
    ) -> Result<Vec<CatalogEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<CatalogEntry> = state
            .entries
            .values()
            .filter(|entry| {
                entry.source_id == source
                    && entry.last_checked_at < before
                    && (!only_enabled || entry.enabled)
            })
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.last_checked_at);
        Ok(entries)
    }

    async fn disable_entry(&self, entry: EntryId) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get_mut(&entry)
            .ok_or_else(|| IndexError::NotFound(format!("entry {entry}")))?;
        entry.enabled = false;
        self.bump_writes();
        Ok(())
    }

    async fn delete_entry(&self, entry: EntryId) -> Result<()> {
        let mut state = self.state.write().await;
        if state.entries.remove(&entry).is_none() {
            return Err(IndexError::NotFound(format!("entry {entry}")));
        }
        state.entry_tags.retain(|_, assoc| assoc.entry_id != entry);
        state.entry_values.retain(|_, assoc| assoc.entry_id != entry);
        self.bump_writes();
        Ok(())
    }

    async fn delete_orphan_tags(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let CatalogState {
            tags, entry_tags, ..
        } = &mut *state;
        let before = tags.len();
        tags.retain(|id, _| entry_tags.values().any(|assoc| assoc.tag.id == *id));
        Ok((before - tags.len()) as u64)
    }
}
