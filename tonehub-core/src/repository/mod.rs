//! Catalog persistence port and its adapters.
//!
//! The indexer only talks to storage through [`CatalogRepository`]. Every
//! change to one entry and its associations is handed over as a single
//! [`EntryChanges`] value so adapters can commit it in one transaction.

mod memory;
#[cfg(feature = "database")]
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tonehub_model::{
    CatalogEntry, EntryId, EntryTag, EntryTagId, EntryValue, EntryValueId,
    Source, SourceId, Tag,
};

use crate::error::Result;
use crate::metadata::{ExtractedTag, ExtractedValue};

pub use memory::{FailureHook, InMemoryCatalog};
#[cfg(feature = "database")]
pub use postgres::PostgresCatalog;

/// An entry together with every association attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRecord {
    pub entry: CatalogEntry,
    pub tags: Vec<EntryTag>,
    pub values: Vec<EntryValue>,
}

impl EntryRecord {
    pub fn new(entry: CatalogEntry) -> Self {
        Self {
            entry,
            tags: Vec::new(),
            values: Vec::new(),
        }
    }
}

/// One entry's worth of writes, committed atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryChanges {
    /// Inserted when unknown, replaced otherwise.
    pub entry: CatalogEntry,
    /// Associations to create; shared tags are resolved by value.
    pub add_tags: Vec<ExtractedTag>,
    pub remove_tags: Vec<EntryTagId>,
    pub add_values: Vec<ExtractedValue>,
    pub remove_values: Vec<EntryValueId>,
}

impl EntryChanges {
    /// Entry row only, associations untouched.
    pub fn entry_only(entry: CatalogEntry) -> Self {
        Self {
            entry,
            add_tags: Vec::new(),
            remove_tags: Vec::new(),
            add_values: Vec::new(),
            remove_values: Vec::new(),
        }
    }
}

/// Repository port consumed by the updater, the sweeps and the reconciler.
///
/// Implementations must make [`apply_entry_changes`] all-or-nothing.
///
/// [`apply_entry_changes`]: CatalogRepository::apply_entry_changes
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn list_sources(&self) -> Result<Vec<Source>>;

    async fn get_source(&self, id: SourceId) -> Result<Option<Source>>;

    /// Entries of `source` whose location is one of `locations`, enabled or not.
    async fn entries_by_paths(
        &self,
        source: SourceId,
        locations: &[String],
    ) -> Result<Vec<EntryRecord>>;

    /// Entries of `source` carrying content hash `hash`.
    async fn entries_by_hash(
        &self,
        source: SourceId,
        hash: &str,
    ) -> Result<Vec<EntryRecord>>;

    async fn find_tag_by_value(&self, value: &str) -> Result<Option<Tag>>;

    /// Upsert the entry and apply its association diff in one commit.
    async fn apply_entry_changes(&self, changes: EntryChanges) -> Result<EntryRecord>;

    /// Refresh `last_checked_at` and re-enable the entry.
    async fn mark_seen(&self, entry: EntryId, at: DateTime<Utc>) -> Result<()>;

    /// Entries of `source` last checked strictly before `before`.
    async fn entries_checked_before(
        &self,
        source: SourceId,
        before: DateTime<Utc>,
        only_enabled: bool,
    ) -> Result<Vec<CatalogEntry>>;

    async fn disable_entry(&self, entry: EntryId) -> Result<()>;

    /// Remove the entry and every association it owns.
    async fn delete_entry(&self, entry: EntryId) -> Result<()>;

    /// Delete shared tags no association references. Returns how many went.
    async fn delete_orphan_tags(&self) -> Result<u64>;
}
