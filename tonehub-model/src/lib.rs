//! Catalog data model shared across tonehub crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod entry;
pub mod error;
pub mod format;
pub mod ids;
pub mod source;
pub mod tags;

pub use entry::{CatalogEntry, DirtyMarkers, MimeType};
pub use error::ModelError;
pub use format::FormatCategory;
pub use ids::{EntryId, EntryTagId, EntryValueId, SourceId, TagId};
pub use source::{Source, SourceRevision};
pub use tags::{
    CUSTOM_TAG_TYPE_START, EntryTag, EntryValue, Tag, is_managed_type,
};
