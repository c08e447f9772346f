//! # Tonehub Core
//!
//! File source reconciliation and indexing pipeline for the tonehub media
//! catalog.
//!
//! ## Overview
//!
//! - **Discovery**: recursive, cancellable walks of source roots that feed a
//!   bounded [`discovery::BatchQueue`]
//! - **Metadata**: pluggable [`metadata::FormatExtractor`]s, with an audio
//!   extractor for MP3, MP4/M4B and FLAC
//! - **Hashing**: xxHash64 fingerprints over a format-defined payload range
//! - **Catalog updates**: create, update, move and re-validate entries, with
//!   managed tag reconciliation that never touches user-defined tags
//! - **Orphans**: soft-disable after a pass, hard-delete after a grace period
//! - **Reconciler**: one loop that owns every source's pass lifecycle
//!
//! ## Feature Flags
//!
//! - `database`: PostgreSQL repository adapter (SQLx)
//! - `fs-watch`: `notify` watchers that trigger rescans on change
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tonehub_core::{
//!     AudioExtractor, ExtractorRegistry, InMemoryCatalog, IndexerConfig,
//!     SourceReconciler,
//! };
//! use tonehub_model::Source;
//!
//! async fn run() -> tonehub_core::Result<()> {
//!     let catalog = InMemoryCatalog::new();
//!     catalog.upsert_source(Source::new("/srv/audiobooks")).await;
//!
//!     let extractors = ExtractorRegistry::new().with(Arc::new(AudioExtractor::default()));
//!     let handle = SourceReconciler::new(Arc::new(catalog), extractors, IndexerConfig::default())
//!         .spawn()?;
//!
//!     handle.reconcile_now().await?;
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod catalog;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
#[cfg(feature = "fs-watch")]
pub mod fs_watch;
pub mod hash;
pub mod metadata;
pub mod reconciler;
pub mod repository;

pub use catalog::{CatalogUpdater, OrphanSweeper, SweepStats, UpdateStats};
pub use config::{IndexerConfig, WatchConfig};
pub use discovery::{
    BatchQueue, DiscoveredFile, Discoverer, DiscoveryOutcome, DiscoveryStatus, FileSystem,
    InMemoryFs, RealFs,
};
pub use error::{IndexError, Result};
pub use events::{
    Generation, IndexEvent, IndexObserver, IndexOutcome, NoopIndexObserver, TracingObserver,
};
pub use hash::ContentHash;
pub use metadata::{
    AudioExtractor, ExtractedTag, ExtractedValue, ExtractionSession, ExtractorRegistry,
    FormatExtractor,
};
pub use reconciler::{
    PassOutcome, PassReport, ReconcilerCommand, ReconcilerHandle, SourceReconciler,
};
#[cfg(feature = "database")]
pub use repository::PostgresCatalog;
pub use repository::{CatalogRepository, EntryChanges, EntryRecord, InMemoryCatalog};
