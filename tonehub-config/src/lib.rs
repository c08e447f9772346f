//! Settings loading for the tonehub indexer.
//!
//! Settings come from one TOML or JSON document holding the indexer tuning
//! knobs, the database connection and the sources to seed. See
//! [`IndexerSettings::load_from_env`] for the lookup order.

pub mod settings;
pub mod sources;

pub use settings::{ConfigSource, DatabaseSettings, IndexerSettings};
pub use sources::SourceSettings;
