//! Catalog maintenance: resolving discovered files and sweeping orphans.

mod normalize;
mod orphans;
mod reconcile;
mod updater;

pub use normalize::normalize_location;
pub use orphans::{OrphanSweeper, SweepStats};
pub use reconcile::{
    AssociationDiff, TagDiff, ValueDiff, reconcile_tags, reconcile_values,
};
pub use updater::{CatalogUpdater, UpdateStats};
