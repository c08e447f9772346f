use std::path::PathBuf;

use crate::error::{ModelError, Result};
use crate::format::FormatCategory;
use crate::ids::SourceId;

/// A configured filesystem root that the indexer keeps in sync.
///
/// Sources are owned by external configuration; the indexer only observes
/// them and reacts when their [`SourceRevision`] changes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Source {
    pub id: SourceId,
    pub location: PathBuf,
    #[cfg_attr(feature = "serde", serde(default))]
    pub format_filter: FormatCategory,
    #[cfg_attr(feature = "serde", serde(default = "enabled_by_default"))]
    pub enabled: bool,
}

#[cfg(feature = "serde")]
const fn enabled_by_default() -> bool {
    true
}

/// The attributes whose change invalidates any in-flight pass for a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRevision {
    pub location: PathBuf,
    pub format_filter: FormatCategory,
    pub enabled: bool,
}

impl Source {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            id: SourceId::new(),
            location: location.into(),
            format_filter: FormatCategory::Unspecified,
            enabled: true,
        }
    }

    pub fn with_filter(mut self, filter: FormatCategory) -> Self {
        self.format_filter = filter;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn revision(&self) -> SourceRevision {
        SourceRevision {
            location: self.location.clone(),
            format_filter: self.format_filter,
            enabled: self.enabled,
        }
    }

    /// A source must point at a non-empty location before it can be scanned.
    pub fn validate(&self) -> Result<()> {
        if self.location.as_os_str().is_empty() {
            return Err(ModelError::InvalidSource(format!(
                "source {} has an empty location",
                self.id
            )));
        }
        Ok(())
    }
}
