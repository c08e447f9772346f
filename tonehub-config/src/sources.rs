use std::path::PathBuf;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use tonehub_model::{FormatCategory, Source, SourceId};

/// One `[[sources]]` table.
///
/// `id` is optional for throwaway in-memory runs. A persistent catalog needs
/// it so the same root keeps its entries across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SourceId>,
    pub path: PathBuf,
    #[serde(default)]
    pub format: FormatCategory,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            path: path.into(),
            format: FormatCategory::Unspecified,
            enabled: true,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.path.as_os_str().is_empty() {
            bail!("source path must not be empty");
        }
        if !self.path.is_absolute() {
            bail!("source path {} must be absolute", self.path.display());
        }
        Ok(())
    }

    /// Build the runtime source, minting an id when none was configured.
    pub fn to_source(&self) -> Source {
        let mut source = Source::new(self.path.clone()).with_filter(self.format);
        if let Some(id) = self.id {
            source.id = id;
        }
        source.enabled = self.enabled;
        source
    }
}
