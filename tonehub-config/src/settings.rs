use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use tonehub_core::IndexerConfig;
use tracing::debug;

use crate::sources::SourceSettings;

pub const CONFIG_PATH_VAR: &str = "TONEHUB_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "TONEHUB_CONFIG_JSON";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

const DEFAULT_FILES: &[&str] = &["tonehub.toml", "tonehub.json", "config/tonehub.toml"];

/// Where the effective settings came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// PostgreSQL URL. `$DATABASE_URL` takes precedence.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// Everything the indexer binary needs to start.
///
/// ```toml
/// [indexer]
/// poll_interval_ms = 60000
/// orphan_grace_secs = 3600
///
/// [indexer.watch]
/// debounce_window_ms = 1500
///
/// [[sources]]
/// id = "01939f5e-7a51-7c3a-9d0e-2b1c8a4f6e10"
/// path = "/srv/audiobooks"
/// format = "audiobook"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexerSettings {
    pub indexer: IndexerConfig,
    pub database: DatabaseSettings,
    pub sources: Vec<SourceSettings>,
}

impl IndexerSettings {
    /// Load settings, first match wins:
    /// 1) `$TONEHUB_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$TONEHUB_CONFIG_JSON` (inline JSON),
    /// 3) `tonehub.toml`, `tonehub.json` or `config/tonehub.toml` in the
    ///    working directory,
    /// 4) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        let cwd = env::current_dir().context("failed to resolve working directory")?;
        Self::load(|key| env::var(key).ok(), &cwd)
    }

    /// [`Self::load_from_env`] with the environment and working directory
    /// supplied by the caller.
    pub fn load(
        var: impl Fn(&str) -> Option<String>,
        base: &Path,
    ) -> anyhow::Result<(Self, ConfigSource)> {
        let set = |key: &str| var(key).filter(|value| !value.trim().is_empty());

        let (settings, origin) = if let Some(path) = set(CONFIG_PATH_VAR) {
            let path = PathBuf::from(path);
            (Self::load_from_file(&path)?, ConfigSource::EnvPath(path))
        } else if let Some(raw) = set(CONFIG_JSON_VAR) {
            let parsed = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?;
            (parsed, ConfigSource::EnvInline)
        } else if let Some(path) = Self::find_default_file(base) {
            (Self::load_from_file(&path)?, ConfigSource::File(path))
        } else {
            (Self::default(), ConfigSource::Default)
        };

        let mut settings = settings;
        if let Some(url) = set(DATABASE_URL_VAR) {
            debug!("database url taken from {DATABASE_URL_VAR}");
            settings.database.url = Some(url);
        }
        settings.validate()?;
        Ok((settings, origin))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read indexer config from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid indexer config {}", path.display())),
            Some("toml") | Some("tml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid indexer config {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse indexer config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid indexer config json: {err}"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.indexer.validate()?;
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be at least 1");
        }

        let mut ids = HashSet::new();
        let mut paths = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if let Some(id) = source.id {
                if !ids.insert(id) {
                    bail!("source id {id} is configured twice");
                }
            }
            if !paths.insert(&source.path) {
                bail!("source path {} is configured twice", source.path.display());
            }
        }
        Ok(())
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database
            .url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    fn find_default_file(base: &Path) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|candidate| base.join(candidate))
            .find(|path| path.is_file())
    }
}
