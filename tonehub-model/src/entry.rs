use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ModelError;
use crate::format::FormatCategory;
use crate::ids::{EntryId, SourceId};

/// MIME type split into its media and sub type, e.g. `audio` / `mp4`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MimeType {
    pub media_type: String,
    pub sub_type: String,
}

impl MimeType {
    pub fn new(media_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            sub_type: sub_type.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.media_type.is_empty() || self.sub_type.is_empty()
    }
}

impl FromStr for MimeType {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        // Parameters such as `; charset=utf-8` are not part of the pair.
        let essence = raw.split(';').next().unwrap_or_default().trim();
        let (media, sub) = essence
            .split_once('/')
            .ok_or_else(|| ModelError::InvalidMimeType(raw.to_string()))?;
        let media = media.trim();
        let sub = sub.trim();
        if media.is_empty() || sub.is_empty() || sub.contains('/') {
            return Err(ModelError::InvalidMimeType(raw.to_string()));
        }
        Ok(Self::new(media.to_ascii_lowercase(), sub.to_ascii_lowercase()))
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.media_type, self.sub_type)
    }
}

/// Transient flags set while a file is being resolved. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirtyMarkers {
    /// The entry did not exist before this pass.
    pub is_new: bool,
    /// The file's modification time advanced since it was last indexed.
    pub has_changed: bool,
}

impl DirtyMarkers {
    pub fn needs_extraction(&self) -> bool {
        self.is_new || self.has_changed
    }
}

/// One indexed file.
///
/// `(source_id, location)` is unique; `(source_id, hash)` identifies the same
/// bytes after a rename or move.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CatalogEntry {
    pub id: EntryId,
    pub source_id: SourceId,
    /// Root-relative path with `/` separators and no leading slash.
    pub location: String,
    /// Hex encoded content digest.
    pub hash: String,
    pub size: u64,
    pub format: FormatCategory,
    pub mime: MimeType,
    pub modified_at: DateTime<Utc>,
    pub last_checked_at: DateTime<Utc>,
    pub enabled: bool,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub dirty: DirtyMarkers,
}

impl CatalogEntry {
    /// Fresh record for a file that has never been cataloged.
    pub fn discovered(
        source_id: SourceId,
        location: impl Into<String>,
        size: u64,
        modified_at: DateTime<Utc>,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::new(),
            source_id,
            location: location.into(),
            hash: String::new(),
            size,
            format: FormatCategory::Unspecified,
            mime: MimeType::default(),
            modified_at,
            last_checked_at: checked_at,
            enabled: true,
            dirty: DirtyMarkers {
                is_new: true,
                has_changed: false,
            },
        }
    }

    /// Record an observation of the file at `location`, re-enabling the entry.
    pub fn observe(
        &mut self,
        location: impl Into<String>,
        size: u64,
        modified_at: DateTime<Utc>,
        checked_at: DateTime<Utc>,
    ) {
        self.location = location.into();
        self.size = size;
        self.modified_at = modified_at;
        self.last_checked_at = checked_at;
        self.enabled = true;
    }

    /// Flag the entry as changed when `modified_at` is strictly newer than
    /// the time it was indexed at. Returns whether it must be re-extracted.
    pub fn mark_if_modified(&mut self, modified_at: DateTime<Utc>) -> bool {
        self.dirty.has_changed = modified_at > self.modified_at;
        self.dirty.needs_extraction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mime_pairs() {
        let mime: MimeType = "Audio/MP4; codecs=mp4a".parse().unwrap();
        assert_eq!(mime, MimeType::new("audio", "mp4"));
        assert_eq!(mime.to_string(), "audio/mp4");

        assert!("audio".parse::<MimeType>().is_err());
        assert!("/mpeg".parse::<MimeType>().is_err());
        assert!("audio/x/y".parse::<MimeType>().is_err());
    }

    #[test]
    fn discovered_entries_need_extraction() {
        let now = Utc::now();
        let entry =
            CatalogEntry::discovered(SourceId::new(), "a/b.mp3", 10, now, now);
        assert!(entry.dirty.is_new);
        assert!(entry.dirty.needs_extraction());
        assert!(entry.enabled);
        assert!(entry.mime.is_empty());
    }

    #[test]
    fn only_newer_modification_times_need_extraction() {
        let indexed = Utc::now();
        let mut entry = CatalogEntry::discovered(SourceId::new(), "a.mp3", 10, indexed, indexed);
        entry.dirty = DirtyMarkers::default();

        assert!(!entry.mark_if_modified(indexed));
        assert!(!entry.mark_if_modified(indexed - chrono::Duration::seconds(30)));
        assert!(!entry.dirty.has_changed);

        assert!(entry.mark_if_modified(indexed + chrono::Duration::milliseconds(1)));
        assert!(entry.dirty.has_changed);
    }
}
