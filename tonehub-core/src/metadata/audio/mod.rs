//! Audio extractor: tags via `lofty`, payload range and iTunes atoms via
//! [`layout`].

mod layout;
mod property;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, ItemValue};
use serde_json::{Map, Value, json};
use tonehub_model::FormatCategory;

use super::{ExtractedTag, ExtractedValue, ExtractionSession, FormatExtractor};
use crate::error::{IndexError, Result};
use crate::hash::{self, ContentHash};

use layout::{ContainerKind, ContainerLayout, read_layout};
pub use property::AudioProperty;

#[cfg(test)]
pub(crate) use layout::fixtures;

pub const AUDIO_NAMESPACE: &str = "audio";

const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "m4a", "m4b", "mp4", "flac"];
const MEDIA_KIND_KEYS: &[&str] = &["ITUNESMEDIATYPE", "STIK"];
const DATE_OUTPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Extractor for MP3, MP4 family (m4a/m4b) and FLAC files.
#[derive(Debug, Clone, Default)]
pub struct AudioExtractor {
    max_hash_bytes: Option<u64>,
}

impl AudioExtractor {
    /// `max_hash_bytes` narrows the hashed payload to a centered window.
    pub fn new(max_hash_bytes: Option<u64>) -> Self {
        Self { max_hash_bytes }
    }
}

impl FormatExtractor for AudioExtractor {
    fn namespace(&self) -> &str {
        AUDIO_NAMESPACE
    }

    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|supported| ext.eq_ignore_ascii_case(supported))
            })
    }

    fn initialize(&self, path: &Path) -> Result<Box<dyn ExtractionSession>> {
        let metadata = std::fs::metadata(path)
            .map_err(|err| IndexError::extraction(path, err))?;
        if !metadata.is_file() {
            return Err(IndexError::extraction(path, "not a regular file"));
        }
        Ok(Box::new(AudioSession {
            path: path.to_path_buf(),
            max_hash_bytes: self.max_hash_bytes,
            layout: None,
            snapshot: None,
        }))
    }
}

/// Tag items copied out of the parsed file.
#[derive(Debug, Default)]
struct TagSnapshot {
    items: Vec<(ItemKey, String)>,
    duration_ms: u64,
}

#[derive(Debug)]
struct AudioSession {
    path: PathBuf,
    max_hash_bytes: Option<u64>,
    layout: Option<ContainerLayout>,
    snapshot: Option<TagSnapshot>,
}

impl AudioSession {
    fn layout(&mut self) -> Result<&ContainerLayout> {
        let layout = match self.layout.take() {
            Some(layout) => layout,
            None => {
                let file = File::open(&self.path)
                    .map_err(|err| IndexError::extraction(&self.path, err))?;
                read_layout(&mut BufReader::new(file))
                    .map_err(|err| IndexError::extraction(&self.path, err))?
            }
        };
        Ok(self.layout.insert(layout))
    }

    fn snapshot(&mut self) -> Result<&TagSnapshot> {
        let snapshot = match self.snapshot.take() {
            Some(snapshot) => snapshot,
            None => read_snapshot(&self.path)?,
        };
        Ok(self.snapshot.insert(snapshot))
    }
}

fn read_snapshot(path: &Path) -> Result<TagSnapshot> {
    let tagged = Probe::open(path)
        .map_err(|err| IndexError::extraction(path, err))?
        .read()
        .map_err(|err| IndexError::extraction(path, err))?;

    let duration_ms =
        u64::try_from(tagged.properties().duration().as_millis()).unwrap_or(0);

    let items = tagged
        .primary_tag()
        .or_else(|| tagged.first_tag())
        .map(|tag| {
            tag.items()
                .filter_map(|item| match item.value() {
                    ItemValue::Text(text) | ItemValue::Locator(text) => {
                        Some((item.key().clone(), text.clone()))
                    }
                    ItemValue::Binary(_) => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(TagSnapshot { items, duration_ms })
}

impl ExtractionSession for AudioSession {
    fn classify(&mut self) -> Result<FormatCategory> {
        let layout = self.layout()?;
        if let Some(raw) = layout.media_kind {
            return Ok(FormatCategory::from_raw(raw));
        }
        if layout.kind == ContainerKind::Mp4 {
            return Ok(FormatCategory::Unspecified);
        }

        let raw = self.snapshot()?.items.iter().find_map(|(key, value)| {
            match key {
                ItemKey::Unknown(name)
                    if MEDIA_KIND_KEYS
                        .iter()
                        .any(|known| name.eq_ignore_ascii_case(known)) =>
                {
                    value.trim().parse::<i64>().ok()
                }
                _ => None,
            }
        });
        Ok(raw.map(FormatCategory::from_raw).unwrap_or_default())
    }

    fn extract_tags(&mut self) -> Result<Vec<ExtractedTag>> {
        let snapshot = self.snapshot()?;
        let mut tags = Vec::with_capacity(snapshot.items.len() + 1);

        for (key, raw) in &snapshot.items {
            let Some(property) = AudioProperty::for_item_key(key) else {
                continue;
            };
            if property.is_structured_only() {
                continue;
            }
            let value = raw.trim();
            if value.is_empty() {
                continue;
            }
            let value = if property.is_date() {
                normalize_date(value).unwrap_or_else(|| value.to_string())
            } else {
                value.to_string()
            };
            tags.push(ExtractedTag::new(AUDIO_NAMESPACE, property.code(), value));
        }

        if snapshot.duration_ms > 0 {
            tags.push(ExtractedTag::new(
                AUDIO_NAMESPACE,
                AudioProperty::DurationMs.code(),
                snapshot.duration_ms.to_string(),
            ));
        }
        Ok(tags)
    }

    fn extract_values(&mut self) -> Result<Vec<ExtractedValue>> {
        let (long_description, chapters) = {
            let layout = self.layout()?;
            (layout.long_description.clone(), layout.chapters.clone())
        };
        let snapshot = self.snapshot()?;
        let mut values = Vec::new();

        let mut unmapped = Map::new();
        let mut lyrics = None;
        for (key, raw) in &snapshot.items {
            let value = raw.trim();
            if value.is_empty() {
                continue;
            }
            match AudioProperty::for_item_key(key) {
                Some(AudioProperty::Lyrics) => {
                    lyrics.get_or_insert_with(|| value.to_string());
                }
                Some(_) => {}
                None => push_field(&mut unmapped, field_name(key), value),
            }
        }

        if !unmapped.is_empty() {
            values.push(ExtractedValue::new(
                AUDIO_NAMESPACE,
                AudioProperty::AdditionalFields.code(),
                Value::Object(unmapped),
            ));
        }
        if let Some(description) = long_description {
            values.push(ExtractedValue::new(
                AUDIO_NAMESPACE,
                AudioProperty::LongDescription.code(),
                Value::String(description),
            ));
        }
        if let Some(lyrics) = lyrics {
            values.push(ExtractedValue::new(
                AUDIO_NAMESPACE,
                AudioProperty::Lyrics.code(),
                Value::String(lyrics),
            ));
        }
        if !chapters.is_empty() {
            let duration_ms = snapshot.duration_ms;
            let entries: Vec<Value> = chapters
                .iter()
                .enumerate()
                .map(|(index, chapter)| {
                    let end = chapters
                        .get(index + 1)
                        .map_or(duration_ms, |next| next.start_ms);
                    json!({
                        "start": chapter.start_ms,
                        "length": end.saturating_sub(chapter.start_ms),
                        "title": chapter.title,
                    })
                })
                .collect();
            values.push(ExtractedValue::new(
                AUDIO_NAMESPACE,
                AudioProperty::Chapters.code(),
                Value::Array(entries),
            ));
        }

        Ok(values)
    }

    fn compute_hash(&mut self) -> Result<ContentHash> {
        let max_hash_bytes = self.max_hash_bytes;
        let payload = self.layout()?.payload.clone();
        let window = match max_hash_bytes {
            Some(max) => hash::centered_window(payload, max),
            None => payload,
        };
        let file = File::open(&self.path)
            .map_err(|err| IndexError::extraction(&self.path, err))?;
        hash::partial_hash(
            BufReader::new(file),
            window.start,
            window.end - window.start,
        )
        .map_err(|err| IndexError::extraction(&self.path, err))
    }
}

fn field_name(key: &ItemKey) -> String {
    match key {
        ItemKey::Unknown(name) => name.clone(),
        other => format!("{other:?}"),
    }
}

/// Repeated keys collapse into an array rather than overwriting each other.
fn push_field(fields: &mut Map<String, Value>, key: String, value: &str) {
    let value = Value::String(value.to_string());
    match fields.get_mut(&key) {
        None => {
            fields.insert(key, value);
        }
        Some(Value::Array(existing)) => existing.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

/// Render year, date or date-time strings in one sortable UTC format.
fn normalize_date(raw: &str) -> Option<String> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(
            parsed
                .with_timezone(&chrono::Utc)
                .format(DATE_OUTPUT_FORMAT)
                .to_string(),
        );
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, pattern) {
            return Some(parsed.format(DATE_OUTPUT_FORMAT).to_string());
        }
    }
    let date = match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) if raw.len() == 4 && raw.bytes().all(|b| b.is_ascii_digit()) => {
            NaiveDate::from_ymd_opt(raw.parse().ok()?, 1, 1)?
        }
        Err(_) => return None,
    };
    Some(date.and_hms_opt(0, 0, 0)?.format(DATE_OUTPUT_FORMAT).to_string())
}
