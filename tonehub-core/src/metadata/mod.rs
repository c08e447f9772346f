//! Format extractors.
//!
//! A [`FormatExtractor`] decides whether it understands a path and opens an
//! [`ExtractionSession`] for it. Sessions parse lazily: hashing a file never
//! has to read its tags, and reading tags never has to hash the payload.

pub mod audio;
mod mime;
mod registry;

use std::fmt;
use std::path::Path;

use serde_json::Value;
use tonehub_model::FormatCategory;

use crate::error::Result;
use crate::hash::ContentHash;

pub use audio::{AudioExtractor, AudioProperty, AUDIO_NAMESPACE};
pub use mime::detect_mime;
pub use registry::ExtractorRegistry;

/// Default upper bound for stored tag values, in UTF-8 bytes.
pub const MAX_TAG_VALUE_BYTES: usize = 2_500;

/// A scalar tag produced by an extractor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractedTag {
    pub namespace: String,
    pub type_code: u32,
    pub value: String,
}

impl ExtractedTag {
    pub fn new(
        namespace: impl Into<String>,
        type_code: u32,
        value: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            type_code,
            value: value.into(),
        }
    }
}

/// A structured value produced by an extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedValue {
    pub namespace: String,
    pub type_code: u32,
    pub value: Value,
}

impl ExtractedValue {
    pub fn new(namespace: impl Into<String>, type_code: u32, value: Value) -> Self {
        Self {
            namespace: namespace.into(),
            type_code,
            value,
        }
    }
}

/// Pluggable per-format metadata reader.
pub trait FormatExtractor: Send + Sync + fmt::Debug {
    /// Vocabulary that namespaces every tag and value this extractor emits.
    fn namespace(&self) -> &str;

    fn supports(&self, path: &Path) -> bool;

    /// Prepare `path` for extraction. Must not fail because optional
    /// metadata is missing.
    fn initialize(&self, path: &Path) -> Result<Box<dyn ExtractionSession>>;
}

/// Per-file extraction state returned by [`FormatExtractor::initialize`].
pub trait ExtractionSession: Send {
    fn classify(&mut self) -> Result<FormatCategory>;

    /// Scalar tags; empty values and structured-only properties are skipped.
    fn extract_tags(&mut self) -> Result<Vec<ExtractedTag>>;

    /// Tree-shaped values, including unmapped fields bundled as one value.
    fn extract_values(&mut self) -> Result<Vec<ExtractedValue>>;

    /// Digest of the format's payload range.
    fn compute_hash(&mut self) -> Result<ContentHash>;
}

/// Cut `value` to at most `max_bytes` without splitting a code point.
pub fn truncate_tag_value(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
