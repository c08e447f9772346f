use std::path::Path;
use std::sync::Arc;

use super::FormatExtractor;

/// Ordered set of extractors; the first one that supports a path wins.
#[derive(Debug, Clone, Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn FormatExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, extractor: Arc<dyn FormatExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    pub fn register(&mut self, extractor: Arc<dyn FormatExtractor>) {
        self.extractors.push(extractor);
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.extractors.iter().any(|extractor| extractor.supports(path))
    }

    pub fn select(&self, path: &Path) -> Option<Arc<dyn FormatExtractor>> {
        self.extractors
            .iter()
            .find(|extractor| extractor.supports(path))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}
