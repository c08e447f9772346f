use std::collections::HashMap;

use tonehub_model::{Source, SourceId};

/// Result of comparing the repository's source list with the last-known one.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SourceDiff {
    pub added: Vec<Source>,
    /// Same id, different path, filter or enabled flag.
    pub changed: Vec<Source>,
    pub removed: Vec<SourceId>,
    pub unchanged: Vec<SourceId>,
}

impl SourceDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

pub fn diff_sources(known: &HashMap<SourceId, Source>, current: &[Source]) -> SourceDiff {
    let mut diff = SourceDiff::default();
    for source in current {
        match known.get(&source.id) {
            None => diff.added.push(source.clone()),
            Some(previous) if previous.revision() != source.revision() => {
                diff.changed.push(source.clone())
            }
            Some(_) => diff.unchanged.push(source.id),
        }
    }
    let mut removed: Vec<SourceId> = known
        .keys()
        .filter(|id| !current.iter().any(|source| source.id == **id))
        .copied()
        .collect();
    removed.sort();
    diff.removed = removed;
    diff
}
