use serde_json::Value;

use crate::ids::{EntryId, EntryTagId, EntryValueId, TagId};

/// Type codes at or above this value are user-defined and never touched by
/// extraction.
pub const CUSTOM_TAG_TYPE_START: u32 = 1_000_000;

/// Whether extraction owns associations carrying `type_code`.
pub const fn is_managed_type(type_code: u32) -> bool {
    type_code < CUSTOM_TAG_TYPE_START
}

/// A scalar value shared by every entry that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tag {
    pub id: TagId,
    pub value: String,
}

impl Tag {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            id: TagId::new(),
            value: value.into(),
        }
    }
}

/// Association of a shared [`Tag`] with an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntryTag {
    pub id: EntryTagId,
    pub entry_id: EntryId,
    pub namespace: String,
    pub type_code: u32,
    pub tag: Tag,
}

impl EntryTag {
    pub fn is_managed(&self) -> bool {
        is_managed_type(self.type_code)
    }
}

/// Structured metadata owned by a single entry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntryValue {
    pub id: EntryValueId,
    pub entry_id: EntryId,
    pub namespace: String,
    pub type_code: u32,
    pub value: Value,
}

impl EntryValue {
    pub fn is_managed(&self) -> bool {
        is_managed_type(self.type_code)
    }
}
