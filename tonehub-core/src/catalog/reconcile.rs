//! Association diffing.
//!
//! Extraction owns every association below the custom type threshold. The
//! diff keeps what still matches, adds what is new and removes the rest of
//! the managed set. Custom associations are only ever kept.

use serde_json::Value;
use tonehub_model::{EntryTag, EntryTagId, EntryValue, EntryValueId};

use crate::metadata::{ExtractedTag, ExtractedValue};

#[derive(Debug, Clone, PartialEq)]
pub struct AssociationDiff<Id, New> {
    pub keep: Vec<Id>,
    pub add: Vec<New>,
    pub remove: Vec<Id>,
}

impl<Id, New> AssociationDiff<Id, New> {
    pub fn is_noop(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

pub type TagDiff = AssociationDiff<EntryTagId, ExtractedTag>;
pub type ValueDiff = AssociationDiff<EntryValueId, ExtractedValue>;

pub fn reconcile_tags(existing: &[EntryTag], fresh: &[ExtractedTag]) -> TagDiff {
    diff(
        existing,
        fresh,
        |assoc| (assoc.id, assoc.is_managed()),
        |assoc, tag| {
            assoc.namespace == tag.namespace
                && assoc.type_code == tag.type_code
                && assoc.tag.value == tag.value
        },
        |a, b| a == b,
    )
}

pub fn reconcile_values(existing: &[EntryValue], fresh: &[ExtractedValue]) -> ValueDiff {
    diff(
        existing,
        fresh,
        |assoc| (assoc.id, assoc.is_managed()),
        |assoc, value| {
            assoc.namespace == value.namespace
                && assoc.type_code == value.type_code
                && json_eq(&assoc.value, &value.value)
        },
        |a, b| {
            a.namespace == b.namespace
                && a.type_code == b.type_code
                && json_eq(&a.value, &b.value)
        },
    )
}

/// Structural equality that ignores object key order and treats `1` and
/// `1.0` as the same number.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| json_eq(x, y)))
        }
        _ => a == b,
    }
}

fn diff<E, F, Id>(
    existing: &[E],
    fresh: &[F],
    identify: impl Fn(&E) -> (Id, bool),
    matches: impl Fn(&E, &F) -> bool,
    same_fresh: impl Fn(&F, &F) -> bool,
) -> AssociationDiff<Id, F>
where
    F: Clone,
    Id: Copy + PartialEq,
{
    let mut keep: Vec<Id> = Vec::new();
    let mut add: Vec<F> = Vec::new();

    for (at, item) in fresh.iter().enumerate() {
        if fresh[..at].iter().any(|earlier| same_fresh(earlier, item)) {
            continue;
        }
        let kept = existing.iter().find(|assoc| {
            let (id, _) = identify(assoc);
            !keep.contains(&id) && matches(assoc, item)
        });
        match kept {
            Some(assoc) => keep.push(identify(assoc).0),
            None => add.push(item.clone()),
        }
    }

    let remove = existing
        .iter()
        .map(&identify)
        .filter(|(id, managed)| *managed && !keep.contains(id))
        .map(|(id, _)| id)
        .collect();

    AssociationDiff { keep, add, remove }
}
