use std::path::{Component, Path};

/// Catalog key of `path` relative to `root`: `/`-separated, no leading
/// slash. `None` when `path` is not strictly below `root`.
pub fn normalize_location(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
