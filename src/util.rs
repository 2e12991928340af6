use crate::model::{Dump, Location, ResolvedLocation};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path};

/// Translates a repository path into a path relative to the dump root.
///
/// A path naming the root directory itself (without its trailing slash)
/// maps to the empty prefix, so `sub1` inside a dump rooted at `sub1/`
/// selects every document of the dump.
pub fn path_in_bundle<'a>(root: &str, path: &'a str) -> &'a str {
    if let Some(rest) = path.strip_prefix(root) {
        return rest;
    }
    if let Some(trimmed) = root.strip_suffix('/') {
        if path == trimmed {
            return "";
        }
    }
    path
}

/// Re-anchors a bundle-relative path at the dump root.
pub fn anchor_path(root: &str, path: &str) -> String {
    let mut out = String::with_capacity(root.len() + path.len());
    out.push_str(root);
    out.push_str(path);
    out
}

pub fn resolve_location(dump: &Dump, location: Location) -> ResolvedLocation {
    ResolvedLocation {
        path: anchor_path(&dump.root, &location.path),
        range: location.range,
        dump: dump.clone(),
    }
}

pub fn resolve_locations(dump: &Dump, locations: Vec<Location>) -> Vec<ResolvedLocation> {
    locations
        .into_iter()
        .map(|location| resolve_location(dump, location))
        .collect()
}

/// Normalizes a dump root: forward slashes, no leading `./`, trailing `/`
/// unless empty.
pub fn normalize_root(root: &str) -> String {
    let normalized = normalize_path(Path::new(root));
    if normalized == "." || normalized.is_empty() {
        String::new()
    } else {
        format!("{normalized}/")
    }
}

pub fn normalize_path(path: &Path) -> String {
    let mut parts = Vec::new();
    for comp in path.components() {
        match comp {
            Component::Normal(os) => parts.push(os.to_string_lossy().to_string()),
            Component::ParentDir => parts.push("..".to_string()),
            Component::CurDir => {}
            _ => {}
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Range;

    #[test]
    fn strips_dump_root() {
        assert_eq!(path_in_bundle("sub1/", "sub1/internal/foo.go"), "internal/foo.go");
        assert_eq!(path_in_bundle("sub1/", "sub1"), "");
        assert_eq!(path_in_bundle("sub1/", "other/foo.go"), "other/foo.go");
        assert_eq!(path_in_bundle("", "main.go"), "main.go");
    }

    #[test]
    fn anchors_at_root() {
        let dump = Dump {
            id: 42,
            repository_id: 100,
            commit: "deadbeef".to_string(),
            root: "sub1/".to_string(),
            indexer: "lsif-go".to_string(),
        };
        let resolved = resolve_location(&dump, Location::new("foo.go", Range::new(1, 2, 3, 4)));
        assert_eq!(resolved.path, "sub1/foo.go");
        assert_eq!(resolved.dump.id, 42);
    }

    #[test]
    fn normalizes_roots() {
        assert_eq!(normalize_root(""), "");
        assert_eq!(normalize_root("./"), "");
        assert_eq!(normalize_root("sub1"), "sub1/");
        assert_eq!(normalize_root("./a/b/"), "a/b/");
    }
}
