//! Inode management for the FUSE surface.
//!
//! FUSE speaks in inode numbers while the engine speaks in union-relative
//! paths; this table provides the bidirectional mapping. Attributes are
//! never cached here: the same union path can be backed by different
//! branches from one call to the next, so every getattr goes to a real
//! `lstat`.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Reserved inode for the root directory.
pub const ROOT_INO: u64 = 1;

struct Inner {
    by_path: HashMap<String, u64>,
    by_ino: HashMap<u64, String>,
    next_ino: u64,
}

/// Bidirectional inode/path mapping.
pub struct PathTable {
    inner: RwLock<Inner>,
}

impl PathTable {
    pub fn new() -> PathTable {
        let mut by_path = HashMap::new();
        let mut by_ino = HashMap::new();
        by_path.insert("/".to_string(), ROOT_INO);
        by_ino.insert(ROOT_INO, "/".to_string());
        PathTable {
            inner: RwLock::new(Inner {
                by_path,
                by_ino,
                next_ino: ROOT_INO + 1,
            }),
        }
    }

    fn normalize(path: &str) -> String {
        if path.is_empty() {
            return "/".to_string();
        }
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// Get the inode for a path, allocating one on first sight.
    pub fn get_or_create(&self, path: &str) -> u64 {
        let normalized = Self::normalize(path);
        let mut inner = self.inner.write();
        if let Some(&ino) = inner.by_path.get(&normalized) {
            return ino;
        }
        let ino = inner.next_ino;
        inner.next_ino += 1;
        inner.by_path.insert(normalized.clone(), ino);
        inner.by_ino.insert(ino, normalized);
        ino
    }

    /// The union path behind an inode.
    pub fn get_path(&self, ino: u64) -> Option<String> {
        self.inner.read().by_ino.get(&ino).cloned()
    }

    /// Drop the mapping for a removed path.
    pub fn forget_path(&self, path: &str) {
        let normalized = Self::normalize(path);
        let mut inner = self.inner.write();
        if let Some(ino) = inner.by_path.remove(&normalized) {
            inner.by_ino.remove(&ino);
        }
    }

    /// Remap a renamed entry and everything beneath it, keeping inode
    /// numbers stable across the rename.
    pub fn rename_tree(&self, old: &str, new: &str) {
        let old = Self::normalize(old);
        let new = Self::normalize(new);
        let mut inner = self.inner.write();

        let prefix = format!("{old}/");
        let moved: Vec<(String, u64)> = inner
            .by_path
            .iter()
            .filter(|(p, _)| *p == &old || p.starts_with(&prefix))
            .map(|(p, &ino)| (p.clone(), ino))
            .collect();

        for (path, ino) in moved {
            inner.by_path.remove(&path);
            let renamed = if path == old {
                new.clone()
            } else {
                format!("{new}{}", &path[old.len()..])
            };
            inner.by_path.insert(renamed.clone(), ino);
            inner.by_ino.insert(ino, renamed);
        }
    }
}

impl Default for PathTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a child path from parent + name.
pub fn child_path(parent_path: &str, name: &str) -> String {
    if parent_path == "/" {
        format!("/{name}")
    } else {
        format!("{parent_path}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_preregistered() {
        let table = PathTable::new();
        assert_eq!(table.get_path(ROOT_INO), Some("/".to_string()));
        assert_eq!(table.get_or_create("/"), ROOT_INO);
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let table = PathTable::new();
        let a = table.get_or_create("/x");
        let b = table.get_or_create("/x");
        assert_eq!(a, b);
        assert_ne!(a, ROOT_INO);
        assert_eq!(table.get_path(a), Some("/x".to_string()));
    }

    #[test]
    fn test_forget_path() {
        let table = PathTable::new();
        let ino = table.get_or_create("/gone");
        table.forget_path("/gone");
        assert_eq!(table.get_path(ino), None);
        // a new sighting allocates a fresh inode
        assert_ne!(table.get_or_create("/gone"), ino);
    }

    #[test]
    fn test_rename_tree_moves_descendants() {
        let table = PathTable::new();
        let dir = table.get_or_create("/a");
        let file = table.get_or_create("/a/b/c");
        let bystander = table.get_or_create("/ab");

        table.rename_tree("/a", "/z");

        assert_eq!(table.get_path(dir), Some("/z".to_string()));
        assert_eq!(table.get_path(file), Some("/z/b/c".to_string()));
        assert_eq!(table.get_path(bystander), Some("/ab".to_string()));
        assert_eq!(table.get_or_create("/z/b/c"), file);
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("/", "x"), "/x");
        assert_eq!(child_path("/a/b", "x"), "/a/b/x");
    }
}
