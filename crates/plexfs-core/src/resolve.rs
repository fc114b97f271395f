//! Joining union-relative paths onto branches.

use std::path::{Path, PathBuf};

use crate::branch::BranchSnapshot;
use crate::probe::FsProbe;

/// A union-relative path resolved against one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Index of the branch in the snapshot it was resolved against.
    pub branch_index: usize,
    /// The branch's base path.
    pub base: PathBuf,
    /// `base` joined with the relative path.
    pub full: PathBuf,
}

/// Join a branch base path and a union-relative path. Pure string work;
/// never touches the filesystem.
pub fn resolve(base: &Path, relpath: &str) -> PathBuf {
    let trimmed = relpath.trim_start_matches('/');
    if trimmed.is_empty() {
        base.to_path_buf()
    } else {
        base.join(trimmed)
    }
}

/// The parent of a union-relative path. The root is its own parent.
pub fn parent_of(relpath: &str) -> &str {
    match relpath.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

/// Every branch currently containing `relpath`, in branch-set order.
///
/// Recomputed fresh on every call: branch contents can change between
/// calls, so nothing here is cached.
pub fn find_all(
    snapshot: &BranchSnapshot,
    relpath: &str,
    probe: &dyn FsProbe,
) -> Vec<ResolvedPath> {
    snapshot
        .branches
        .iter()
        .enumerate()
        .filter_map(|(i, branch)| {
            let full = resolve(&branch.path, relpath);
            probe.exists(&full).then(|| ResolvedPath {
                branch_index: i,
                base: branch.path.clone(),
                full,
            })
        })
        .collect()
}
