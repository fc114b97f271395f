//! Branches and the live, atomically replaceable branch set.
//!
//! A `BranchSnapshot` is an owned, immutable view of the branch list plus
//! the global free-space default. Readers take a snapshot once per
//! operation and never observe a half-updated list; reconfiguration swaps
//! the whole snapshot behind a write lock.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use plexfs_config::{BranchConfig, BranchMode, UnionConfig};

/// One underlying directory unioned into the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    /// Absolute path of the underlying directory.
    pub path: PathBuf,
    /// Access mode.
    pub mode: BranchMode,
    /// Per-branch minimum free space override.
    pub min_free_space: Option<u64>,
}

impl Branch {
    pub fn from_config(config: &BranchConfig) -> Branch {
        Branch {
            path: PathBuf::from(&config.path),
            mode: config.mode,
            min_free_space: config.min_free_space,
        }
    }

    /// The free-space threshold in effect for this branch.
    pub fn effective_min_free(&self, global_default: u64) -> u64 {
        self.min_free_space.unwrap_or(global_default)
    }

    /// Whether new entries may be placed on this branch, mode-wise.
    pub fn allows_create(&self) -> bool {
        self.mode == BranchMode::ReadWrite
    }
}

/// Immutable view of the branch list, valid for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSnapshot {
    /// Ordered branch list. Order is policy-significant.
    pub branches: Vec<Branch>,
    /// Global minimum free space for branches without an override.
    pub min_free_space: u64,
}

impl BranchSnapshot {
    pub fn from_config(config: &UnionConfig) -> BranchSnapshot {
        BranchSnapshot {
            branches: config.branches.iter().map(Branch::from_config).collect(),
            min_free_space: config.min_free_space,
        }
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

/// The live branch set. The only long-lived shared mutable state in the
/// engine.
#[derive(Debug)]
pub struct BranchSet {
    current: RwLock<Arc<BranchSnapshot>>,
}

impl BranchSet {
    pub fn new(snapshot: BranchSnapshot) -> BranchSet {
        BranchSet {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot. The read lock is held only for the clone of
    /// the `Arc`; branch-level I/O happens against the owned snapshot.
    pub fn snapshot(&self) -> Arc<BranchSnapshot> {
        self.current.read().clone()
    }

    /// Atomically install a new snapshot. In-flight snapshots held by
    /// concurrent operations remain valid.
    pub fn replace(&self, snapshot: BranchSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }
}
