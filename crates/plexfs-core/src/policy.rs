//! Branch-selection policies.
//!
//! Three entry points, one per category. Search picks a single branch that
//! already contains the path, Create picks where new entries land, and
//! Action returns every branch holding the path so mutations apply
//! uniformly. All take an owned snapshot; nothing here holds the branch
//! set lock across I/O.

use rand::Rng;

use plexfs_config::Policy;

use crate::branch::BranchSnapshot;
use crate::error::PolicyError;
use crate::probe::FsProbe;
use crate::resolve::{find_all, parent_of, resolve, ResolvedPath};

/// Select one branch containing `relpath` for a read/lookup-style
/// operation.
pub fn search(
    snapshot: &BranchSnapshot,
    relpath: &str,
    policy: Policy,
    probe: &dyn FsProbe,
) -> Result<ResolvedPath, PolicyError> {
    let mut candidates = find_all(snapshot, relpath, probe);
    if candidates.is_empty() {
        return Err(PolicyError::NotFound);
    }

    let chosen = match policy {
        Policy::FirstFound => 0,
        Policy::MostFreeSpace => rank_by_space(&candidates, snapshot, probe, true),
        Policy::LeastFreeSpace => rank_by_space(&candidates, snapshot, probe, false),
        Policy::Random => rand::thread_rng().gen_range(0..candidates.len()),
        Policy::Newest => rank_by_mtime(&candidates, probe),
        // Create/action rankings never reach here; assignments are
        // validated against the operation's category at config load.
        Policy::ExistingPath | Policy::All | Policy::AllFound => 0,
    };

    // chosen is always a valid position within candidates
    Ok(candidates.swap_remove(chosen))
}

/// Select the branch(es) a new entry should be created on.
pub fn create(
    snapshot: &BranchSnapshot,
    relpath: &str,
    policy: Policy,
    probe: &dyn FsProbe,
) -> Result<Vec<ResolvedPath>, PolicyError> {
    let chosen: Vec<usize> = match policy {
        Policy::ExistingPath => {
            // Conservative reading: the *parent directory* of the new
            // path must preexist on a candidate branch.
            let parent = parent_of(relpath);
            let containing: Vec<usize> = find_all(snapshot, parent, probe)
                .into_iter()
                .map(|r| r.branch_index)
                .collect();
            if containing.is_empty() {
                return Err(PolicyError::NotFound);
            }
            let eligible = filter_eligible(snapshot, &containing, probe)?;
            vec![pick_max_space(&eligible)]
        }
        _ => {
            let all: Vec<usize> = (0..snapshot.len()).collect();
            let eligible = filter_eligible(snapshot, &all, probe)?;
            match policy {
                Policy::FirstFound => vec![eligible[0].0],
                Policy::MostFreeSpace => vec![pick_max_space(&eligible)],
                Policy::LeastFreeSpace => vec![pick_min_space(&eligible)],
                Policy::Random => {
                    let i = rand::thread_rng().gen_range(0..eligible.len());
                    vec![eligible[i].0]
                }
                Policy::All => eligible.iter().map(|&(i, _)| i).collect(),
                // Search/action rankings; unreachable after validation
                _ => vec![eligible[0].0],
            }
        }
    };

    Ok(chosen
        .into_iter()
        .map(|i| ResolvedPath {
            branch_index: i,
            base: snapshot.branches[i].path.clone(),
            full: resolve(&snapshot.branches[i].path, relpath),
        })
        .collect())
}

/// Every branch containing `relpath`, for operations that must apply to
/// all extant copies.
pub fn action(
    snapshot: &BranchSnapshot,
    relpath: &str,
    probe: &dyn FsProbe,
) -> Result<Vec<ResolvedPath>, PolicyError> {
    let found = find_all(snapshot, relpath, probe);
    if found.is_empty() {
        return Err(PolicyError::NotFound);
    }
    Ok(found)
}

/// Filter `candidates` (branch indices) down to create-eligible branches,
/// pairing each survivor with its available space. An empty result is an
/// error that reflects why the last candidates were eliminated: space
/// pruning reports `NoSpace`, otherwise mode pruning reports `ReadOnly`.
fn filter_eligible(
    snapshot: &BranchSnapshot,
    candidates: &[usize],
    probe: &dyn FsProbe,
) -> Result<Vec<(usize, u64)>, PolicyError> {
    let mut eligible = Vec::with_capacity(candidates.len());
    let mut space_pruned = false;

    for &i in candidates {
        let branch = &snapshot.branches[i];
        if !branch.allows_create() {
            continue;
        }
        let avail = probe.available_space(&branch.path).unwrap_or(0);
        if avail < branch.effective_min_free(snapshot.min_free_space) {
            space_pruned = true;
            continue;
        }
        eligible.push((i, avail));
    }

    if eligible.is_empty() {
        if space_pruned {
            Err(PolicyError::NoSpace)
        } else {
            Err(PolicyError::ReadOnly)
        }
    } else {
        Ok(eligible)
    }
}

/// Index of the eligible branch with the most space; ties keep set order.
fn pick_max_space(eligible: &[(usize, u64)]) -> usize {
    let mut best = eligible[0];
    for &(i, avail) in &eligible[1..] {
        if avail > best.1 {
            best = (i, avail);
        }
    }
    best.0
}

/// Index of the eligible branch with the least space; ties keep set order.
fn pick_min_space(eligible: &[(usize, u64)]) -> usize {
    let mut best = eligible[0];
    for &(i, avail) in &eligible[1..] {
        if avail < best.1 {
            best = (i, avail);
        }
    }
    best.0
}

/// Position within `candidates` of the branch with the most (or least)
/// available space; ties keep set order.
fn rank_by_space(
    candidates: &[ResolvedPath],
    snapshot: &BranchSnapshot,
    probe: &dyn FsProbe,
    most: bool,
) -> usize {
    let mut best_pos = 0;
    let mut best_avail = probe
        .available_space(&snapshot.branches[candidates[0].branch_index].path)
        .unwrap_or(0);
    for (pos, cand) in candidates.iter().enumerate().skip(1) {
        let avail = probe
            .available_space(&snapshot.branches[cand.branch_index].path)
            .unwrap_or(0);
        let better = if most {
            avail > best_avail
        } else {
            avail < best_avail
        };
        if better {
            best_pos = pos;
            best_avail = avail;
        }
    }
    best_pos
}

/// Position within `candidates` of the most recently modified copy.
fn rank_by_mtime(candidates: &[ResolvedPath], probe: &dyn FsProbe) -> usize {
    let mut best_pos = 0;
    let mut best_mtime = probe
        .mtime(&candidates[0].full)
        .unwrap_or(std::time::UNIX_EPOCH);
    for (pos, cand) in candidates.iter().enumerate().skip(1) {
        let mtime = probe.mtime(&cand.full).unwrap_or(std::time::UNIX_EPOCH);
        if mtime > best_mtime {
            best_pos = pos;
            best_mtime = mtime;
        }
    }
    best_pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::Branch;
    use plexfs_config::BranchMode;
    use std::collections::{HashMap, HashSet};
    use std::io;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    /// In-memory stand-in for branch filesystems.
    #[derive(Default)]
    struct FakeProbe {
        present: HashSet<PathBuf>,
        space: HashMap<PathBuf, u64>,
        mtimes: HashMap<PathBuf, SystemTime>,
    }

    impl FakeProbe {
        fn with_file(mut self, path: &str) -> Self {
            self.present.insert(PathBuf::from(path));
            self
        }

        fn with_space(mut self, base: &str, avail: u64) -> Self {
            self.space.insert(PathBuf::from(base), avail);
            self
        }

        fn with_mtime(mut self, path: &str, secs: u64) -> Self {
            self.mtimes
                .insert(PathBuf::from(path), UNIX_EPOCH + Duration::from_secs(secs));
            self
        }
    }

    impl FsProbe for FakeProbe {
        fn exists(&self, path: &Path) -> bool {
            self.present.contains(path)
        }

        fn available_space(&self, path: &Path) -> io::Result<u64> {
            Ok(self.space.get(path).copied().unwrap_or(u64::MAX))
        }

        fn mtime(&self, path: &Path) -> io::Result<SystemTime> {
            self.mtimes
                .get(path)
                .copied()
                .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
        }
    }

    fn snapshot(modes: &[(&str, BranchMode)]) -> BranchSnapshot {
        BranchSnapshot {
            branches: modes
                .iter()
                .map(|(p, m)| Branch {
                    path: PathBuf::from(p),
                    mode: *m,
                    min_free_space: None,
                })
                .collect(),
            min_free_space: 0,
        }
    }

    fn rw(paths: &[&str]) -> BranchSnapshot {
        snapshot(
            &paths
                .iter()
                .map(|p| (*p, BranchMode::ReadWrite))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_search_first_found_skips_non_containing() {
        // branches [A(RW), B(RW), C(RO)], /x exists in B and C only
        let snap = snapshot(&[
            ("/a", BranchMode::ReadWrite),
            ("/b", BranchMode::ReadWrite),
            ("/c", BranchMode::ReadOnly),
        ]);
        let probe = FakeProbe::default().with_file("/b/x").with_file("/c/x");

        let chosen = search(&snap, "/x", Policy::FirstFound, &probe).unwrap();
        assert_eq!(chosen.branch_index, 1);
        assert_eq!(chosen.full, PathBuf::from("/b/x"));
    }

    #[test]
    fn test_search_not_found_iff_find_all_empty() {
        let snap = rw(&["/a", "/b"]);
        let probe = FakeProbe::default();
        assert!(find_all(&snap, "/x", &probe).is_empty());
        assert_eq!(
            search(&snap, "/x", Policy::FirstFound, &probe),
            Err(PolicyError::NotFound)
        );
    }

    #[test]
    fn test_search_chosen_branch_always_contains_path() {
        let snap = rw(&["/a", "/b", "/c"]);
        let probe = FakeProbe::default().with_file("/a/x").with_file("/c/x");

        for policy in [
            Policy::FirstFound,
            Policy::MostFreeSpace,
            Policy::LeastFreeSpace,
            Policy::Random,
            Policy::Newest,
        ] {
            let chosen = search(&snap, "/x", policy, &probe).unwrap();
            let containing: Vec<usize> = find_all(&snap, "/x", &probe)
                .into_iter()
                .map(|r| r.branch_index)
                .collect();
            assert!(containing.contains(&chosen.branch_index), "{policy}");
        }
    }

    #[test]
    fn test_search_most_free_space_ranks_containing_only() {
        let snap = rw(&["/a", "/b", "/c"]);
        let probe = FakeProbe::default()
            .with_file("/a/x")
            .with_file("/c/x")
            .with_space("/a", 100)
            .with_space("/b", 10_000) // does not contain /x
            .with_space("/c", 500);

        let chosen = search(&snap, "/x", Policy::MostFreeSpace, &probe).unwrap();
        assert_eq!(chosen.branch_index, 2);

        let chosen = search(&snap, "/x", Policy::LeastFreeSpace, &probe).unwrap();
        assert_eq!(chosen.branch_index, 0);
    }

    #[test]
    fn test_search_space_tie_keeps_branch_order() {
        let snap = rw(&["/a", "/b"]);
        let probe = FakeProbe::default()
            .with_file("/a/x")
            .with_file("/b/x")
            .with_space("/a", 500)
            .with_space("/b", 500);

        let chosen = search(&snap, "/x", Policy::MostFreeSpace, &probe).unwrap();
        assert_eq!(chosen.branch_index, 0);
    }

    #[test]
    fn test_search_newest_picks_latest_mtime() {
        let snap = rw(&["/a", "/b", "/c"]);
        let probe = FakeProbe::default()
            .with_file("/a/x")
            .with_file("/b/x")
            .with_file("/c/x")
            .with_mtime("/a/x", 100)
            .with_mtime("/b/x", 300)
            .with_mtime("/c/x", 200);

        let chosen = search(&snap, "/x", Policy::Newest, &probe).unwrap();
        assert_eq!(chosen.branch_index, 1);
    }

    #[test]
    fn test_create_excludes_readonly_and_nocreate() {
        let snap = snapshot(&[
            ("/a", BranchMode::ReadOnly),
            ("/b", BranchMode::NoCreate),
            ("/c", BranchMode::ReadWrite),
        ]);
        let probe = FakeProbe::default();

        for policy in [
            Policy::FirstFound,
            Policy::MostFreeSpace,
            Policy::LeastFreeSpace,
            Policy::Random,
            Policy::All,
        ] {
            let targets = create(&snap, "/new", policy, &probe).unwrap();
            assert!(
                targets.iter().all(|t| t.branch_index == 2),
                "{policy} leaked an ineligible branch"
            );
        }
    }

    #[test]
    fn test_create_all_readonly_reports_mode_error() {
        let snap = snapshot(&[
            ("/a", BranchMode::ReadOnly),
            ("/b", BranchMode::ReadOnly),
        ]);
        let probe = FakeProbe::default();
        assert_eq!(
            create(&snap, "/new", Policy::MostFreeSpace, &probe),
            Err(PolicyError::ReadOnly)
        );
    }

    #[test]
    fn test_create_below_threshold_reports_no_space() {
        let mut snap = rw(&["/a", "/b"]);
        snap.min_free_space = 1_000;
        let probe = FakeProbe::default()
            .with_space("/a", 100)
            .with_space("/b", 999);

        assert_eq!(
            create(&snap, "/new", Policy::MostFreeSpace, &probe),
            Err(PolicyError::NoSpace)
        );
    }

    #[test]
    fn test_create_branch_override_beats_global_threshold() {
        let mut snap = rw(&["/a", "/b"]);
        snap.min_free_space = 1_000;
        snap.branches[0].min_free_space = Some(50);
        let probe = FakeProbe::default()
            .with_space("/a", 100) // above its own 50
            .with_space("/b", 100); // below global 1000

        let targets = create(&snap, "/new", Policy::All, &probe).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].branch_index, 0);
    }

    #[test]
    fn test_create_most_free_space_picks_biggest() {
        let snap = rw(&["/a", "/b", "/c"]);
        let probe = FakeProbe::default()
            .with_space("/a", 100)
            .with_space("/b", 900)
            .with_space("/c", 500);

        let targets = create(&snap, "/new", Policy::MostFreeSpace, &probe).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].branch_index, 1);
        assert_eq!(targets[0].full, PathBuf::from("/b/new"));
    }

    #[test]
    fn test_create_all_returns_every_eligible_in_order() {
        let snap = snapshot(&[
            ("/a", BranchMode::ReadWrite),
            ("/b", BranchMode::ReadOnly),
            ("/c", BranchMode::ReadWrite),
        ]);
        let probe = FakeProbe::default();

        let targets = create(&snap, "/new", Policy::All, &probe).unwrap();
        let indices: Vec<usize> = targets.iter().map(|t| t.branch_index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_create_existing_path_requires_parent() {
        let snap = rw(&["/a", "/b"]);
        // parent /dir exists only on /b
        let probe = FakeProbe::default()
            .with_file("/b/dir")
            .with_space("/a", 10_000)
            .with_space("/b", 100);

        let targets = create(&snap, "/dir/new", Policy::ExistingPath, &probe).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].branch_index, 1);
        assert_eq!(targets[0].full, PathBuf::from("/b/dir/new"));
    }

    #[test]
    fn test_create_existing_path_missing_parent_is_not_found() {
        let snap = rw(&["/a", "/b"]);
        let probe = FakeProbe::default();
        assert_eq!(
            create(&snap, "/dir/new", Policy::ExistingPath, &probe),
            Err(PolicyError::NotFound)
        );
    }

    #[test]
    fn test_create_existing_path_parent_on_ineligible_branch() {
        let snap = snapshot(&[
            ("/a", BranchMode::ReadOnly),
            ("/b", BranchMode::ReadWrite),
        ]);
        // parent exists, but only on the read-only branch
        let probe = FakeProbe::default().with_file("/a/dir");
        assert_eq!(
            create(&snap, "/dir/new", Policy::ExistingPath, &probe),
            Err(PolicyError::ReadOnly)
        );
    }

    #[test]
    fn test_action_set_equals_find_all() {
        let snap = rw(&["/a", "/b", "/c"]);
        let probe = FakeProbe::default().with_file("/a/x").with_file("/c/x");

        let acted = action(&snap, "/x", &probe).unwrap();
        assert_eq!(acted, find_all(&snap, "/x", &probe));
        assert_eq!(acted.len(), 2);
        assert_eq!(acted[0].branch_index, 0);
        assert_eq!(acted[1].branch_index, 2);
    }

    #[test]
    fn test_action_empty_is_not_found() {
        let snap = rw(&["/a"]);
        let probe = FakeProbe::default();
        assert_eq!(action(&snap, "/x", &probe), Err(PolicyError::NotFound));
    }

    #[test]
    fn test_random_search_is_uniformly_among_containing() {
        let snap = rw(&["/a", "/b", "/c"]);
        let probe = FakeProbe::default().with_file("/a/x").with_file("/b/x");

        let mut seen = HashSet::new();
        for _ in 0..64 {
            let chosen = search(&snap, "/x", Policy::Random, &probe).unwrap();
            assert!(chosen.branch_index < 2);
            seen.insert(chosen.branch_index);
        }
        // With 64 draws over two branches, both show up in practice.
        assert_eq!(seen.len(), 2);
    }
}
