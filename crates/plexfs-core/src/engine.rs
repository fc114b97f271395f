//! The union engine: live configuration, the branch set, and the policy
//! entry points the FUSE layer calls.

use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use plexfs_config::{ConfigError, FuseOp, Policy, UnionConfig};

use crate::branch::{BranchSet, BranchSnapshot};
use crate::error::{PolicyError, UnionError, XattrError};
use crate::policy;
use crate::probe::{FsProbe, RealFs};
use crate::resolve::{self, ResolvedPath};
use crate::xattr::{self, DiagAttr, XattrOut};

/// Where a getxattr call should be answered from.
#[derive(Debug, PartialEq, Eq)]
pub enum GetxattrRoute {
    /// A control-entry or diagnostic value, read contract already applied.
    Value(XattrOut),
    /// Delegate to the native xattr call on this resolved path.
    Native(PathBuf),
}

/// Central engine state. One instance per mount, shared across callback
/// threads.
pub struct UnionEngine {
    config: RwLock<UnionConfig>,
    branch_set: BranchSet,
    probe: Arc<dyn FsProbe>,
}

impl UnionEngine {
    /// Build an engine from a validated configuration, probing branches
    /// with real syscalls.
    pub fn new(config: UnionConfig) -> Result<UnionEngine, ConfigError> {
        Self::with_probe(config, Arc::new(RealFs))
    }

    /// Build an engine with a custom filesystem probe.
    pub fn with_probe(
        config: UnionConfig,
        probe: Arc<dyn FsProbe>,
    ) -> Result<UnionEngine, ConfigError> {
        config.validate_or_err()?;
        let config = config.effective();
        let branch_set = BranchSet::new(BranchSnapshot::from_config(&config));
        info!(
            branches = config.branches.len(),
            control_file = %config.control_file,
            "union engine ready"
        );
        Ok(UnionEngine {
            config: RwLock::new(config),
            branch_set,
            probe,
        })
    }

    /// The control entry's union-relative path.
    pub fn control_file(&self) -> String {
        self.config.read().control_file.clone()
    }

    /// Whether `relpath` addresses the synthetic control entry.
    pub fn is_control(&self, relpath: &str) -> bool {
        self.config.read().control_file == relpath
    }

    /// Owned view of the current branch list.
    pub fn snapshot(&self) -> Arc<BranchSnapshot> {
        self.branch_set.snapshot()
    }

    /// The policy currently assigned to `op`.
    pub fn policy_for(&self, op: FuseOp) -> Policy {
        self.config.read().policy_for(op)
    }

    pub fn probe(&self) -> &dyn FsProbe {
        self.probe.as_ref()
    }

    /// Select the branch servicing a read/lookup-style operation.
    pub fn search(&self, op: FuseOp, relpath: &str) -> Result<ResolvedPath, PolicyError> {
        let policy = self.policy_for(op);
        let snapshot = self.snapshot();
        let chosen = policy::search(&snapshot, relpath, policy, self.probe.as_ref())?;
        debug!(op = %op, relpath, branch = %chosen.base.display(), "search");
        Ok(chosen)
    }

    /// Select the branch(es) a new entry should be created on.
    pub fn create_targets(
        &self,
        op: FuseOp,
        relpath: &str,
    ) -> Result<Vec<ResolvedPath>, PolicyError> {
        let policy = self.policy_for(op);
        let snapshot = self.snapshot();
        let targets = policy::create(&snapshot, relpath, policy, self.probe.as_ref())?;
        debug!(op = %op, relpath, targets = targets.len(), "create");
        Ok(targets)
    }

    /// Every branch holding `relpath`, for mutate-existing operations.
    pub fn action_targets(&self, relpath: &str) -> Result<Vec<ResolvedPath>, PolicyError> {
        let snapshot = self.snapshot();
        policy::action(&snapshot, relpath, self.probe.as_ref())
    }

    /// Every branch holding `relpath`; empty when it exists nowhere.
    pub fn find_all(&self, relpath: &str) -> Vec<ResolvedPath> {
        let snapshot = self.snapshot();
        resolve::find_all(&snapshot, relpath, self.probe.as_ref())
    }

    /// Route a getxattr call: control entry, diagnostic value, or native
    /// delegation to the search-selected branch.
    pub fn getxattr_route(
        &self,
        relpath: &str,
        attrname: &str,
        count: usize,
    ) -> Result<GetxattrRoute, UnionError> {
        if self.is_control(relpath) {
            let config = self.config.read();
            let out = xattr::control_getxattr(&config, attrname, count)?;
            return Ok(GetxattrRoute::Value(out));
        }

        let chosen = self.search(FuseOp::Getxattr, relpath)?;

        if xattr::in_namespace(attrname) {
            let diag = xattr::parse_diag(attrname).ok_or(XattrError::NoAttr)?;
            let value: Vec<u8> = match diag {
                DiagAttr::BasePath => chosen.base.as_os_str().as_bytes().to_vec(),
                DiagAttr::RelPath => relpath.as_bytes().to_vec(),
                DiagAttr::FullPath => chosen.full.as_os_str().as_bytes().to_vec(),
                DiagAttr::AllPaths => {
                    let paths: Vec<Vec<u8>> = self
                        .find_all(relpath)
                        .into_iter()
                        .map(|r| r.full.as_os_str().as_bytes().to_vec())
                        .collect();
                    paths.join(&0u8)
                }
            };
            let out = xattr::read_value(&value, count)?;
            return Ok(GetxattrRoute::Value(out));
        }

        Ok(GetxattrRoute::Native(chosen.full))
    }

    /// Apply a control-entry attribute write and reconfigure the live
    /// branch set. A failed write leaves configuration untouched.
    pub fn control_setxattr(&self, attrname: &str, value: &[u8]) -> Result<(), XattrError> {
        let mut config = self.config.write();
        let mut updated = config.clone();
        xattr::control_setxattr(&mut updated, attrname, value)?;
        updated
            .validate_or_err()
            .map_err(|e| XattrError::Invalid(e.to_string()))?;
        let updated = updated.effective();

        self.branch_set.replace(BranchSnapshot::from_config(&updated));
        info!(attr = attrname, "configuration updated");
        *config = updated;
        Ok(())
    }

    /// Attribute names the control entry lists.
    pub fn control_attr_names(&self) -> Vec<String> {
        xattr::control_attr_names()
    }

    /// Snapshot of the live configuration, for rendering (CLI status,
    /// tests).
    pub fn config(&self) -> UnionConfig {
        self.config.read().clone()
    }
}

impl std::fmt::Debug for UnionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnionEngine")
            .field("branches", &self.snapshot().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexfs_config::{BranchConfig, BranchMode};
    use tempfile::TempDir;

    fn engine_over(dirs: &[&TempDir]) -> UnionEngine {
        let config = UnionConfig {
            branches: dirs
                .iter()
                .map(|d| BranchConfig {
                    path: d.path().to_string_lossy().into_owned(),
                    mode: BranchMode::ReadWrite,
                    min_free_space: None,
                })
                .collect(),
            ..Default::default()
        };
        UnionEngine::new(config).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(UnionEngine::new(UnionConfig::default()).is_err());
    }

    #[test]
    fn test_search_and_action_against_real_branches() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(b.path().join("x"), b"hello").unwrap();

        let engine = engine_over(&[&a, &b]);

        let chosen = engine.search(FuseOp::Getattr, "/x").unwrap();
        assert_eq!(chosen.branch_index, 1);

        let targets = engine.action_targets("/x").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(
            engine.action_targets("/missing"),
            Err(PolicyError::NotFound)
        );
    }

    #[test]
    fn test_getxattr_routes_control_and_diag_and_native() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(a.path().join("f"), b"").unwrap();
        std::fs::write(b.path().join("f"), b"").unwrap();

        let engine = engine_over(&[&a, &b]);

        // control entry
        let route = engine
            .getxattr_route("/.plexfs", "user.plexfs.minfreespace", 0)
            .unwrap();
        assert_eq!(route, GetxattrRoute::Value(XattrOut::Size(1)));

        // diagnostic on an ordinary path
        let route = engine
            .getxattr_route("/f", "user.plexfs.fullpath", 4096)
            .unwrap();
        let expected = a.path().join("f");
        assert_eq!(
            route,
            GetxattrRoute::Value(XattrOut::Data(
                expected.as_os_str().as_bytes().to_vec()
            ))
        );

        // allpaths concatenates with NUL
        let route = engine
            .getxattr_route("/f", "user.plexfs.allpaths", 4096)
            .unwrap();
        match route {
            GetxattrRoute::Value(XattrOut::Data(d)) => {
                assert_eq!(d.iter().filter(|&&c| c == 0).count(), 1);
            }
            other => panic!("unexpected route {other:?}"),
        }

        // anything else delegates to the chosen branch
        let route = engine.getxattr_route("/f", "user.mime_type", 0).unwrap();
        assert_eq!(route, GetxattrRoute::Native(a.path().join("f")));
    }

    #[test]
    fn test_control_setxattr_swaps_branch_snapshot() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let engine = engine_over(&[&a]);
        assert_eq!(engine.snapshot().len(), 1);

        let value = format!(
            "{}=rw:{}=nc",
            a.path().to_string_lossy(),
            b.path().to_string_lossy()
        );
        engine
            .control_setxattr("user.plexfs.branches", value.as_bytes())
            .unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.branches[1].mode, BranchMode::NoCreate);
    }

    #[test]
    fn test_failed_reconfigure_leaves_state_untouched() {
        let a = tempfile::tempdir().unwrap();
        let engine = engine_over(&[&a]);
        let before = engine.config();

        // relative branch path fails validation
        let err = engine
            .control_setxattr("user.plexfs.branches", b"not-absolute=rw")
            .unwrap_err();
        assert!(matches!(err, XattrError::Invalid(_)));
        assert_eq!(engine.config(), before);
        assert_eq!(engine.snapshot().len(), 1);
    }

    #[test]
    fn test_policy_reassignment_is_live() {
        let a = tempfile::tempdir().unwrap();
        let engine = engine_over(&[&a]);
        assert_eq!(engine.policy_for(FuseOp::Create), Policy::MostFreeSpace);

        engine
            .control_setxattr("user.plexfs.func.create", b"random")
            .unwrap();
        assert_eq!(engine.policy_for(FuseOp::Create), Policy::Random);
    }
}
