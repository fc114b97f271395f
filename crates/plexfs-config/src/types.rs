use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access mode of a single branch.
///
/// The mode controls which operation categories a branch is eligible for:
/// `ReadWrite` branches take part in everything, `NoCreate` branches are
/// searched and acted on but never receive new entries, and `ReadOnly`
/// branches additionally refuse writes to existing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BranchMode {
    /// Full participation: search, create, and action.
    #[default]
    ReadWrite,
    /// Search only; never written to.
    ReadOnly,
    /// Search and action, but new entries are never placed here.
    NoCreate,
}

impl BranchMode {
    /// Short tag used in the colon-joined branch-list string
    /// (`/mnt/a=rw:/mnt/b=nc`).
    pub fn tag(&self) -> &'static str {
        match self {
            BranchMode::ReadWrite => "rw",
            BranchMode::ReadOnly => "ro",
            BranchMode::NoCreate => "nc",
        }
    }

    /// Parse a short tag, case-insensitive.
    pub fn from_tag(tag: &str) -> Option<BranchMode> {
        match tag.to_ascii_lowercase().as_str() {
            "rw" => Some(BranchMode::ReadWrite),
            "ro" => Some(BranchMode::ReadOnly),
            "nc" => Some(BranchMode::NoCreate),
            _ => None,
        }
    }
}

/// One branch entry in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchConfig {
    /// Absolute path to the underlying directory.
    pub path: String,
    /// Access mode. Defaults to read-write.
    #[serde(default)]
    pub mode: BranchMode,
    /// Per-branch minimum free space in bytes. Overrides the global
    /// `min_free_space` when present.
    #[serde(default)]
    pub min_free_space: Option<u64>,
}

impl BranchConfig {
    /// Render as `path=mode` for the branch-list string.
    pub fn to_entry(&self) -> String {
        format!("{}={}", self.path, self.mode.tag())
    }

    /// Parse one `path` or `path=mode` entry.
    pub fn from_entry(entry: &str) -> Option<BranchConfig> {
        let (path, mode) = match entry.rsplit_once('=') {
            Some((p, m)) => (p, BranchMode::from_tag(m)?),
            None => (entry, BranchMode::ReadWrite),
        };
        if path.is_empty() {
            return None;
        }
        Some(BranchConfig {
            path: path.to_string(),
            mode,
            min_free_space: None,
        })
    }
}

/// Render a branch list as a colon-joined `path=mode` string.
pub fn branches_to_string(branches: &[BranchConfig]) -> String {
    branches
        .iter()
        .map(BranchConfig::to_entry)
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse a colon-joined `path=mode` string into a branch list.
/// Returns `None` if any entry is malformed.
pub fn branches_from_string(s: &str) -> Option<Vec<BranchConfig>> {
    s.split(':')
        .filter(|e| !e.is_empty())
        .map(BranchConfig::from_entry)
        .collect()
}

/// Which selection semantics a filesystem operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Pick one branch that already contains the path.
    Search,
    /// Pick branch(es) to place a new entry on.
    Create,
    /// Act on every branch that contains the path.
    Action,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Search, Category::Create, Category::Action];

    pub fn name(&self) -> &'static str {
        match self {
            Category::Search => "search",
            Category::Create => "create",
            Category::Action => "action",
        }
    }

    pub fn from_name(name: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A branch-selection algorithm.
///
/// The set is closed: configuration parsing resolves policy names into this
/// enum once, so the hot path never does string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    /// First branch in set order that qualifies.
    FirstFound,
    /// Branch with the most available space.
    MostFreeSpace,
    /// Branch with the least available space.
    LeastFreeSpace,
    /// Uniform random choice among qualifying branches.
    Random,
    /// Branch holding the most recently modified copy. Search only.
    Newest,
    /// Create only: among branches already holding the parent directory,
    /// the one with the most available space.
    ExistingPath,
    /// Create only: every eligible branch.
    All,
    /// Action only: every branch containing the path.
    AllFound,
}

impl Policy {
    pub const ALL: [Policy; 8] = [
        Policy::FirstFound,
        Policy::MostFreeSpace,
        Policy::LeastFreeSpace,
        Policy::Random,
        Policy::Newest,
        Policy::ExistingPath,
        Policy::All,
        Policy::AllFound,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Policy::FirstFound => "first-found",
            Policy::MostFreeSpace => "most-free-space",
            Policy::LeastFreeSpace => "least-free-space",
            Policy::Random => "random",
            Policy::Newest => "newest",
            Policy::ExistingPath => "existing-path",
            Policy::All => "all",
            Policy::AllFound => "all-found",
        }
    }

    pub fn from_name(name: &str) -> Option<Policy> {
        Policy::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Whether this policy may be assigned to operations of `category`.
    pub fn valid_for(&self, category: Category) -> bool {
        match category {
            Category::Search => matches!(
                self,
                Policy::FirstFound
                    | Policy::MostFreeSpace
                    | Policy::LeastFreeSpace
                    | Policy::Random
                    | Policy::Newest
            ),
            Category::Create => matches!(
                self,
                Policy::FirstFound
                    | Policy::MostFreeSpace
                    | Policy::LeastFreeSpace
                    | Policy::Random
                    | Policy::ExistingPath
                    | Policy::All
            ),
            Category::Action => matches!(self, Policy::AllFound),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Policy::from_name(s).ok_or_else(|| format!("unknown policy '{s}'"))
    }
}

/// Every filesystem operation that routes through a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuseOp {
    Access,
    Chmod,
    Chown,
    Create,
    Getattr,
    Getxattr,
    Link,
    Listxattr,
    Mkdir,
    Mknod,
    Open,
    Readlink,
    Removexattr,
    Rename,
    Rmdir,
    Setxattr,
    Symlink,
    Truncate,
    Unlink,
    Utimens,
}

impl FuseOp {
    pub const ALL: [FuseOp; 20] = [
        FuseOp::Access,
        FuseOp::Chmod,
        FuseOp::Chown,
        FuseOp::Create,
        FuseOp::Getattr,
        FuseOp::Getxattr,
        FuseOp::Link,
        FuseOp::Listxattr,
        FuseOp::Mkdir,
        FuseOp::Mknod,
        FuseOp::Open,
        FuseOp::Readlink,
        FuseOp::Removexattr,
        FuseOp::Rename,
        FuseOp::Rmdir,
        FuseOp::Setxattr,
        FuseOp::Symlink,
        FuseOp::Truncate,
        FuseOp::Unlink,
        FuseOp::Utimens,
    ];

    /// The mapping from operation to category is static: an operation
    /// either reads an existing entry, places a new one, or mutates
    /// every extant copy.
    pub fn category(&self) -> Category {
        match self {
            FuseOp::Access
            | FuseOp::Getattr
            | FuseOp::Getxattr
            | FuseOp::Listxattr
            | FuseOp::Open
            | FuseOp::Readlink => Category::Search,
            FuseOp::Create | FuseOp::Mkdir | FuseOp::Mknod | FuseOp::Symlink => Category::Create,
            FuseOp::Chmod
            | FuseOp::Chown
            | FuseOp::Link
            | FuseOp::Removexattr
            | FuseOp::Rename
            | FuseOp::Rmdir
            | FuseOp::Setxattr
            | FuseOp::Truncate
            | FuseOp::Unlink
            | FuseOp::Utimens => Category::Action,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FuseOp::Access => "access",
            FuseOp::Chmod => "chmod",
            FuseOp::Chown => "chown",
            FuseOp::Create => "create",
            FuseOp::Getattr => "getattr",
            FuseOp::Getxattr => "getxattr",
            FuseOp::Link => "link",
            FuseOp::Listxattr => "listxattr",
            FuseOp::Mkdir => "mkdir",
            FuseOp::Mknod => "mknod",
            FuseOp::Open => "open",
            FuseOp::Readlink => "readlink",
            FuseOp::Removexattr => "removexattr",
            FuseOp::Rename => "rename",
            FuseOp::Rmdir => "rmdir",
            FuseOp::Setxattr => "setxattr",
            FuseOp::Symlink => "symlink",
            FuseOp::Truncate => "truncate",
            FuseOp::Unlink => "unlink",
            FuseOp::Utimens => "utimens",
        }
    }

    pub fn from_name(name: &str) -> Option<FuseOp> {
        FuseOp::ALL.into_iter().find(|op| op.name() == name)
    }
}

impl fmt::Display for FuseOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Top-level plexfs configuration, normally loaded from `plexfs.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionConfig {
    /// Ordered branch list. Order is policy-significant.
    pub branches: Vec<BranchConfig>,

    /// Global minimum free space in bytes a branch must have to accept
    /// new entries. Branches may override it individually.
    #[serde(default)]
    pub min_free_space: u64,

    /// Relative path of the synthetic control entry.
    #[serde(default = "default_control_file")]
    pub control_file: String,

    /// When a write hits ENOSPC, move the file to the create-eligible
    /// branch with the most free space and retry the write there.
    #[serde(default)]
    pub move_on_enospc: bool,

    /// Per-operation policy assignment. Unassigned operations fall back
    /// to their category default.
    #[serde(default)]
    pub policies: IndexMap<FuseOp, Policy>,
}

pub(crate) fn default_control_file() -> String {
    "/.plexfs".to_string()
}

impl Default for UnionConfig {
    fn default() -> Self {
        UnionConfig {
            branches: Vec::new(),
            min_free_space: 0,
            control_file: default_control_file(),
            move_on_enospc: false,
            policies: IndexMap::new(),
        }
    }
}
