//! Branch selection, policy, and fan-out engine for the plexfs union
//! filesystem.
//!
//! Given a union-relative path, an operation, and the live branch set,
//! the engine decides which underlying branch(es) service the call and
//! how their individual results combine into one answer. Everything else
//! in the workspace is a thin wrapper around this crate.

pub mod branch;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod policy;
pub mod probe;
pub mod resolve;
pub mod ugid;
pub mod xattr;

pub use branch::{Branch, BranchSet, BranchSnapshot};
pub use engine::{GetxattrRoute, UnionEngine};
pub use error::{PolicyError, UnionError, XattrError};
pub use fanout::fan_out;
pub use probe::{FsProbe, RealFs};
pub use resolve::{find_all, parent_of, resolve, ResolvedPath};
pub use ugid::UgidGuard;
pub use xattr::{DiagAttr, XattrOut, XATTR_PREFIX};
