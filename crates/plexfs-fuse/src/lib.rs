//! FUSE surface of the plexfs union filesystem.
//!
//! Splits into three layers: `inode` maps kernel inode numbers to
//! union-relative paths, `common` holds the platform-neutral operation
//! bodies, and `unix_fuse` adapts them to the `fuser` callback API.

pub mod common;
pub mod inode;
pub mod unix_fuse;

pub use common::{Caller, Errno, PlexFsCore, SetattrChanges, NO_FH};
pub use inode::{PathTable, ROOT_INO};
pub use unix_fuse::{mount, MountError, UnixFuse};
