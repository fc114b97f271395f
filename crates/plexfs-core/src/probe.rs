//! Filesystem probing behind a trait seam.
//!
//! Policies only ever ask three questions of a branch: does a path exist,
//! how much space is available, and when was an entry last modified.
//! Keeping those behind `FsProbe` lets policy tests run against fakes
//! instead of real mounts.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::SystemTime;

/// Branch-level filesystem queries used by policies and path resolution.
pub trait FsProbe: Send + Sync {
    /// Whether the path exists, without following a trailing symlink.
    fn exists(&self, path: &Path) -> bool;

    /// Bytes available to unprivileged users on the filesystem holding
    /// `path`.
    fn available_space(&self, path: &Path) -> io::Result<u64>;

    /// Modification time of the entry at `path`.
    fn mtime(&self, path: &Path) -> io::Result<SystemTime>;
}

/// `FsProbe` backed by real syscalls (`lstat`, `statvfs`).
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl FsProbe for RealFs {
    fn exists(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path).is_ok()
    }

    fn available_space(&self, path: &Path) -> io::Result<u64> {
        let cpath = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
        let rv = unsafe { libc::statvfs(cpath.as_ptr(), &mut stats) };
        if rv != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(stats.f_bavail as u64 * stats.f_frsize as u64)
    }

    fn mtime(&self, path: &Path) -> io::Result<SystemTime> {
        std::fs::symlink_metadata(path)?.modified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exists_on_real_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("present");
        std::fs::write(&file, b"x").unwrap();

        let probe = RealFs;
        assert!(probe.exists(dir.path()));
        assert!(probe.exists(&file));
        assert!(!probe.exists(&dir.path().join("absent")));
    }

    #[test]
    fn test_exists_sees_dangling_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("dangling");
        std::os::unix::fs::symlink("/nonexistent/target", &link).unwrap();

        // lstat semantics: the link itself exists
        assert!(RealFs.exists(&link));
    }

    #[test]
    fn test_available_space_nonzero_on_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let avail = RealFs.available_space(dir.path()).unwrap();
        assert!(avail > 0);
    }

    #[test]
    fn test_mtime_of_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();

        let mtime = RealFs.mtime(&file).unwrap();
        assert!(mtime <= SystemTime::now());
    }
}
