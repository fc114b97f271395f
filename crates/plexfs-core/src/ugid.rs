//! Scoped caller impersonation.
//!
//! FUSE callbacks run in the daemon's identity; branch syscalls must run
//! as the calling process instead. The guard switches the effective
//! uid/gid on construction and restores the previous identity when
//! dropped, so every exit path, including early error returns, undoes the
//! switch.

use tracing::warn;

/// Effective uid/gid switch, restored on drop.
#[derive(Debug)]
pub struct UgidGuard {
    saved: Option<(libc::uid_t, libc::gid_t)>,
}

impl UgidGuard {
    /// Impersonate `uid`/`gid` for the current scope.
    ///
    /// Only effective when running as root; otherwise seteuid would fail
    /// anyway and the guard is a no-op. When either switch fails the
    /// original identity is kept and the guard does nothing on drop.
    pub fn set(uid: u32, gid: u32) -> UgidGuard {
        let euid = unsafe { libc::geteuid() };
        let egid = unsafe { libc::getegid() };
        if euid != 0 || (uid == euid && gid == egid) {
            return UgidGuard { saved: None };
        }

        // gid first: changing euid away from root would forfeit the
        // privilege needed for setegid.
        if unsafe { libc::setegid(gid as libc::gid_t) } != 0 {
            warn!(gid, "setegid failed: {}", std::io::Error::last_os_error());
            return UgidGuard { saved: None };
        }
        if unsafe { libc::seteuid(uid as libc::uid_t) } != 0 {
            warn!(uid, "seteuid failed: {}", std::io::Error::last_os_error());
            if unsafe { libc::setegid(egid) } != 0 {
                warn!(egid, "failed to restore egid: {}", std::io::Error::last_os_error());
            }
            return UgidGuard { saved: None };
        }
        UgidGuard {
            saved: Some((euid, egid)),
        }
    }
}

impl Drop for UgidGuard {
    fn drop(&mut self) {
        if let Some((uid, gid)) = self.saved.take() {
            // uid first: regain root before restoring the gid
            if unsafe { libc::seteuid(uid) } != 0 {
                warn!(uid, "failed to restore euid: {}", std::io::Error::last_os_error());
            }
            if unsafe { libc::setegid(gid) } != 0 {
                warn!(gid, "failed to restore egid: {}", std::io::Error::last_os_error());
            }
        }
    }
}
