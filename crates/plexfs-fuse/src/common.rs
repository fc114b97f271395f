//! The platform-neutral half of the FUSE surface.
//!
//! Every `do_*` method is a thin callback body: translate inode to union
//! path, impersonate the caller, ask the engine which branch(es) service
//! the call, perform the real syscalls, and map the outcome to an errno.
//! No selection logic lives here.

use std::collections::HashMap;
use std::ffi::CString;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{FileAttr, FileType, TimeOrNow};
use parking_lot::RwLock;
use tracing::debug;

use plexfs_config::{ConfigError, FuseOp, UnionConfig};
use plexfs_core::{
    fan_out, GetxattrRoute, PolicyError, ResolvedPath, UgidGuard, UnionEngine, UnionError,
    XattrError, XattrOut,
};

use crate::inode::{child_path, PathTable, ROOT_INO};

/// Attribute TTL handed to the kernel.
pub const TTL: Duration = Duration::from_secs(1);

/// An errno at the callback boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub i32);

impl From<io::Error> for Errno {
    fn from(e: io::Error) -> Self {
        Errno(e.raw_os_error().unwrap_or(libc::EIO))
    }
}

impl From<PolicyError> for Errno {
    fn from(e: PolicyError) -> Self {
        Errno(e.errno())
    }
}

impl From<XattrError> for Errno {
    fn from(e: XattrError) -> Self {
        Errno(e.errno())
    }
}

impl From<UnionError> for Errno {
    fn from(e: UnionError) -> Self {
        Errno(e.errno())
    }
}

pub type OpResult<T> = Result<T, Errno>;

/// Identity of the calling process, from the FUSE request context.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
}

impl Caller {
    /// The daemon's own identity; used by tests and mount-time probes.
    pub fn daemon() -> Caller {
        Caller {
            uid: unsafe { libc::geteuid() },
            gid: unsafe { libc::getegid() },
        }
    }
}

/// Attribute changes carried by a setattr callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetattrChanges {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<TimeOrNow>,
    pub mtime: Option<TimeOrNow>,
}

/// One readdir listing.
pub struct ReadDirResult {
    pub dir_ino: u64,
    pub parent_ino: u64,
    /// (ino, kind, name) triples, branch-merged and de-duplicated.
    pub entries: Vec<(u64, FileType, String)>,
}

/// Aggregated statfs numbers across branches.
pub struct StatfsResult {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// File handle value meaning "no pinned branch": the control entry, and
/// kernel calls that arrive without a preceding open.
pub const NO_FH: u64 = 0;

/// Core FUSE filesystem logic, shared by the `fuser` wrapper and tests.
pub struct PlexFsCore {
    pub engine: Arc<UnionEngine>,
    pub paths: PathTable,
    /// Open-file table: fh to the branch path pinned at open time, so
    /// every read/write on one descriptor hits the same copy.
    handles: RwLock<HashMap<u64, PathBuf>>,
    next_fh: AtomicU64,
}

impl PlexFsCore {
    pub fn from_config(config: UnionConfig) -> Result<PlexFsCore, ConfigError> {
        Ok(PlexFsCore {
            engine: Arc::new(UnionEngine::new(config)?),
            paths: PathTable::new(),
            handles: RwLock::new(HashMap::new()),
            next_fh: AtomicU64::new(NO_FH + 1),
        })
    }

    fn register_handle(&self, full: PathBuf) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.write().insert(fh, full);
        fh
    }

    fn handle_path(&self, fh: u64) -> Option<PathBuf> {
        self.handles.read().get(&fh).cloned()
    }

    fn rel_of(&self, ino: u64) -> OpResult<String> {
        self.paths.get_path(ino).ok_or(Errno(libc::ENOENT))
    }

    fn child_rel(&self, parent: u64, name: &str) -> OpResult<String> {
        let parent_path = self.rel_of(parent)?;
        Ok(child_path(&parent_path, name))
    }

    fn attr_for(&self, rel: &str, full: &Path) -> OpResult<FileAttr> {
        let md = std::fs::symlink_metadata(full)?;
        Ok(attr_from_metadata(self.paths.get_or_create(rel), &md))
    }

    /// Synthetic attributes for the control entry.
    fn control_attr(&self, rel: &str) -> FileAttr {
        let now = SystemTime::now();
        FileAttr {
            ino: self.paths.get_or_create(rel),
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileType::RegularFile,
            perm: 0o644,
            nlink: 1,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    pub fn do_lookup(&self, caller: Caller, parent: u64, name: &str) -> OpResult<FileAttr> {
        let rel = self.child_rel(parent, name)?;
        if self.engine.is_control(&rel) {
            return Ok(self.control_attr(&rel));
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);
        let chosen = self.engine.search(FuseOp::Getattr, &rel)?;
        self.attr_for(&rel, &chosen.full)
    }

    pub fn do_getattr(&self, caller: Caller, ino: u64) -> OpResult<FileAttr> {
        let rel = self.rel_of(ino)?;
        if self.engine.is_control(&rel) {
            return Ok(self.control_attr(&rel));
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);
        let chosen = self.engine.search(FuseOp::Getattr, &rel)?;
        self.attr_for(&rel, &chosen.full)
    }

    pub fn do_access(&self, caller: Caller, ino: u64) -> OpResult<()> {
        let rel = self.rel_of(ino)?;
        if self.engine.is_control(&rel) {
            return Ok(());
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);
        self.engine.search(FuseOp::Access, &rel)?;
        Ok(())
    }

    /// Merge directory listings across every branch holding the
    /// directory. First branch wins on duplicate names.
    pub fn do_readdir(&self, caller: Caller, ino: u64) -> OpResult<ReadDirResult> {
        let rel = self.rel_of(ino)?;
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let holders = self.engine.action_targets(&rel)?;
        let mut entries: Vec<(u64, FileType, String)> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut any_dir = false;

        for holder in &holders {
            let iter = match std::fs::read_dir(&holder.full) {
                Ok(iter) => {
                    any_dir = true;
                    iter
                }
                Err(_) => continue,
            };
            for entry in iter.flatten() {
                let name = match entry.file_name().into_string() {
                    Ok(n) => n,
                    Err(_) => continue,
                };
                if !seen.insert(name.clone()) {
                    continue;
                }
                let child = child_path(&rel, &name);
                let kind = entry
                    .file_type()
                    .map(filetype_of)
                    .unwrap_or(FileType::RegularFile);
                entries.push((self.paths.get_or_create(&child), kind, name));
            }
        }

        if !any_dir {
            return Err(Errno(libc::ENOTDIR));
        }

        let parent_ino = if ino == ROOT_INO {
            ROOT_INO
        } else {
            self.paths.get_or_create(plexfs_core::parent_of(&rel))
        };

        Ok(ReadDirResult {
            dir_ino: ino,
            parent_ino,
            entries,
        })
    }

    pub fn do_mkdir(&self, caller: Caller, parent: u64, name: &str, mode: u32) -> OpResult<FileAttr> {
        let rel = self.child_rel(parent, name)?;
        if self.engine.is_control(&rel) {
            return Err(Errno(libc::EEXIST));
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let targets = self.engine.create_targets(FuseOp::Mkdir, &rel)?;
        fan_out(&targets, |path| {
            std::fs::DirBuilder::new().mode(mode & 0o7777).create(path)
        })
        .map_err(Errno)?;

        self.attr_for(&rel, &targets[0].full)
    }

    pub fn do_create(&self, caller: Caller, parent: u64, name: &str, mode: u32) -> OpResult<FileAttr> {
        let rel = self.child_rel(parent, name)?;
        if self.engine.is_control(&rel) {
            return Err(Errno(libc::EEXIST));
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let targets = self.engine.create_targets(FuseOp::Create, &rel)?;
        fan_out(&targets, |path| {
            std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(mode & 0o7777)
                .open(path)
                .map(drop)
        })
        .map_err(Errno)?;

        self.attr_for(&rel, &targets[0].full)
    }

    pub fn do_mknod(
        &self,
        caller: Caller,
        parent: u64,
        name: &str,
        mode: u32,
    ) -> OpResult<FileAttr> {
        // Regular files only; device nodes stay with the real root fs.
        if mode & libc::S_IFMT != libc::S_IFREG {
            return Err(Errno(libc::EOPNOTSUPP));
        }
        self.do_create(caller, parent, name, mode & 0o7777)
    }

    pub fn do_symlink(
        &self,
        caller: Caller,
        parent: u64,
        name: &str,
        target: &Path,
    ) -> OpResult<FileAttr> {
        let rel = self.child_rel(parent, name)?;
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let targets = self.engine.create_targets(FuseOp::Symlink, &rel)?;
        fan_out(&targets, |path| std::os::unix::fs::symlink(target, path)).map_err(Errno)?;

        self.attr_for(&rel, &targets[0].full)
    }

    pub fn do_readlink(&self, caller: Caller, ino: u64) -> OpResult<Vec<u8>> {
        let rel = self.rel_of(ino)?;
        let _ugid = UgidGuard::set(caller.uid, caller.gid);
        let chosen = self.engine.search(FuseOp::Readlink, &rel)?;
        let target = std::fs::read_link(&chosen.full)?;
        Ok(target.as_os_str().as_bytes().to_vec())
    }

    pub fn do_unlink(&self, caller: Caller, parent: u64, name: &str) -> OpResult<()> {
        let rel = self.child_rel(parent, name)?;
        if self.engine.is_control(&rel) {
            return Err(Errno(libc::EPERM));
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let targets = self.engine.action_targets(&rel)?;
        fan_out(&targets, |path| std::fs::remove_file(path)).map_err(Errno)?;
        self.paths.forget_path(&rel);
        Ok(())
    }

    pub fn do_rmdir(&self, caller: Caller, parent: u64, name: &str) -> OpResult<()> {
        let rel = self.child_rel(parent, name)?;
        if self.engine.is_control(&rel) {
            return Err(Errno(libc::ENOTDIR));
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let targets = self.engine.action_targets(&rel)?;
        fan_out(&targets, |path| std::fs::remove_dir(path)).map_err(Errno)?;
        self.paths.forget_path(&rel);
        Ok(())
    }

    pub fn do_rename(
        &self,
        caller: Caller,
        parent: u64,
        name: &str,
        newparent: u64,
        newname: &str,
    ) -> OpResult<()> {
        let old_rel = self.child_rel(parent, name)?;
        let new_rel = self.child_rel(newparent, newname)?;
        if self.engine.is_control(&old_rel) || self.engine.is_control(&new_rel) {
            return Err(Errno(libc::EPERM));
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let targets = self.engine.action_targets(&old_rel)?;
        let new_by_old = rebase_targets(&targets, &new_rel);
        fan_out(&targets, |old_full| {
            std::fs::rename(old_full, &new_by_old[old_full])
        })
        .map_err(Errno)?;

        self.paths.forget_path(&new_rel);
        self.paths.rename_tree(&old_rel, &new_rel);
        Ok(())
    }

    pub fn do_link(
        &self,
        caller: Caller,
        ino: u64,
        newparent: u64,
        newname: &str,
    ) -> OpResult<FileAttr> {
        let rel = self.rel_of(ino)?;
        let new_rel = self.child_rel(newparent, newname)?;
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let targets = self.engine.action_targets(&rel)?;
        let new_by_old = rebase_targets(&targets, &new_rel);
        fan_out(&targets, |old_full| {
            std::fs::hard_link(old_full, &new_by_old[old_full])
        })
        .map_err(Errno)?;

        let chosen = self.engine.search(FuseOp::Getattr, &new_rel)?;
        self.attr_for(&new_rel, &chosen.full)
    }

    /// Resolve the path once at open time and pin it to a file handle,
    /// so every read and write on that handle hits the same branch copy.
    pub fn do_open(&self, caller: Caller, ino: u64) -> OpResult<u64> {
        let rel = self.rel_of(ino)?;
        if self.engine.is_control(&rel) {
            return Ok(NO_FH);
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let chosen = self.engine.search(FuseOp::Open, &rel)?;
        Ok(self.register_handle(chosen.full))
    }

    pub fn do_release(&self, fh: u64) {
        if fh != NO_FH {
            self.handles.write().remove(&fh);
        }
    }

    /// The branch copy backing an I/O call: the path pinned at open, or a
    /// fresh search when the kernel never opened the file (e.g. after a
    /// daemon restart invalidated the handle table).
    fn io_path(&self, fh: u64, rel: &str) -> OpResult<PathBuf> {
        if let Some(path) = self.handle_path(fh) {
            return Ok(path);
        }
        Ok(self.engine.search(FuseOp::Open, rel)?.full)
    }

    pub fn do_read(
        &self,
        caller: Caller,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
    ) -> OpResult<Vec<u8>> {
        let rel = self.rel_of(ino)?;
        if self.engine.is_control(&rel) {
            return Ok(Vec::new());
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let path = self.io_path(fh, &rel)?;
        let mut file = std::fs::File::open(&path)?;
        file.seek(SeekFrom::Start(offset.max(0) as u64))?;
        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        loop {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
            if filled == buf.len() {
                break;
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    pub fn do_write(
        &self,
        caller: Caller,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
    ) -> OpResult<u32> {
        let rel = self.rel_of(ino)?;
        if self.engine.is_control(&rel) {
            // configuration writes go through setxattr, not file content
            return Err(Errno(libc::EPERM));
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let path = self.io_path(fh, &rel)?;
        match write_at(&path, offset, data) {
            Ok(()) => Ok(data.len() as u32),
            Err(e)
                if e.raw_os_error() == Some(libc::ENOSPC)
                    && self.engine.config().move_on_enospc =>
            {
                let moved = self.relocate_for_space(&rel, &path)?;
                write_at(&moved, offset, data)?;
                if fh != NO_FH {
                    self.handles.write().insert(fh, moved);
                }
                Ok(data.len() as u32)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move the branch copy at `current` to the create-eligible branch
    /// with the most free space, so a write that hit ENOSPC can retry
    /// there.
    fn relocate_for_space(&self, rel: &str, current: &Path) -> OpResult<PathBuf> {
        let snapshot = self.engine.snapshot();
        let probe = self.engine.probe();
        let mut best: Option<(PathBuf, u64)> = None;
        for branch in snapshot.branches.iter().filter(|b| b.allows_create()) {
            let full = plexfs_core::resolve(&branch.path, rel);
            if full.as_path() == current {
                continue;
            }
            let avail = probe.available_space(&branch.path).unwrap_or(0);
            if best.as_ref().map_or(true, |(_, space)| avail > *space) {
                best = Some((full, avail));
            }
        }
        let (dest, _) = best.ok_or(Errno(libc::ENOSPC))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(current, &dest)?;
        std::fs::remove_file(current)?;
        debug!(
            from = %current.display(),
            to = %dest.display(),
            "moved file to a branch with free space"
        );
        Ok(dest)
    }

    pub fn do_setattr(&self, caller: Caller, ino: u64, changes: SetattrChanges) -> OpResult<FileAttr> {
        let rel = self.rel_of(ino)?;
        if self.engine.is_control(&rel) {
            return Ok(self.control_attr(&rel));
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let targets = self.engine.action_targets(&rel)?;

        if let Some(mode) = changes.mode {
            fan_out(&targets, |path| {
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
            })
            .map_err(Errno)?;
        }
        if changes.uid.is_some() || changes.gid.is_some() {
            let uid = changes.uid.map(|u| u as libc::uid_t).unwrap_or(u32::MAX);
            let gid = changes.gid.map(|g| g as libc::gid_t).unwrap_or(u32::MAX);
            fan_out(&targets, |path| lchown(path, uid, gid)).map_err(Errno)?;
        }
        if let Some(size) = changes.size {
            fan_out(&targets, |path| {
                std::fs::OpenOptions::new()
                    .write(true)
                    .open(path)?
                    .set_len(size)
            })
            .map_err(Errno)?;
        }
        if changes.atime.is_some() || changes.mtime.is_some() {
            let times = [
                timespec_of(changes.atime),
                timespec_of(changes.mtime),
            ];
            fan_out(&targets, |path| utimens(path, &times)).map_err(Errno)?;
        }

        let chosen = self.engine.search(FuseOp::Getattr, &rel)?;
        self.attr_for(&rel, &chosen.full)
    }

    pub fn do_statfs(&self) -> OpResult<StatfsResult> {
        let snapshot = self.engine.snapshot();
        let mut out = StatfsResult {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: 0,
            bsize: 0,
            namelen: u32::MAX,
            frsize: 0,
        };
        let mut seen_fsids = std::collections::HashSet::new();
        let mut raw = Vec::new();

        for branch in &snapshot.branches {
            let st = match statvfs(&branch.path) {
                Ok(st) => st,
                Err(e) => {
                    debug!(branch = %branch.path.display(), "statvfs failed: {e}");
                    continue;
                }
            };
            // two branches on one filesystem count once
            if !seen_fsids.insert(st.f_fsid) {
                continue;
            }
            out.frsize = out.frsize.max(st.f_frsize as u32);
            out.namelen = out.namelen.min(st.f_namemax as u32);
            raw.push(st);
        }

        if raw.is_empty() {
            return Err(Errno(libc::ENOENT));
        }

        let frsize = out.frsize.max(1) as u64;
        for st in raw {
            let scale = st.f_frsize as u64;
            out.blocks += st.f_blocks as u64 * scale / frsize;
            out.bfree += st.f_bfree as u64 * scale / frsize;
            out.bavail += st.f_bavail as u64 * scale / frsize;
            out.files += st.f_files as u64;
            out.ffree += st.f_ffree as u64;
        }
        out.bsize = out.frsize;
        Ok(out)
    }

    pub fn do_getxattr(&self, caller: Caller, ino: u64, name: &str, size: u32) -> OpResult<XattrOut> {
        let rel = self.rel_of(ino)?;
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        match self.engine.getxattr_route(&rel, name, size as usize)? {
            GetxattrRoute::Value(out) => Ok(out),
            GetxattrRoute::Native(full) => lgetxattr(&full, name, size as usize),
        }
    }

    pub fn do_setxattr(&self, caller: Caller, ino: u64, name: &str, value: &[u8]) -> OpResult<()> {
        let rel = self.rel_of(ino)?;
        if self.engine.is_control(&rel) {
            self.engine.control_setxattr(name, value)?;
            return Ok(());
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let targets = self.engine.action_targets(&rel)?;
        fan_out(&targets, |path| lsetxattr(path, name, value)).map_err(Errno)
    }

    pub fn do_removexattr(&self, caller: Caller, ino: u64, name: &str) -> OpResult<()> {
        let rel = self.rel_of(ino)?;
        if self.engine.is_control(&rel) {
            // control attributes are not removable
            return Err(Errno(libc::ENODATA));
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let targets = self.engine.action_targets(&rel)?;
        fan_out(&targets, |path| lremovexattr(path, name)).map_err(Errno)
    }

    pub fn do_listxattr(&self, caller: Caller, ino: u64, size: u32) -> OpResult<XattrOut> {
        let rel = self.rel_of(ino)?;
        if self.engine.is_control(&rel) {
            let mut joined = Vec::new();
            for name in self.engine.control_attr_names() {
                joined.extend_from_slice(name.as_bytes());
                joined.push(0);
            }
            return plexfs_core::xattr::read_value(&joined, size as usize).map_err(Errno::from);
        }
        let _ugid = UgidGuard::set(caller.uid, caller.gid);

        let chosen = self.engine.search(FuseOp::Listxattr, &rel)?;
        llistxattr(&chosen.full, size as usize)
    }
}

/// Map each action target's full path to the same relative path rebased
/// onto that target's branch.
fn rebase_targets(
    targets: &[ResolvedPath],
    new_rel: &str,
) -> std::collections::HashMap<std::path::PathBuf, std::path::PathBuf> {
    targets
        .iter()
        .map(|t| (t.full.clone(), plexfs_core::resolve(&t.base, new_rel)))
        .collect()
}

fn write_at(path: &Path, offset: i64, data: &[u8]) -> io::Result<()> {
    let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(offset.max(0) as u64))?;
    file.write_all(data)
}

fn filetype_of(ft: std::fs::FileType) -> FileType {
    use std::os::unix::fs::FileTypeExt;
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_fifo() {
        FileType::NamedPipe
    } else if ft.is_socket() {
        FileType::Socket
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_char_device() {
        FileType::CharDevice
    } else {
        FileType::RegularFile
    }
}

/// Translate real `lstat` results into the kernel's attribute struct.
pub fn attr_from_metadata(ino: u64, md: &std::fs::Metadata) -> FileAttr {
    FileAttr {
        ino,
        size: md.size(),
        blocks: md.blocks(),
        atime: systime(md.atime(), md.atime_nsec()),
        mtime: systime(md.mtime(), md.mtime_nsec()),
        ctime: systime(md.ctime(), md.ctime_nsec()),
        crtime: UNIX_EPOCH,
        kind: filetype_of(md.file_type()),
        perm: (md.mode() & 0o7777) as u16,
        nlink: md.nlink() as u32,
        uid: md.uid(),
        gid: md.gid(),
        rdev: md.rdev() as u32,
        blksize: md.blksize() as u32,
        flags: 0,
    }
}

fn systime(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs((-secs) as u64)
    }
}

fn timespec_of(t: Option<TimeOrNow>) -> libc::timespec {
    match t {
        None => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
        Some(TimeOrNow::Now) => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_NOW,
        },
        Some(TimeOrNow::SpecificTime(t)) => {
            let d = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
            libc::timespec {
                tv_sec: d.as_secs() as libc::time_t,
                tv_nsec: d.subsec_nanos() as _,
            }
        }
    }
}

fn cpath(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

fn lchown(path: &Path, uid: libc::uid_t, gid: libc::gid_t) -> io::Result<()> {
    let cpath = cpath(path)?;
    let rv = unsafe { libc::lchown(cpath.as_ptr(), uid, gid) };
    if rv != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn utimens(path: &Path, times: &[libc::timespec; 2]) -> io::Result<()> {
    let cpath = cpath(path)?;
    let rv = unsafe {
        libc::utimensat(
            libc::AT_FDCWD,
            cpath.as_ptr(),
            times.as_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    };
    if rv != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn statvfs(path: &Path) -> io::Result<libc::statvfs> {
    let cpath = cpath(path)?;
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    let rv = unsafe { libc::statvfs(cpath.as_ptr(), &mut st) };
    if rv != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(st)
}

fn lgetxattr(path: &Path, name: &str, size: usize) -> OpResult<XattrOut> {
    let cpath = cpath(path)?;
    let cname = CString::new(name).map_err(|_| Errno(libc::EINVAL))?;
    if size == 0 {
        let rv = unsafe { libc::lgetxattr(cpath.as_ptr(), cname.as_ptr(), std::ptr::null_mut(), 0) };
        if rv < 0 {
            return Err(io::Error::last_os_error().into());
        }
        return Ok(XattrOut::Size(rv as usize));
    }
    let mut buf = vec![0u8; size];
    let rv = unsafe {
        libc::lgetxattr(
            cpath.as_ptr(),
            cname.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            size,
        )
    };
    if rv < 0 {
        return Err(io::Error::last_os_error().into());
    }
    buf.truncate(rv as usize);
    Ok(XattrOut::Data(buf))
}

fn lsetxattr(path: &Path, name: &str, value: &[u8]) -> io::Result<()> {
    let cpath = cpath(path)?;
    let cname = CString::new(name).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    let rv = unsafe {
        libc::lsetxattr(
            cpath.as_ptr(),
            cname.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if rv != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn lremovexattr(path: &Path, name: &str) -> io::Result<()> {
    let cpath = cpath(path)?;
    let cname = CString::new(name).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    let rv = unsafe { libc::lremovexattr(cpath.as_ptr(), cname.as_ptr()) };
    if rv != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn llistxattr(path: &Path, size: usize) -> OpResult<XattrOut> {
    let cpath = cpath(path)?;
    if size == 0 {
        let rv = unsafe { libc::llistxattr(cpath.as_ptr(), std::ptr::null_mut(), 0) };
        if rv < 0 {
            return Err(io::Error::last_os_error().into());
        }
        return Ok(XattrOut::Size(rv as usize));
    }
    let mut buf = vec![0u8; size];
    let rv = unsafe { libc::llistxattr(cpath.as_ptr(), buf.as_mut_ptr() as *mut libc::c_char, size) };
    if rv < 0 {
        return Err(io::Error::last_os_error().into());
    }
    buf.truncate(rv as usize);
    Ok(XattrOut::Data(buf))
}
