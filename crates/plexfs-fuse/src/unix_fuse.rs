//! `fuser` bindings: unpack each kernel request, call into
//! [`PlexFsCore`], and translate the outcome back into a reply.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use fuser::{
    FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use tracing::{debug, error, info};

use plexfs_config::{ConfigError, UnionConfig};
use plexfs_core::XattrOut;

use crate::common::{Caller, Errno, PlexFsCore, SetattrChanges, TTL};

/// Failure to bring a mount up.
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Unix FUSE filesystem wrapper around [`PlexFsCore`].
pub struct UnixFuse(pub PlexFsCore);

fn caller(req: &Request<'_>) -> Caller {
    Caller {
        uid: req.uid(),
        gid: req.gid(),
    }
}

fn name_or_einval(name: &OsStr) -> Result<&str, Errno> {
    name.to_str().ok_or(Errno(libc::EINVAL))
}

fn reply_xattr(out: XattrOut, reply: ReplyXattr) {
    match out {
        XattrOut::Size(n) => reply.size(n as u32),
        XattrOut::Data(d) => reply.data(&d),
    }
}

impl Filesystem for UnixFuse {
    fn lookup(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let result = name_or_einval(name)
            .and_then(|name| self.0.do_lookup(caller(req), parent, name));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn getattr(&mut self, req: &Request, ino: u64, reply: ReplyAttr) {
        match self.0.do_getattr(caller(req), ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn readlink(&mut self, req: &Request, ino: u64, reply: ReplyData) {
        match self.0.do_readlink(caller(req), ino) {
            Ok(target) => reply.data(&target),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn mknod(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let result = name_or_einval(name)
            .and_then(|name| self.0.do_mknod(caller(req), parent, name, mode));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(Errno(e)) => {
                error!("mknod failed: errno={e}");
                reply.error(e);
            }
        }
    }

    fn mkdir(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let result = name_or_einval(name)
            .and_then(|name| self.0.do_mkdir(caller(req), parent, name, mode));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(Errno(e)) => {
                error!("mkdir failed: errno={e}");
                reply.error(e);
            }
        }
    }

    fn unlink(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = name_or_einval(name)
            .and_then(|name| self.0.do_unlink(caller(req), parent, name));
        match result {
            Ok(()) => reply.ok(),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn rmdir(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = name_or_einval(name)
            .and_then(|name| self.0.do_rmdir(caller(req), parent, name));
        match result {
            Ok(()) => reply.ok(),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn symlink(
        &mut self,
        req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let result = name_or_einval(link_name)
            .and_then(|name| self.0.do_symlink(caller(req), parent, name, target));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn rename(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let result = name_or_einval(name).and_then(|name| {
            let newname = name_or_einval(newname)?;
            self.0.do_rename(caller(req), parent, name, newparent, newname)
        });
        match result {
            Ok(()) => reply.ok(),
            Err(Errno(e)) => {
                error!("rename failed: errno={e}");
                reply.error(e);
            }
        }
    }

    fn link(
        &mut self,
        req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let result = name_or_einval(newname)
            .and_then(|name| self.0.do_link(caller(req), ino, newparent, name));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn open(&mut self, req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.0.do_open(caller(req), ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.0.do_release(fh);
        reply.ok();
    }

    fn opendir(&mut self, req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.0.do_access(caller(req), ino) {
            Ok(()) => reply.opened(0, 0),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn read(
        &mut self,
        req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!(ino, fh, offset, size, "read");
        match self.0.do_read(caller(req), ino, fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn write(
        &mut self,
        req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(ino, fh, offset, size = data.len(), "write");
        match self.0.do_write(caller(req), ino, fh, offset, data) {
            Ok(written) => reply.written(written),
            Err(Errno(e)) => {
                error!("write failed: errno={e}");
                reply.error(e);
            }
        }
    }

    fn readdir(
        &mut self,
        req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!(ino, offset, "readdir");
        let listing = match self.0.do_readdir(caller(req), ino) {
            Ok(listing) => listing,
            Err(Errno(e)) => {
                reply.error(e);
                return;
            }
        };

        let dots = [
            (listing.dir_ino, FileType::Directory, ".".to_string()),
            (listing.parent_ino, FileType::Directory, "..".to_string()),
        ];
        let entries = dots.into_iter().chain(listing.entries);
        for (i, (ino, kind, name)) in entries.enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let result = name_or_einval(name)
            .and_then(|name| self.0.do_create(caller(req), parent, name, mode))
            .and_then(|attr| Ok((attr, self.0.do_open(caller(req), attr.ino)?)));
        match result {
            Ok((attr, fh)) => reply.created(&TTL, &attr, 0, fh, 0),
            Err(Errno(e)) => {
                error!("create failed: errno={e}");
                reply.error(e);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let changes = SetattrChanges {
            mode,
            uid,
            gid,
            size,
            atime,
            mtime,
        };
        match self.0.do_setattr(caller(req), ino, changes) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn getxattr(&mut self, req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let result = name_or_einval(name)
            .and_then(|name| self.0.do_getxattr(caller(req), ino, name, size));
        match result {
            Ok(out) => reply_xattr(out, reply),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn setxattr(
        &mut self,
        req: &Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let result = name_or_einval(name)
            .and_then(|name| self.0.do_setxattr(caller(req), ino, name, value));
        match result {
            Ok(()) => reply.ok(),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn listxattr(&mut self, req: &Request, ino: u64, size: u32, reply: ReplyXattr) {
        match self.0.do_listxattr(caller(req), ino, size) {
            Ok(out) => reply_xattr(out, reply),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn removexattr(&mut self, req: &Request, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = name_or_einval(name)
            .and_then(|name| self.0.do_removexattr(caller(req), ino, name));
        match result {
            Ok(()) => reply.ok(),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        match self.0.do_statfs() {
            Ok(st) => reply.statfs(
                st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen,
                st.frsize,
            ),
            Err(Errno(e)) => reply.error(e),
        }
    }

    fn access(&mut self, req: &Request, ino: u64, _mask: i32, reply: ReplyEmpty) {
        match self.0.do_access(caller(req), ino) {
            Ok(()) => reply.ok(),
            Err(Errno(e)) => reply.error(e),
        }
    }
}

/// Mount a union over `mountpoint` and serve until unmounted.
pub fn mount(config: UnionConfig, mountpoint: &Path, allow_other: bool) -> Result<(), MountError> {
    let core = PlexFsCore::from_config(config)?;
    let mut options = vec![
        MountOption::FSName("plexfs".to_string()),
        MountOption::DefaultPermissions,
    ];
    if allow_other {
        options.push(MountOption::AllowOther);
    }
    info!(mountpoint = %mountpoint.display(), "mounting");
    fuser::mount2(UnixFuse(core), mountpoint, &options)?;
    Ok(())
}
