//! Mount command for the plexfs FUSE filesystem.

use std::path::PathBuf;

use plexfs_config::UnionConfig;
use tracing::info;

/// Mount arguments.
pub struct MountArgs {
    /// Mount point path.
    pub mountpoint: PathBuf,
    /// Allow access by other users.
    pub allow_other: bool,
}

/// Run the mount command. Blocks until the filesystem is unmounted.
pub fn run(config: UnionConfig, args: MountArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !args.mountpoint.exists() {
        std::fs::create_dir_all(&args.mountpoint)?;
    }

    info!(
        branches = config.branches.len(),
        mountpoint = %args.mountpoint.display(),
        "mounting union"
    );
    plexfs_fuse::mount(config, &args.mountpoint, args.allow_other)?;
    Ok(())
}
