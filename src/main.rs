use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fuser::MountOption;
use log::info;

use nufs::fuse::NufsFs;
use nufs::storage::FileBackedStorage;
use nufs::{Geometry, Nufs};

#[derive(Parser)]
struct Args {
    /// NUFS disk image, created and formatted if missing
    disk_file: PathBuf,
    /// FUSE mountpoint
    mountpoint: PathBuf,
    /// Number of blocks when formatting a new image
    #[arg(long, default_value_t = Geometry::default().num_blocks)]
    blocks: usize,
    /// Number of inodes when formatting a new image
    #[arg(long, default_value_t = Geometry::default().num_inodes)]
    inodes: usize,
    /// Mount read-only
    #[arg(long)]
    read_only: bool,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let geometry = Geometry {
        num_blocks: args.blocks,
        num_inodes: args.inodes,
    };

    let storage = FileBackedStorage::open_or_create(&args.disk_file, geometry.num_blocks)
        .context("unable to open disk file in read-write mode")?;
    let nufs = Nufs::open_or_format(storage, geometry)
        .with_context(|| format!("unable to load {}", args.disk_file.display()))?;

    let mut options = vec![MountOption::FSName("nufs".to_string())];
    if args.read_only {
        options.push(MountOption::RO);
    }

    info!("mounting {} at {}", args.disk_file.display(), args.mountpoint.display());
    fuser::mount2(NufsFs::new(nufs), &args.mountpoint, &options)
        .with_context(|| format!("unable to mount at {}", args.mountpoint.display()))?;

    Ok(())
}
