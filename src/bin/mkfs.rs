use std::fs::File;
use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use log::info;

use nufs::disk_format::block::BLOCK_SIZE;
use nufs::storage::FileBackedStorage;
use nufs::{Geometry, Nufs};

#[derive(Parser)]
struct Args {
    /// NUFS disk image to create
    disk_file: PathBuf,
    /// Number of blocks in the volume
    #[arg(long, default_value_t = Geometry::default().num_blocks)]
    blocks: usize,
    /// Number of inodes in the volume
    #[arg(long, default_value_t = Geometry::default().num_inodes)]
    inodes: usize,
    /// Overwrite an existing image
    #[arg(long, short)]
    force: bool,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let geometry = Geometry {
        num_blocks: args.blocks,
        num_inodes: args.inodes,
    };
    ensure!(geometry.is_valid(), "unusable geometry: {geometry:?}");

    let disk_file = File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(args.force)
        .create_new(!args.force)
        .open(&args.disk_file)
        .with_context(|| format!("unable to create {}", args.disk_file.display()))?;
    disk_file
        .set_len((geometry.num_blocks * BLOCK_SIZE) as u64)
        .context("sizing disk file")?;

    let storage = FileBackedStorage::new(disk_file)?;
    let mut nufs = Nufs::format(storage, geometry)?;
    nufs.sync()?;

    info!("wrote {}", args.disk_file.display());

    Ok(())
}
