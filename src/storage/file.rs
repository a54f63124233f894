use std::fs::File;
use std::os::linux::fs::MetadataExt;
use std::os::unix::prelude::FileExt;
use std::path::Path;

use anyhow::{ensure, Context, Result};

use crate::disk_format::block::{Block, BlockNumber, BLOCK_SIZE};
use crate::metadata::OwnershipMetadata;

use super::nufs_storage::NufsStorage;

/// Blocks stored back to back in an image file.
pub struct FileBackedStorage {
    file: File,
    num_blocks: usize,
}

impl FileBackedStorage {
    /// Wraps an existing image. The file length decides the number of blocks.
    pub fn new(file: File) -> Result<Self> {
        let len = file.metadata().context("reading image metadata")?.len() as usize;
        ensure!(
            len % BLOCK_SIZE == 0,
            "image size {len} is not a multiple of the block size"
        );

        Ok(FileBackedStorage {
            file,
            num_blocks: len / BLOCK_SIZE,
        })
    }

    /// Opens the image at `path`, creating it with `num_blocks` zeroed blocks if it does not
    /// exist yet.
    pub fn open_or_create(path: &Path, num_blocks: usize) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("unable to open image {}", path.display()))?;

        if file.metadata()?.len() == 0 {
            file.set_len((num_blocks * BLOCK_SIZE) as u64)
                .context("sizing new image")?;
        }

        Self::new(file)
    }
}

impl NufsStorage for FileBackedStorage {
    fn read_block(&self, block_number: BlockNumber) -> Result<Block> {
        ensure!(
            block_number.index() < self.num_blocks,
            "block {block_number} is past the end of the image"
        );

        let mut buf = [0; BLOCK_SIZE];
        let position = block_number.index() * BLOCK_SIZE;

        self.file
            .read_exact_at(&mut buf, position as u64)
            .context("reading requested block")?;

        Ok(buf)
    }

    fn write_block(&mut self, block_number: BlockNumber, block: &Block) -> Result<()> {
        ensure!(
            block_number.index() < self.num_blocks,
            "block {block_number} is past the end of the image"
        );

        let position = block_number.index() * BLOCK_SIZE;

        self.file
            .write_all_at(block, position as u64)
            .context("writing block")?;

        Ok(())
    }

    fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data().context("syncing image")
    }

    fn ownership_metadata(&self) -> Result<OwnershipMetadata> {
        let metadata = self.file.metadata()?;

        Ok(OwnershipMetadata {
            uid: metadata.st_uid(),
            gid: metadata.st_gid(),
        })
    }
}
