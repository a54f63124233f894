use anyhow::Result;

use crate::disk_format::block::{Block, BlockNumber};
use crate::metadata::OwnershipMetadata;

/// A fixed-size array of equally sized blocks.
pub trait NufsStorage {
    fn read_block(&self, block_number: BlockNumber) -> Result<Block>;

    fn write_block(&mut self, block_number: BlockNumber, block: &Block) -> Result<()>;

    /// The number of blocks the device holds.
    fn num_blocks(&self) -> usize;

    /// Flushes buffered writes to the backing medium.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn ownership_metadata(&self) -> Result<OwnershipMetadata> {
        Ok(OwnershipMetadata::default())
    }
}
