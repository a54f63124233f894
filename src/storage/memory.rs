use anyhow::{anyhow, Result};

use crate::disk_format::block::{Block, BlockNumber, EMPTY_BLOCK};

use super::nufs_storage::NufsStorage;

/// A volume held entirely in memory. Contents are lost on drop.
#[derive(Clone)]
pub struct MemoryStorage {
    blocks: Vec<Block>,
}

impl MemoryStorage {
    pub fn new(num_blocks: usize) -> Self {
        MemoryStorage {
            blocks: vec![EMPTY_BLOCK; num_blocks],
        }
    }
}

impl NufsStorage for MemoryStorage {
    fn read_block(&self, block_number: BlockNumber) -> Result<Block> {
        self.blocks
            .get(block_number.index())
            .copied()
            .ok_or(anyhow!("block number out of bounds: {block_number}"))
    }

    fn write_block(&mut self, block_number: BlockNumber, block: &Block) -> Result<()> {
        let slot = self
            .blocks
            .get_mut(block_number.index())
            .ok_or(anyhow!("block number out of bounds: {block_number}"))?;
        *slot = *block;

        Ok(())
    }

    fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::disk_format::block::BLOCK_SIZE;

    use super::*;

    #[test]
    fn test_read_back_written_block() {
        let mut storage = MemoryStorage::new(4);
        let block = [0xab; BLOCK_SIZE];

        storage.write_block(BlockNumber(2), &block).unwrap();

        assert_eq!(storage.read_block(BlockNumber(2)).unwrap(), block);
        assert_eq!(storage.read_block(BlockNumber(1)).unwrap(), EMPTY_BLOCK);
    }

    #[test]
    fn test_read_out_of_bounds_block() {
        let mut storage = MemoryStorage::new(4);

        assert!(storage.read_block(BlockNumber(3)).is_ok());
        assert!(storage.read_block(BlockNumber(4)).is_err());
        assert!(storage.write_block(BlockNumber(4), &EMPTY_BLOCK).is_err());
    }
}
