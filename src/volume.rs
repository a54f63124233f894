use bitvec::prelude::*;
use log::{debug, info};

use crate::disk_format::{
    block::{Block, BlockNumber, BLOCK_SIZE, EMPTY_BLOCK},
    header::{FileSystemHeader, Geometry, FS_HEADER_BLOCK_NUMBER, FS_HEADER_SIZE, NUFS_MAGIC},
    inode::{Inode, InodeNumber, INODES_PER_BLOCK, INODE_SIZE, ROOT_INODE, ROOT_MODE},
};
use crate::error::{FsError, Result};
use crate::storage::NufsStorage;

/// A formatted image: the block device plus the allocation state read from its header block.
///
/// All mutation of the image goes through this type. The inode table and the directory layer are
/// implemented on it in [`crate::inode_table`] and [`crate::directory`].
pub struct Volume<S: NufsStorage> {
    storage: S,
    header: FileSystemHeader,
    /// Tracks the allocation status of blocks.
    /// A value of `true` represents "occupied".
    block_bitmap: BitVec<u8, Lsb0>,
    /// Tracks the allocation status of inodes.
    /// A value of `true` represents "occupied".
    inode_bitmap: BitVec<u8, Lsb0>,
}

impl<S: NufsStorage> Volume<S> {
    /// Writes an empty filesystem with the given geometry and creates the root directory.
    pub fn format(storage: S, geometry: Geometry) -> Result<Self> {
        if !geometry.is_valid() {
            return Err(FsError::InvalidGeometry(format!("{geometry:?}")));
        }

        if storage.num_blocks() < geometry.num_blocks {
            return Err(FsError::InvalidGeometry(format!(
                "device holds {} blocks, {} requested",
                storage.num_blocks(),
                geometry.num_blocks
            )));
        }

        let mut volume = Self {
            storage,
            header: FileSystemHeader::new(geometry),
            block_bitmap: bitvec![u8, Lsb0; 0; geometry.num_blocks],
            inode_bitmap: bitvec![u8, Lsb0; 0; geometry.num_inodes],
        };

        // the header block and the inode table are never handed out
        for b in 0..geometry.first_data_block() {
            volume.block_bitmap.set(b, true);
        }

        for b in 1..geometry.first_data_block() {
            volume.storage.write_block(b.into(), &EMPTY_BLOCK)?;
        }

        volume.write_header_block()?;

        let root = volume.allocate_inode()?;
        if root != ROOT_INODE {
            return Err(FsError::Corrupt(format!("root allocated at inode {root}")));
        }
        volume.update_inode(root, |inode| inode.mode = ROOT_MODE)?;

        info!(
            "formatted volume: {} blocks, {} inodes",
            geometry.num_blocks, geometry.num_inodes
        );

        Ok(volume)
    }

    /// Loads the header and bitmaps of an existing image.
    pub fn open(storage: S) -> Result<Self> {
        let header_block = storage.read_block(FS_HEADER_BLOCK_NUMBER.into())?;
        let header: FileSystemHeader = bincode::deserialize(&header_block[..FS_HEADER_SIZE])?;

        if header.magic != NUFS_MAGIC {
            return Err(FsError::Corrupt("missing NUFS magic".to_string()));
        }

        let geometry = header.geometry();
        if !geometry.is_valid() || storage.num_blocks() < geometry.num_blocks {
            return Err(FsError::Corrupt(format!(
                "header geometry {geometry:?} does not fit a {}-block device",
                storage.num_blocks()
            )));
        }

        let block_bitmap_start = Geometry::BLOCK_BITMAP_OFFSET;
        let block_bitmap_end = block_bitmap_start + geometry.block_bitmap_len();
        let mut block_bitmap =
            BitVec::<u8, Lsb0>::from_slice(&header_block[block_bitmap_start..block_bitmap_end]);
        block_bitmap.truncate(geometry.num_blocks);

        let inode_bitmap_start = geometry.inode_bitmap_offset();
        let inode_bitmap_end = inode_bitmap_start + geometry.inode_bitmap_len();
        let mut inode_bitmap =
            BitVec::<u8, Lsb0>::from_slice(&header_block[inode_bitmap_start..inode_bitmap_end]);
        inode_bitmap.truncate(geometry.num_inodes);

        let volume = Self {
            storage,
            header,
            block_bitmap,
            inode_bitmap,
        };

        info!("{} total blocks", geometry.num_blocks);
        info!("{} total inodes", geometry.num_inodes);

        if !volume.is_inode_allocated(ROOT_INODE) {
            return Err(FsError::Corrupt("root inode is not allocated".to_string()));
        }

        if !volume.read_inode(ROOT_INODE)?.is_directory() {
            return Err(FsError::Corrupt(
                "root inode does not represent a directory".to_string(),
            ));
        }

        Ok(volume)
    }

    /// Whether `storage` starts with a NUFS header.
    pub fn is_formatted(storage: &S) -> Result<bool> {
        let header_block = storage.read_block(FS_HEADER_BLOCK_NUMBER.into())?;
        let header: FileSystemHeader = bincode::deserialize(&header_block[..FS_HEADER_SIZE])?;

        Ok(header.magic == NUFS_MAGIC)
    }

    pub fn geometry(&self) -> Geometry {
        self.header.geometry()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    pub fn sync(&mut self) -> Result<()> {
        self.storage.sync()?;
        Ok(())
    }

    pub fn num_free_blocks(&self) -> usize {
        self.block_bitmap.count_zeros()
    }

    pub fn num_free_inodes(&self) -> usize {
        self.inode_bitmap.count_zeros()
    }

    pub fn is_block_allocated(&self, block_number: BlockNumber) -> bool {
        self.block_bitmap
            .get(block_number.index())
            .is_some_and(|bit| *bit)
    }

    pub fn is_inode_allocated(&self, inum: InodeNumber) -> bool {
        self.inode_bitmap.get(inum.index()).is_some_and(|bit| *bit)
    }

    pub(crate) fn read_block(&self, block_number: BlockNumber) -> Result<Block> {
        self.check_block_number(block_number)?;
        Ok(self.storage.read_block(block_number)?)
    }

    pub(crate) fn write_block(&mut self, block_number: BlockNumber, block: &Block) -> Result<()> {
        self.check_block_number(block_number)?;
        Ok(self.storage.write_block(block_number, block)?)
    }

    /// Takes the first free block and zero-fills it.
    pub(crate) fn allocate_block(&mut self) -> Result<BlockNumber> {
        let block_number: BlockNumber = self
            .block_bitmap
            .first_zero()
            .ok_or(FsError::NoFreeBlocks)?
            .into();

        self.storage.write_block(block_number, &EMPTY_BLOCK)?;
        self.block_bitmap.set(block_number.index(), true);
        self.write_header_block()?;

        debug!("allocated block {block_number}");
        Ok(block_number)
    }

    /// Takes `count` free blocks, or none of them.
    pub(crate) fn allocate_blocks(&mut self, count: usize) -> Result<Vec<BlockNumber>> {
        if self.num_free_blocks() < count {
            return Err(FsError::NoFreeBlocks);
        }

        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocate_block() {
                Ok(block_number) => blocks.push(block_number),
                Err(err) => {
                    for block_number in blocks {
                        self.free_block(block_number)?;
                    }
                    return Err(err);
                }
            }
        }

        Ok(blocks)
    }

    pub(crate) fn free_block(&mut self, block_number: BlockNumber) -> Result<()> {
        self.check_block_number(block_number)?;

        if block_number.index() < self.geometry().first_data_block() {
            return Err(FsError::Corrupt(format!(
                "attempt to free metadata block {block_number}"
            )));
        }

        self.block_bitmap.set(block_number.index(), false);
        self.write_header_block()?;

        debug!("freed block {block_number}");
        Ok(())
    }

    /// Marks the first free inode slot as occupied. The record itself is left untouched.
    pub(crate) fn allocate_inode_slot(&mut self) -> Result<InodeNumber> {
        let inum: InodeNumber = self
            .inode_bitmap
            .first_zero()
            .ok_or(FsError::NoFreeInodes)?
            .into();

        self.inode_bitmap.set(inum.index(), true);
        self.write_header_block()?;

        Ok(inum)
    }

    pub(crate) fn release_inode_slot(&mut self, inum: InodeNumber) -> Result<()> {
        self.check_inode_number(inum)?;

        self.inode_bitmap.set(inum.index(), false);
        self.write_header_block()
    }

    /// Reads the record at `inum` by fixed-stride indexing into the inode table. Does not check
    /// that the slot is allocated.
    pub fn read_inode(&self, inum: InodeNumber) -> Result<Inode> {
        let (block_number, offset) = self.inode_position(inum)?;

        let block = self.storage.read_block(block_number)?;
        let inode = &block[offset..offset + INODE_SIZE];

        Ok(bincode::deserialize(inode)?)
    }

    pub fn write_inode(&mut self, inum: InodeNumber, inode: &Inode) -> Result<()> {
        let (block_number, offset) = self.inode_position(inum)?;
        let inode_serialized = bincode::serialize(inode)?;

        let mut block = self.storage.read_block(block_number)?;
        block[offset..offset + INODE_SIZE].copy_from_slice(&inode_serialized);

        self.storage.write_block(block_number, &block)?;

        Ok(())
    }

    pub(crate) fn update_inode<F>(
        &mut self,
        inum: InodeNumber,
        mut update_inode: F,
    ) -> Result<Inode>
    where
        F: FnMut(&mut Inode),
    {
        let mut inode = self.read_inode(inum)?;
        update_inode(&mut inode);
        self.write_inode(inum, &inode)?;

        Ok(inode)
    }

    fn inode_position(&self, inum: InodeNumber) -> Result<(BlockNumber, usize)> {
        self.check_inode_number(inum)?;

        let block_number = 1 + inum.index() / INODES_PER_BLOCK;
        let offset = (inum.index() % INODES_PER_BLOCK) * INODE_SIZE;

        Ok((block_number.into(), offset))
    }

    fn check_inode_number(&self, inum: InodeNumber) -> Result<()> {
        if inum.index() >= self.geometry().num_inodes {
            return Err(FsError::InvalidInode(inum));
        }

        Ok(())
    }

    fn check_block_number(&self, block_number: BlockNumber) -> Result<()> {
        if block_number.is_none() || block_number.index() >= self.geometry().num_blocks {
            return Err(FsError::InvalidBlock(block_number));
        }

        Ok(())
    }

    /// Persists the header and both bitmaps.
    fn write_header_block(&mut self) -> Result<()> {
        let geometry = self.geometry();
        let mut block = [0; BLOCK_SIZE];

        let header_serialized = bincode::serialize(&self.header)?;
        block[..FS_HEADER_SIZE].copy_from_slice(&header_serialized);

        let block_bitmap = self.block_bitmap.as_raw_slice();
        let start = Geometry::BLOCK_BITMAP_OFFSET;
        block[start..start + block_bitmap.len()].copy_from_slice(block_bitmap);

        let inode_bitmap = self.inode_bitmap.as_raw_slice();
        let start = geometry.inode_bitmap_offset();
        block[start..start + inode_bitmap.len()].copy_from_slice(inode_bitmap);

        self.storage
            .write_block(FS_HEADER_BLOCK_NUMBER.into(), &block)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::MemoryStorage;

    use super::*;

    fn small_geometry() -> Geometry {
        Geometry {
            num_blocks: 16,
            num_inodes: 8,
        }
    }

    mod format {
        use super::*;

        #[test]
        fn test_reserves_metadata_blocks() {
            let volume = Volume::format(MemoryStorage::new(16), small_geometry()).unwrap();

            // header block, one inode table block, and the root directory's first block
            assert!(volume.is_block_allocated(BlockNumber(0)));
            assert!(volume.is_block_allocated(BlockNumber(1)));
            assert!(volume.is_block_allocated(BlockNumber(2)));
            assert_eq!(volume.num_free_blocks(), 16 - 3);
        }

        #[test]
        fn test_creates_root_directory() {
            let volume = Volume::format(MemoryStorage::new(16), small_geometry()).unwrap();
            let root = volume.read_inode(ROOT_INODE).unwrap();

            assert_eq!(root.mode, ROOT_MODE);
            assert_eq!(root.refs, 1);
            assert_eq!(root.size, 0);
            assert_eq!(volume.num_free_inodes(), 7);
        }

        #[test]
        fn test_rejects_device_smaller_than_geometry() {
            let result = Volume::format(MemoryStorage::new(8), small_geometry());
            assert!(matches!(result, Err(FsError::InvalidGeometry(_))));
        }

        #[test]
        fn test_rejects_unusable_geometry() {
            let geometry = Geometry {
                num_blocks: 2,
                num_inodes: 8,
            };
            let result = Volume::format(MemoryStorage::new(2), geometry);
            assert!(matches!(result, Err(FsError::InvalidGeometry(_))));
        }
    }

    mod open {
        use super::*;

        #[test]
        fn test_reloads_bitmaps() {
            let mut volume = Volume::format(MemoryStorage::new(16), small_geometry()).unwrap();
            let block = volume.allocate_block().unwrap();
            let inum = volume.allocate_inode_slot().unwrap();

            let volume = Volume::open(volume.into_storage()).unwrap();

            assert!(volume.is_block_allocated(block));
            assert!(volume.is_inode_allocated(inum));
            assert_eq!(volume.num_free_blocks(), 16 - 4);
            assert_eq!(volume.geometry(), small_geometry());
        }

        #[test]
        fn test_unformatted_image() {
            let storage = MemoryStorage::new(16);

            assert!(!Volume::is_formatted(&storage).unwrap());
            assert!(matches!(Volume::open(storage), Err(FsError::Corrupt(_))));
        }
    }

    mod allocation {
        use super::*;

        #[test]
        fn test_allocated_blocks_are_zeroed() {
            let mut volume = Volume::format(MemoryStorage::new(16), small_geometry()).unwrap();
            let block = volume.allocate_block().unwrap();
            volume.write_block(block, &[0xff; BLOCK_SIZE]).unwrap();
            volume.free_block(block).unwrap();

            let again = volume.allocate_block().unwrap();

            assert_eq!(again, block);
            assert_eq!(volume.read_block(again).unwrap(), EMPTY_BLOCK);
        }

        #[test]
        fn test_allocate_blocks_is_all_or_nothing() {
            let mut volume = Volume::format(MemoryStorage::new(16), small_geometry()).unwrap();
            let free = volume.num_free_blocks();

            assert!(matches!(
                volume.allocate_blocks(free + 1),
                Err(FsError::NoFreeBlocks)
            ));
            assert_eq!(volume.num_free_blocks(), free);

            assert_eq!(volume.allocate_blocks(free).unwrap().len(), free);
            assert_eq!(volume.num_free_blocks(), 0);
        }

        #[test]
        fn test_cannot_free_metadata_block() {
            let mut volume = Volume::format(MemoryStorage::new(16), small_geometry()).unwrap();

            assert!(volume.free_block(BlockNumber(1)).is_err());
            assert!(volume.free_block(BlockNumber(0)).is_err());
            assert!(volume.free_block(BlockNumber(16)).is_err());
        }

        #[test]
        fn test_inode_out_of_range() {
            let volume = Volume::format(MemoryStorage::new(16), small_geometry()).unwrap();

            assert!(volume.read_inode(InodeNumber(7)).is_ok());
            assert!(matches!(
                volume.read_inode(InodeNumber(8)),
                Err(FsError::InvalidInode(InodeNumber(8)))
            ));
        }
    }
}
