use std::mem::size_of;

use serde::{Deserialize, Serialize};

use super::block::BLOCK_SIZE;
use super::inode::INODES_PER_BLOCK;

/// The number of bytes occupied by the filesystem header.
pub const FS_HEADER_SIZE: usize = 64;
const_assert!(size_of::<FileSystemHeader>() == FS_HEADER_SIZE);

/// The block holding the filesystem header, followed by the block bitmap and the inode bitmap.
pub const FS_HEADER_BLOCK_NUMBER: usize = 0;

/// Identifies a formatted NUFS image ("NUFS", little-endian).
pub const NUFS_MAGIC: u32 = 0x5346_554e;

/// The number of blocks and inodes in a volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub num_blocks: usize,
    pub num_inodes: usize,
}

impl Default for Geometry {
    /// A 1 MiB image with room for 256 objects.
    fn default() -> Self {
        Self {
            num_blocks: 256,
            num_inodes: 256,
        }
    }
}

impl Geometry {
    /// Byte offset of the block bitmap within the header block.
    pub const BLOCK_BITMAP_OFFSET: usize = FS_HEADER_SIZE;

    pub fn block_bitmap_len(&self) -> usize {
        self.num_blocks.div_ceil(8)
    }

    /// Byte offset of the inode bitmap within the header block.
    pub fn inode_bitmap_offset(&self) -> usize {
        Self::BLOCK_BITMAP_OFFSET + self.block_bitmap_len()
    }

    pub fn inode_bitmap_len(&self) -> usize {
        self.num_inodes.div_ceil(8)
    }

    /// The number of blocks occupied by the inode table.
    pub fn inode_blocks(&self) -> usize {
        self.num_inodes.div_ceil(INODES_PER_BLOCK)
    }

    /// The first block of the data region. Everything below it is metadata.
    pub fn first_data_block(&self) -> usize {
        1 + self.inode_blocks()
    }

    /// Whether the layout fits: both bitmaps inside the header block, at least one data block
    /// for the root directory and a root inode to put in it.
    pub fn is_valid(&self) -> bool {
        self.num_inodes >= 1
            && self.num_inodes <= u32::MAX as usize
            && self.num_blocks <= u32::MAX as usize
            && self.inode_bitmap_offset() + self.inode_bitmap_len() <= BLOCK_SIZE
            && self.num_blocks > self.first_data_block()
    }
}

/// The filesystem header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct FileSystemHeader {
    /// Always [`NUFS_MAGIC`] on a formatted image.
    pub magic: u32,
    /// The number of blocks in the underlying image.
    pub num_blocks: u32,
    /// The capacity of the inode table.
    pub num_inodes: u32,
    /// Padding to make the struct occupy exactly [`FS_HEADER_SIZE`] bytes.
    pub padding: [u32; 13],
}

impl FileSystemHeader {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            magic: NUFS_MAGIC,
            num_blocks: geometry.num_blocks as u32,
            num_inodes: geometry.num_inodes as u32,
            padding: [0; 13],
        }
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            num_blocks: self.num_blocks as usize,
            num_inodes: self.num_inodes as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry_layout() {
        let geometry = Geometry::default();

        assert!(geometry.is_valid());
        assert_eq!(geometry.block_bitmap_len(), 32);
        assert_eq!(geometry.inode_bitmap_offset(), 64 + 32);
        assert_eq!(geometry.inode_blocks(), 4);
        assert_eq!(geometry.first_data_block(), 5);
    }

    #[test]
    fn test_bitmaps_must_fit_in_header_block() {
        let geometry = Geometry {
            num_blocks: 32_000,
            num_inodes: 8,
        };
        assert!(!geometry.is_valid());
    }

    #[test]
    fn test_no_room_for_data() {
        let geometry = Geometry {
            num_blocks: 2,
            num_inodes: 64,
        };
        assert!(!geometry.is_valid());
    }

    #[test]
    fn test_header_serialized_size() {
        let header = FileSystemHeader::new(Geometry::default());
        let bytes = bincode::serialize(&header).unwrap();

        assert_eq!(bytes.len(), FS_HEADER_SIZE);
        assert_eq!(&bytes[..4], b"NUFS");
    }
}
