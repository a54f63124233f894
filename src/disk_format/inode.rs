use std::fmt;
use std::mem::size_of;

use serde::{Deserialize, Serialize};

use super::block::{BlockNumber, BLOCK_SIZE};

pub const INODE_SIZE: usize = 64;
const_assert!(size_of::<Inode>() == INODE_SIZE);

const_assert!(BLOCK_SIZE % INODE_SIZE == 0);
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// The number of spans addressed straight from the inode.
pub const NUM_DIRECT: usize = 2;

const_assert!(BLOCK_SIZE % size_of::<BlockNumber>() == 0);
/// The number of spans addressed through the indirect block.
pub const NUM_INDIRECT: usize = BLOCK_SIZE / size_of::<BlockNumber>();

pub const MAX_SPANS: usize = NUM_DIRECT + NUM_INDIRECT;

pub const MAX_FILE_SIZE: usize = MAX_SPANS * BLOCK_SIZE;
const_assert!(MAX_FILE_SIZE <= u32::MAX as usize);

pub const ROOT_INODE: InodeNumber = InodeNumber(0);

/// Bit mask for the file type bits of [`Inode::mode`].
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

/// Mode of the root directory created at format time.
pub const ROOT_MODE: u32 = S_IFDIR | 0o755;

/// An index into the inode table.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InodeNumber(pub u32);

impl InodeNumber {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for InodeNumber {
    fn from(value: usize) -> Self {
        InodeNumber(value as u32)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of object an inode describes, derived from its mode bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    Regular,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Inode {
    /// number of directory entries pointing at this inode
    pub refs: u32,
    /// file type and permission bits
    pub mode: u32,
    /// file size in bytes
    pub size: u32,
    /// block #s for the first NUM_DIRECT spans
    pub direct: [BlockNumber; NUM_DIRECT],
    /// block number of indirect block
    pub indirect: BlockNumber,
    /// creation time, seconds since the Unix epoch
    pub created: i64,
    /// last access time, seconds since the Unix epoch
    pub accessed: i64,
    /// last modification time, seconds since the Unix epoch
    pub modified: i64,
    pub padding: [u32; 4],
}

impl Inode {
    pub fn kind(&self) -> FileKind {
        if self.mode & S_IFMT == S_IFDIR {
            FileKind::Directory
        } else {
            FileKind::Regular
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// The number of spans an inode of this size owns. The first span is allocated eagerly, so
    /// even an empty inode owns one.
    pub fn span_count(&self) -> usize {
        spans_for_size(self.size())
    }
}

/// The number of spans backing `size` bytes of content.
pub fn spans_for_size(size: usize) -> usize {
    size.div_ceil(BLOCK_SIZE).max(1)
}

/// Where the block for a span of content is recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Span {
    /// Slot in [`Inode::direct`].
    Direct(usize),
    /// Slot in the indirect block.
    Indirect(usize),
}

impl Span {
    /// Returns the location of the `index`-th span of content, or `None` past the largest file.
    pub fn from_index(index: usize) -> Option<Span> {
        match index {
            i if i < NUM_DIRECT => Some(Span::Direct(i)),
            i if i < MAX_SPANS => Some(Span::Indirect(i - NUM_DIRECT)),
            _ => None,
        }
    }

    /// Returns the span containing byte `offset`.
    pub fn containing(offset: usize) -> Option<Span> {
        Self::from_index(offset / BLOCK_SIZE)
    }
}
