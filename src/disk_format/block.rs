use std::fmt;
use std::mem::size_of;

use serde::{Deserialize, Serialize};

/// The size of a block in bytes.
pub const BLOCK_SIZE: usize = 4096;
const_assert!(BLOCK_SIZE.is_power_of_two());

pub type Block = [u8; BLOCK_SIZE];
const_assert!(size_of::<Block>() == BLOCK_SIZE);

/// An all-zero block.
pub const EMPTY_BLOCK: Block = [0; BLOCK_SIZE];

/// Identifies a block in the image.
///
/// Block zero holds the filesystem header and the bitmaps, so it can never be handed out as a
/// data block. Pointers use it to mean "nothing allocated here".
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlockNumber(pub u32);
const_assert!(size_of::<BlockNumber>() == 4);

impl BlockNumber {
    /// The pointer value for an unallocated span.
    pub const NONE: BlockNumber = BlockNumber(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for BlockNumber {
    fn from(value: usize) -> Self {
        BlockNumber(value as u32)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
