//! Inode allocation and the mapping from file content to blocks.

use log::debug;

use crate::disk_format::{
    block::{BlockNumber, BLOCK_SIZE},
    inode::{
        spans_for_size, Inode, InodeNumber, Span, MAX_FILE_SIZE, NUM_DIRECT, NUM_INDIRECT,
    },
};
use crate::error::{FsError, Result};
use crate::metadata::now;
use crate::storage::NufsStorage;
use crate::volume::Volume;

impl<S: NufsStorage> Volume<S> {
    /// Takes the first free inode and gives it one zeroed data block.
    ///
    /// The new record has one reference, size zero and mode zero. If no block is left for it the
    /// inode slot is released again and the volume is unchanged.
    pub fn allocate_inode(&mut self) -> Result<InodeNumber> {
        let inum = self.allocate_inode_slot()?;

        let block_number = match self.allocate_block() {
            Ok(block_number) => block_number,
            Err(err) => {
                self.release_inode_slot(inum)?;
                return Err(err);
            }
        };

        let timestamp = now();
        let inode = Inode {
            refs: 1,
            mode: 0,
            size: 0,
            direct: [block_number, BlockNumber::NONE],
            indirect: BlockNumber::NONE,
            created: timestamp,
            accessed: timestamp,
            modified: timestamp,
            padding: [0; 4],
        };
        self.write_inode(inum, &inode)?;

        debug!("[inode #{inum}] allocated");
        Ok(inum)
    }

    /// Releases every block owned by `inum` and the inode itself. The caller is responsible for
    /// making sure nothing refers to it any more.
    pub fn free_inode(&mut self, inum: InodeNumber) -> Result<()> {
        let mut inode = self.read_inode(inum)?;

        self.shrink(&mut inode, 0)?;
        self.free_block(inode.direct[0])?;

        self.write_inode(inum, &Inode::default())?;
        self.release_inode_slot(inum)?;

        debug!("[inode #{inum}] freed");
        Ok(())
    }

    /// Grows or shrinks `inode` to `new_size` bytes.
    pub fn resize(&mut self, inode: &mut Inode, new_size: usize) -> Result<()> {
        if new_size > inode.size() {
            self.grow(inode, new_size)
        } else {
            self.shrink(inode, new_size)
        }
    }

    /// Allocates the spans between the current size and `new_size`, taking the indirect block
    /// on first use. Either every span is allocated or, on exhaustion, none are and `inode` is
    /// left as it was.
    pub fn grow(&mut self, inode: &mut Inode, new_size: usize) -> Result<()> {
        if new_size > MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge(new_size));
        }

        let first_new = inode.span_count();
        let end = spans_for_size(new_size);

        if end > first_new {
            let needs_indirect = end > NUM_DIRECT && inode.indirect.is_none();
            let count = end - first_new + usize::from(needs_indirect);
            let mut blocks = self.allocate_blocks(count)?.into_iter();

            if needs_indirect {
                inode.indirect = blocks.next().ok_or(FsError::NoFreeBlocks)?;
            }

            let mut pointers = self.read_indirect(inode)?;
            for index in first_new..end {
                let block_number = blocks.next().ok_or(FsError::NoFreeBlocks)?;

                match Span::from_index(index) {
                    Some(Span::Direct(i)) => inode.direct[i] = block_number,
                    Some(Span::Indirect(i)) => {
                        if let Some(pointers) = pointers.as_mut() {
                            pointers[i] = block_number;
                        }
                    }
                    None => return Err(FsError::FileTooLarge(new_size)),
                }
            }

            if let Some(pointers) = pointers {
                self.write_indirect(inode.indirect, &pointers)?;
            }
        }

        inode.size = new_size as u32;
        Ok(())
    }

    /// Frees the spans past `new_size`, dropping the indirect block once it holds nothing.
    ///
    /// Bytes of the last kept block beyond `new_size` are zeroed, so growing again reads back
    /// zeros.
    pub fn shrink(&mut self, inode: &mut Inode, new_size: usize) -> Result<()> {
        let end = spans_for_size(new_size);
        let last = inode.span_count();

        if last > end {
            let mut pointers = self.read_indirect(inode)?;

            for index in (end..last).rev() {
                match Span::from_index(index) {
                    Some(Span::Direct(i)) => {
                        self.free_block(inode.direct[i])?;
                        inode.direct[i] = BlockNumber::NONE;
                    }
                    Some(Span::Indirect(i)) => {
                        let pointers = pointers.as_mut().ok_or_else(|| {
                            FsError::Corrupt("indirect span without an indirect block".into())
                        })?;
                        self.free_block(pointers[i])?;
                        pointers[i] = BlockNumber::NONE;
                    }
                    None => return Err(FsError::FileTooLarge(inode.size())),
                }
            }

            if let Some(pointers) = pointers {
                if end <= NUM_DIRECT {
                    self.free_block(inode.indirect)?;
                    inode.indirect = BlockNumber::NONE;
                } else {
                    self.write_indirect(inode.indirect, &pointers)?;
                }
            }
        }

        // an empty inode still keeps its first block, which must read back as zeros
        let tail = new_size % BLOCK_SIZE;
        if new_size < inode.size() && (tail != 0 || new_size == 0) {
            let block_number = self.block_for_offset(inode, new_size)?;
            let mut block = self.read_block(block_number)?;
            block[tail..].fill(0);
            self.write_block(block_number, &block)?;
        }

        inode.size = new_size as u32;
        Ok(())
    }

    /// Returns the block holding byte `offset` of the inode's content.
    pub fn block_for_offset(&self, inode: &Inode, offset: usize) -> Result<BlockNumber> {
        let span = Span::containing(offset).ok_or(FsError::FileTooLarge(offset))?;

        if offset / BLOCK_SIZE >= inode.span_count() {
            return Err(FsError::InvalidOffset {
                offset,
                end: offset,
                size: inode.size(),
            });
        }

        let block_number = match span {
            Span::Direct(i) => inode.direct[i],
            Span::Indirect(i) => self
                .read_indirect(inode)?
                .map(|pointers| pointers[i])
                .unwrap_or(BlockNumber::NONE),
        };

        if block_number.is_none() {
            return Err(FsError::Corrupt(format!(
                "span {} of a {}-byte inode is unallocated",
                offset / BLOCK_SIZE,
                inode.size
            )));
        }

        Ok(block_number)
    }

    /// Copies `buf.len()` bytes of content starting at `offset` into `buf`. The range must lie
    /// within the inode's size.
    pub fn read_content(&self, inode: &Inode, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let end = offset + buf.len();
        if end > inode.size() {
            return Err(FsError::InvalidOffset {
                offset,
                end,
                size: inode.size(),
            });
        }

        let mut position = offset;
        while position < end {
            let start_offset = position % BLOCK_SIZE;
            let block_start = position - start_offset;
            let end_position = (block_start + BLOCK_SIZE).min(end);

            let block = self.read_block(self.block_for_offset(inode, position)?)?;
            buf[(position - offset)..(end_position - offset)]
                .copy_from_slice(&block[start_offset..end_position - block_start]);

            position = end_position;
        }

        Ok(buf.len())
    }

    /// Copies `data` into the content starting at `offset`, growing the inode first when the
    /// write ends past its size. The caller persists the updated inode.
    pub fn write_content(
        &mut self,
        inode: &mut Inode,
        offset: usize,
        data: &[u8],
    ) -> Result<usize> {
        let end = offset + data.len();
        if end > inode.size() {
            self.grow(inode, end)?;
        }

        let mut position = offset;
        while position < end {
            let start_offset = position % BLOCK_SIZE;
            let block_start = position - start_offset;
            let end_position = (block_start + BLOCK_SIZE).min(end);

            let block_number = self.block_for_offset(inode, position)?;
            let mut block = self.read_block(block_number)?;
            block[start_offset..end_position - block_start]
                .copy_from_slice(&data[(position - offset)..(end_position - offset)]);
            self.write_block(block_number, &block)?;

            position = end_position;
        }

        Ok(data.len())
    }

    /// Every block the inode owns, data blocks in span order followed by the indirect block.
    pub fn owned_blocks(&self, inode: &Inode) -> Result<Vec<BlockNumber>> {
        let mut blocks: Vec<BlockNumber> = inode
            .direct
            .iter()
            .copied()
            .filter(|b| !b.is_none())
            .collect();

        if let Some(pointers) = self.read_indirect(inode)? {
            blocks.extend(pointers.into_iter().filter(|b| !b.is_none()));
            blocks.push(inode.indirect);
        }

        Ok(blocks)
    }

    fn read_indirect(&self, inode: &Inode) -> Result<Option<Vec<BlockNumber>>> {
        if inode.indirect.is_none() {
            return Ok(None);
        }

        let pointers = self
            .read_block(inode.indirect)?
            .chunks_exact(4)
            .map(|b| BlockNumber(u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .collect::<Vec<_>>();
        debug_assert_eq!(pointers.len(), NUM_INDIRECT);

        Ok(Some(pointers))
    }

    fn write_indirect(&mut self, indirect: BlockNumber, pointers: &[BlockNumber]) -> Result<()> {
        let mut block = [0; BLOCK_SIZE];
        for (chunk, pointer) in block.chunks_exact_mut(4).zip(pointers) {
            chunk.copy_from_slice(&pointer.0.to_le_bytes());
        }

        self.write_block(indirect, &block)
    }
}
