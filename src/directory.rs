//! Directory content: a packed array of fixed-size entries stored as the directory inode's data.
//!
//! A directory's size counts every slot ever appended, tombstones included. Insertion reuses the
//! first tombstone before appending, and removal never shrinks the directory.

use log::debug;

use crate::disk_format::{
    directory_entry::{
        DirectoryEntry, DirectoryEntryName, DIRECTORY_ENTRY_SIZE, FREE_DIRECTORY_ENTRY,
    },
    inode::{Inode, InodeNumber, ROOT_INODE},
};
use crate::error::{FsError, Result};
use crate::metadata::now;
use crate::path::{components, SEPARATOR};
use crate::storage::NufsStorage;
use crate::volume::Volume;

/// Validates a leaf name and encodes it for storage.
pub fn entry_name(name: &str) -> Result<DirectoryEntryName> {
    if name.is_empty() || name.contains(SEPARATOR) || name == "." || name == ".." {
        return Err(FsError::InvalidName(name.to_string()));
    }

    DirectoryEntryName::new(name).ok_or_else(|| FsError::NameTooLong(name.to_string()))
}

impl<S: NufsStorage> Volume<S> {
    /// Returns the inode number of the live entry called `name` in `dir`.
    ///
    /// The empty name is the root directory, which lets path resolution start from any directory
    /// without special-casing the root.
    pub fn lookup(&self, dir: InodeNumber, name: &str) -> Result<Option<InodeNumber>> {
        if name.is_empty() {
            return Ok(Some(ROOT_INODE));
        }

        Ok(self.find_entry(dir, name)?.map(|(_, entry)| entry.inum))
    }

    /// Walks `path` from the root one component at a time.
    pub fn resolve_path(&self, path: &str) -> Result<InodeNumber> {
        let mut inum = ROOT_INODE;

        for component in components(path) {
            inum = self
                .lookup(inum, component)?
                .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        }

        Ok(inum)
    }

    /// Adds a live entry `name -> inum` to `dir`, in the first tombstoned slot if there is one.
    ///
    /// Does not check for an existing entry with the same name, and does not touch the reference
    /// count of `inum`.
    pub fn insert_entry(
        &mut self,
        dir: InodeNumber,
        name: &str,
        inum: InodeNumber,
    ) -> Result<()> {
        let entry = DirectoryEntry::new(inum, entry_name(name)?);

        let entries = self.read_entries(dir)?;
        let slot = entries
            .iter()
            .position(|entry| !entry.used)
            .unwrap_or(entries.len());

        self.write_entry(dir, slot, &entry)?;

        debug!("[inode #{dir}] added entry {name:?} -> {inum} in slot {slot}");
        Ok(())
    }

    /// Tombstones the live entry `name` in `dir` and drops one reference from its target,
    /// freeing the target when that was the last one. Returns the target's inode number.
    pub fn remove_entry(&mut self, dir: InodeNumber, name: &str) -> Result<InodeNumber> {
        let (slot, entry) = self
            .find_entry(dir, name)?
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;

        self.write_entry(dir, slot, &FREE_DIRECTORY_ENTRY)?;
        self.release_reference(entry.inum)?;

        debug!("[inode #{dir}] removed entry {name:?} from slot {slot}");
        Ok(entry.inum)
    }

    /// The live entries of `dir` in storage order.
    pub fn list_entries(&self, dir: InodeNumber) -> Result<Vec<DirectoryEntry>> {
        Ok(self
            .read_entries(dir)?
            .into_iter()
            .filter(|entry| entry.used)
            .collect())
    }

    /// The names of the live entries of the directory at `path`.
    pub fn list(&self, path: &str) -> Result<Vec<String>> {
        let dir = self.resolve_path(path)?;

        Ok(self
            .list_entries(dir)?
            .into_iter()
            .map(|entry| entry.name.to_string())
            .collect())
    }

    /// The slot index and contents of the live entry called `name`.
    pub(crate) fn find_entry(
        &self,
        dir: InodeNumber,
        name: &str,
    ) -> Result<Option<(usize, DirectoryEntry)>> {
        Ok(self
            .read_entries(dir)?
            .into_iter()
            .enumerate()
            .find(|(_, entry)| entry.used && entry.name.matches(name)))
    }

    /// Every slot of `dir`, tombstones included.
    pub(crate) fn read_entries(&self, dir: InodeNumber) -> Result<Vec<DirectoryEntry>> {
        let inode = self.read_directory_inode(dir)?;

        let mut contents = vec![0; inode.size()];
        self.read_content(&inode, 0, &mut contents)?;

        let entry_chunks = contents.chunks_exact(DIRECTORY_ENTRY_SIZE);
        if !entry_chunks.remainder().is_empty() {
            return Err(FsError::Corrupt(format!(
                "directory {dir} size is not a multiple of {DIRECTORY_ENTRY_SIZE}"
            )));
        }

        entry_chunks
            .map(|chunk| bincode::deserialize::<DirectoryEntry>(chunk).map_err(FsError::from))
            .collect()
    }

    /// Overwrites slot `slot` of `dir`, appending when `slot` is one past the end.
    pub(crate) fn write_entry(
        &mut self,
        dir: InodeNumber,
        slot: usize,
        entry: &DirectoryEntry,
    ) -> Result<()> {
        let mut inode = self.read_directory_inode(dir)?;

        let data = bincode::serialize(entry)?;
        self.write_content(&mut inode, slot * DIRECTORY_ENTRY_SIZE, &data)?;
        inode.modified = now();

        self.write_inode(dir, &inode)
    }

    /// Drops one reference from `inum`, freeing it once nothing refers to it.
    pub(crate) fn release_reference(&mut self, inum: InodeNumber) -> Result<()> {
        let inode = self.update_inode(inum, |inode| inode.refs = inode.refs.saturating_sub(1))?;

        if inode.refs == 0 {
            self.free_inode(inum)?;
        }

        Ok(())
    }

    pub(crate) fn read_directory_inode(&self, dir: InodeNumber) -> Result<Inode> {
        let inode = self.read_inode(dir)?;
        if !inode.is_directory() {
            return Err(FsError::NotADirectory(dir));
        }

        Ok(inode)
    }
}
