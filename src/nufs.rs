use std::time::SystemTime;

use log::{debug, info};

use crate::directory::entry_name;
use crate::disk_format::{
    block::BLOCK_SIZE,
    directory_entry::{DirectoryEntry, FREE_DIRECTORY_ENTRY, MAX_NAME_LEN},
    header::Geometry,
    inode::{InodeNumber, ROOT_INODE, S_IFDIR, S_IFMT},
};
use crate::error::{FsError, Result};
use crate::metadata::{now, timestamp, Attributes};
use crate::path::split_path;
use crate::storage::NufsStorage;
use crate::volume::Volume;

/// Volume-wide counters, as reported by `statfs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: usize,
    pub num_blocks: usize,
    pub free_blocks: usize,
    pub num_inodes: usize,
    pub free_inodes: usize,
    pub max_name_len: usize,
}

/// The path-level interface to a NUFS volume.
///
/// Every operation runs to completion before returning; callers that serve concurrent requests
/// must serialize them. Path operations resolve their path and delegate to the inode-level
/// operation of the same name, which the FUSE adapter uses directly.
pub struct Nufs<S: NufsStorage> {
    volume: Volume<S>,
}

impl<S: NufsStorage> Nufs<S> {
    pub fn format(storage: S, geometry: Geometry) -> Result<Self> {
        Ok(Self {
            volume: Volume::format(storage, geometry)?,
        })
    }

    pub fn open(storage: S) -> Result<Self> {
        Ok(Self {
            volume: Volume::open(storage)?,
        })
    }

    /// Opens `storage`, formatting it first if it carries no filesystem.
    pub fn open_or_format(storage: S, geometry: Geometry) -> Result<Self> {
        if Volume::is_formatted(&storage)? {
            Self::open(storage)
        } else {
            info!("no filesystem found, formatting");
            Self::format(storage, geometry)
        }
    }

    pub fn volume(&self) -> &Volume<S> {
        &self.volume
    }

    pub fn into_storage(self) -> S {
        self.volume.into_storage()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.volume.sync()
    }

    pub fn statfs(&self) -> FsStats {
        let geometry = self.volume.geometry();

        FsStats {
            block_size: BLOCK_SIZE,
            num_blocks: geometry.num_blocks,
            free_blocks: self.volume.num_free_blocks(),
            num_inodes: geometry.num_inodes,
            free_inodes: self.volume.num_free_inodes(),
            max_name_len: MAX_NAME_LEN,
        }
    }

    pub fn resolve(&self, path: &str) -> Result<InodeNumber> {
        self.volume.resolve_path(path)
    }

    pub fn stat(&self, path: &str) -> Result<Attributes> {
        let inum = self.resolve(path)?;
        self.attributes(inum)
    }

    /// Fills `buf` from the content of `path` starting at `offset`. The whole range must lie
    /// within the file.
    pub fn read(&self, path: &str, buf: &mut [u8], offset: usize) -> Result<usize> {
        let inum = self.resolve(path)?;
        self.read_inode_data(inum, buf, offset)
    }

    /// Writes `data` at `offset`, growing the file when the write ends past its size.
    pub fn write(&mut self, path: &str, data: &[u8], offset: usize) -> Result<usize> {
        let inum = self.resolve(path)?;
        self.write_inode_data(inum, data, offset)
    }

    pub fn truncate(&mut self, path: &str, size: usize) -> Result<()> {
        let inum = self.resolve(path)?;
        self.truncate_inode(inum, size)
    }

    /// Creates an object with the given mode. The mode's type bits decide between a regular file
    /// and a directory.
    pub fn mknod(&mut self, path: &str, mode: u32) -> Result<InodeNumber> {
        if self.exists(path)? {
            return Err(FsError::AlreadyExists(path.to_string()));
        }

        let (parent_path, name) = split_path(path);
        let parent = self.resolve(&parent_path)?;

        self.create(parent, name, mode)
    }

    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<InodeNumber> {
        self.mknod(path, (mode & !S_IFMT) | S_IFDIR)
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let (parent_path, name) = split_path(path);
        let parent = self.resolve(&parent_path)?;

        self.unlink_entry(parent, name)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let (parent_path, name) = split_path(path);
        let parent = self.resolve(&parent_path)?;

        self.rmdir_entry(parent, name)
    }

    /// Makes `from` another name for the object at `to`.
    pub fn link(&mut self, from: &str, to: &str) -> Result<()> {
        let inum = self.resolve(to)?;

        let (parent_path, name) = split_path(from);
        let parent = self.resolve(&parent_path)?;

        self.link_entry(parent, name, inum)
    }

    /// Moves the entry at `from` to `to`, replacing whatever `to` named.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let (parent_path, name) = split_path(from);
        let parent = self.resolve(&parent_path)?;

        let (new_parent_path, new_name) = split_path(to);
        let new_parent = self.resolve(&new_parent_path)?;

        self.rename_entry(parent, name, new_parent, new_name)
    }

    pub fn set_time(&mut self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let inum = self.resolve(path)?;
        self.set_inode_times(inum, Some(atime), Some(mtime))
    }

    /// Replaces the permission bits of `path`, keeping its type.
    pub fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
        let inum = self.resolve(path)?;
        self.chmod_inode(inum, mode)
    }

    pub fn list(&self, path: &str) -> Result<Vec<String>> {
        self.volume.list(path)
    }

    /// Checks that `path` exists and refreshes its access time.
    pub fn access(&mut self, path: &str) -> Result<()> {
        let inum = self.resolve(path)?;
        self.access_inode(inum)
    }

    pub fn lookup(&self, parent: InodeNumber, name: &str) -> Result<Option<InodeNumber>> {
        self.check_allocated(parent)?;
        self.volume.lookup(parent, name)
    }

    pub fn attributes(&self, inum: InodeNumber) -> Result<Attributes> {
        self.check_allocated(inum)?;

        let inode = self.volume.read_inode(inum)?;
        Ok(Attributes::new(inum, &inode))
    }

    /// The live entries of the directory `inum`.
    pub fn list_directory(&self, inum: InodeNumber) -> Result<Vec<DirectoryEntry>> {
        self.check_allocated(inum)?;
        self.volume.list_entries(inum)
    }

    pub fn read_inode_data(
        &self,
        inum: InodeNumber,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<usize> {
        self.check_allocated(inum)?;
        debug!("[inode #{inum}] reading {} bytes at {offset}", buf.len());

        let inode = self.volume.read_inode(inum)?;
        self.volume.read_content(&inode, offset, buf)
    }

    pub fn write_inode_data(
        &mut self,
        inum: InodeNumber,
        data: &[u8],
        offset: usize,
    ) -> Result<usize> {
        self.check_allocated(inum)?;
        debug!("[inode #{inum}] writing {} bytes at {offset}", data.len());

        let mut inode = self.volume.read_inode(inum)?;
        let written = self.volume.write_content(&mut inode, offset, data)?;
        inode.modified = now();
        self.volume.write_inode(inum, &inode)?;

        Ok(written)
    }

    pub fn truncate_inode(&mut self, inum: InodeNumber, size: usize) -> Result<()> {
        self.check_allocated(inum)?;
        debug!("[inode #{inum}] truncating to {size}");

        let mut inode = self.volume.read_inode(inum)?;
        self.volume.resize(&mut inode, size)?;
        inode.modified = now();
        self.volume.write_inode(inum, &inode)
    }

    /// Creates `name` in `parent` as a new object with the given mode.
    pub fn create(&mut self, parent: InodeNumber, name: &str, mode: u32) -> Result<InodeNumber> {
        self.check_allocated(parent)?;
        entry_name(name)?;

        if self.volume.lookup(parent, name)?.is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }

        let inum = self.volume.allocate_inode()?;
        self.volume.update_inode(inum, |inode| inode.mode = mode)?;

        if let Err(err) = self.volume.insert_entry(parent, name, inum) {
            self.volume.free_inode(inum)?;
            return Err(err);
        }

        debug!("[inode #{parent}] created {name:?} as inode {inum} (mode {mode:o})");
        Ok(inum)
    }

    /// Removes `name` from `parent`. A directory can only be unlinked once it has no live
    /// entries.
    pub fn unlink_entry(&mut self, parent: InodeNumber, name: &str) -> Result<()> {
        self.check_allocated(parent)?;

        if let Some((_, entry)) = self.volume.find_entry(parent, name)? {
            if self.volume.read_inode(entry.inum)?.is_directory()
                && !self.volume.list_entries(entry.inum)?.is_empty()
            {
                return Err(FsError::DirectoryNotEmpty(name.to_string()));
            }
        }

        let inum = self.volume.remove_entry(parent, name)?;
        debug!("[inode #{parent}] unlinked {name:?} (inode {inum})");

        Ok(())
    }

    /// Removes the directory `name` from `parent`, which must hold no live entries.
    pub fn rmdir_entry(&mut self, parent: InodeNumber, name: &str) -> Result<()> {
        self.check_allocated(parent)?;

        let inum = self
            .volume
            .lookup(parent, name)?
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;

        if inum == ROOT_INODE {
            return Err(FsError::InvalidName(name.to_string()));
        }

        if !self.volume.list_entries(inum)?.is_empty() {
            return Err(FsError::DirectoryNotEmpty(name.to_string()));
        }

        self.unlink_entry(parent, name)
    }

    /// Adds `name` in `parent` as another reference to `inum`.
    pub fn link_entry(
        &mut self,
        parent: InodeNumber,
        name: &str,
        inum: InodeNumber,
    ) -> Result<()> {
        self.check_allocated(parent)?;
        self.check_allocated(inum)?;

        if self.volume.lookup(parent, name)?.is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }

        self.volume.insert_entry(parent, name, inum)?;
        self.volume.update_inode(inum, |inode| inode.refs += 1)?;

        debug!("[inode #{parent}] linked {name:?} to inode {inum}");
        Ok(())
    }

    /// Moves `parent/name` to `new_parent/new_name` as one directory-entry update. An entry
    /// already at the destination is replaced and loses its reference; the moved inode keeps its
    /// reference count.
    pub fn rename_entry(
        &mut self,
        parent: InodeNumber,
        name: &str,
        new_parent: InodeNumber,
        new_name: &str,
    ) -> Result<()> {
        self.check_allocated(parent)?;
        self.check_allocated(new_parent)?;

        let (slot, entry) = self
            .volume
            .find_entry(parent, name)?
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        let moved = DirectoryEntry::new(entry.inum, entry_name(new_name)?);

        if self.volume.read_inode(entry.inum)?.is_directory()
            && self.is_within(new_parent, entry.inum)?
        {
            return Err(FsError::InvalidName(new_name.to_string()));
        }

        match self.volume.find_entry(new_parent, new_name)? {
            Some((_, existing)) if existing.inum == entry.inum => {}
            Some((existing_slot, existing)) => {
                let existing_inode = self.volume.read_inode(existing.inum)?;
                if existing_inode.is_directory()
                    && !self.volume.list_entries(existing.inum)?.is_empty()
                {
                    return Err(FsError::DirectoryNotEmpty(new_name.to_string()));
                }

                self.volume.write_entry(new_parent, existing_slot, &moved)?;
                self.tombstone(parent, slot)?;
                self.volume.release_reference(existing.inum)?;
            }
            None if parent == new_parent => {
                self.volume.write_entry(parent, slot, &moved)?;
            }
            None => {
                self.volume.insert_entry(new_parent, new_name, entry.inum)?;
                self.tombstone(parent, slot)?;
            }
        }

        debug!("renamed {name:?} in inode {parent} to {new_name:?} in inode {new_parent}");
        Ok(())
    }

    /// Overwrites the given timestamps, leaving `None`s alone.
    pub fn set_inode_times(
        &mut self,
        inum: InodeNumber,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<()> {
        self.check_allocated(inum)?;

        self.volume.update_inode(inum, |inode| {
            if let Some(atime) = atime {
                inode.accessed = timestamp(atime);
            }
            if let Some(mtime) = mtime {
                inode.modified = timestamp(mtime);
            }
        })?;

        Ok(())
    }

    pub fn chmod_inode(&mut self, inum: InodeNumber, mode: u32) -> Result<()> {
        self.check_allocated(inum)?;

        self.volume.update_inode(inum, |inode| {
            inode.mode = (inode.mode & S_IFMT) | (mode & !S_IFMT);
        })?;

        Ok(())
    }

    pub fn access_inode(&mut self, inum: InodeNumber) -> Result<()> {
        self.check_allocated(inum)?;

        self.volume.update_inode(inum, |inode| inode.accessed = now())?;

        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        match self.resolve(path) {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Whether `inum` is `dir` itself or lies somewhere beneath it.
    fn is_within(&self, inum: InodeNumber, dir: InodeNumber) -> Result<bool> {
        let mut queue = vec![dir];

        while let Some(current) = queue.pop() {
            if current == inum {
                return Ok(true);
            }

            for entry in self.volume.list_entries(current)? {
                if self.volume.read_inode(entry.inum)?.is_directory() {
                    queue.push(entry.inum);
                }
            }
        }

        Ok(false)
    }

    fn tombstone(&mut self, dir: InodeNumber, slot: usize) -> Result<()> {
        self.volume.write_entry(dir, slot, &FREE_DIRECTORY_ENTRY)
    }

    fn check_allocated(&self, inum: InodeNumber) -> Result<()> {
        if !self.volume.is_inode_allocated(inum) {
            return Err(FsError::InvalidInode(inum));
        }

        Ok(())
    }
}
