use std::ffi::OsStr;
use std::ops::ControlFlow;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow, FUSE_ROOT_ID,
};
use libc::{c_int, EEXIST, EINVAL, RENAME_NOREPLACE};
use log::{debug, error};

use crate::{
    disk_format::{
        block::BLOCK_SIZE,
        inode::{FileKind, InodeNumber, S_IFDIR, S_IFMT, S_IFREG},
    },
    error::{FsError, Result},
    metadata::Attributes,
    nufs::Nufs,
    storage::NufsStorage,
};

/// Serves a [`Nufs`] volume to the kernel.
///
/// FUSE reserves inode 0 and numbers the root 1, so kernel inode numbers are the volume's inode
/// numbers shifted up by one.
pub struct NufsFs<S: NufsStorage> {
    nufs: Nufs<S>,
    first_free_handle: u64,
}

impl<S: NufsStorage> NufsFs<S> {
    const TTL: Duration = Duration::new(1, 0);
    const GENERATION: u64 = 1;

    pub fn new(nufs: Nufs<S>) -> NufsFs<S> {
        NufsFs {
            nufs,
            first_free_handle: 0,
        }
    }

    pub fn into_inner(self) -> Nufs<S> {
        self.nufs
    }

    fn get_attributes(&self, inum: InodeNumber) -> Result<FileAttr> {
        let attributes = self.nufs.attributes(inum)?;
        let ownership_metadata = self
            .nufs
            .volume()
            .storage()
            .ownership_metadata()
            .unwrap_or_default();

        Ok(file_attr(&attributes, ownership_metadata.uid, ownership_metadata.gid))
    }

    fn set_attributes(
        &mut self,
        inum: InodeNumber,
        mode: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> Result<FileAttr> {
        if let Some(mode) = mode {
            self.nufs.chmod_inode(inum, mode)?;
        }

        if let Some(size) = size {
            self.nufs.truncate_inode(inum, size as usize)?;
        }

        if atime.is_some() || mtime.is_some() {
            self.nufs
                .set_inode_times(inum, atime.map(system_time), mtime.map(system_time))?;
        }

        self.get_attributes(inum)
    }

    fn lookup_entry(&self, parent: InodeNumber, name: &str) -> Result<FileAttr> {
        let inum = self
            .nufs
            .lookup(parent, name)?
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;

        self.get_attributes(inum)
    }

    /// Reads up to `size` bytes, stopping at the end of the file.
    fn read_file(&self, inum: InodeNumber, offset: usize, size: usize) -> Result<Vec<u8>> {
        let file_size = self.nufs.attributes(inum)?.size as usize;

        let mut data = vec![0; readable_len(file_size, offset, size)];
        if !data.is_empty() {
            self.nufs.read_inode_data(inum, &mut data, offset)?;
        }

        Ok(data)
    }

    /// The entries of directory `inum` from position `offset`, preceded by `.` and `..`.
    fn read_directory(
        &self,
        inum: InodeNumber,
        offset: usize,
    ) -> Result<Vec<(u64, FileType, String)>> {
        let ino = to_ino(inum);
        let mut listing = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ino, FileType::Directory, "..".to_string()),
        ];

        for entry in self.nufs.list_directory(inum)? {
            let kind = self.nufs.attributes(entry.inum)?.kind;
            listing.push((to_ino(entry.inum), file_type(kind), entry.name.to_string()));
        }

        Ok(listing.into_iter().skip(offset).collect())
    }

    fn write_file(&mut self, inum: InodeNumber, offset: usize, data: &[u8]) -> Result<u32> {
        let write_len = self.nufs.write_inode_data(inum, data, offset)?;
        Ok(write_len as u32)
    }

    fn create_node(&mut self, parent: InodeNumber, name: &str, mode: u32) -> Result<FileAttr> {
        let inum = self.nufs.create(parent, name, mode)?;
        self.get_attributes(inum)
    }

    fn create_hard_link(
        &mut self,
        parent: InodeNumber,
        name: &str,
        inum: InodeNumber,
    ) -> Result<FileAttr> {
        self.nufs.link_entry(parent, name, inum)?;
        self.get_attributes(inum)
    }

    fn assign_file_handle(&mut self) -> u64 {
        let assigned = self.first_free_handle;
        self.first_free_handle += 1;

        assigned
    }
}

impl<S: NufsStorage> Filesystem for NufsFs<S> {
    fn destroy(&mut self) {
        if let Err(err) = self.nufs.sync() {
            error!("failed to sync volume on unmount: {err}");
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let stats = self.nufs.statfs();

        reply.statfs(
            stats.num_blocks as u64,
            stats.free_blocks as u64,
            stats.free_blocks as u64,
            stats.num_inodes as u64,
            stats.free_inodes as u64,
            stats.block_size as u32,
            stats.max_name_len as u32,
            stats.block_size as u32,
        );
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(EINVAL);
            return;
        };

        match self.lookup_entry(to_inum(parent), name) {
            Ok(attr) => reply.entry(&Self::TTL, &attr, Self::GENERATION),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, _mask: i32, reply: ReplyEmpty) {
        match self.nufs.access_inode(to_inum(ino)) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        if let Err(err) = self.nufs.attributes(to_inum(ino)) {
            reply.error(err.errno());
            return;
        }

        let handle = self.assign_file_handle();
        reply.opened(handle, flags as u32);
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.nufs.attributes(to_inum(ino)) {
            Ok(attributes) if attributes.kind == FileKind::Directory => {
                let handle = self.assign_file_handle();
                reply.opened(handle, flags as u32);
            }
            Ok(_) => reply.error(libc::ENOTDIR),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        match self.get_attributes(to_inum(ino)) {
            Ok(attr) => reply.attr(&Self::TTL, &attr),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        match self.set_attributes(to_inum(ino), mode, size, atime, mtime) {
            Ok(attr) => reply.attr(&Self::TTL, &attr),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        match self.read_file(to_inum(ino), offset as usize, size as usize) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let offset = offset as usize;
        let entries = match self.read_directory(to_inum(ino), offset) {
            Ok(entries) => entries,
            Err(err) => {
                reply.error(err.errno());
                return;
            }
        };

        let _ = entries
            .into_iter()
            .enumerate()
            .try_for_each(|(i, (entry_ino, file_type, name))| {
                let is_buffer_full =
                    reply.add(entry_ino, (offset + i + 1) as i64, file_type, name);

                if is_buffer_full {
                    return ControlFlow::Break(());
                }

                ControlFlow::Continue(())
            });

        reply.ok();
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.write_file(to_inum(ino), offset as usize, data) {
            Ok(write_len) => reply.written(write_len),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(EINVAL);
            return;
        };

        let kind = mode & S_IFMT;
        if kind != S_IFREG && kind != S_IFDIR {
            reply.error(libc::EPERM);
            return;
        }

        match self.create_node(to_inum(parent), name, mode & !umask) {
            Ok(attr) => reply.entry(&Self::TTL, &attr, Self::GENERATION),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(EINVAL);
            return;
        };

        let mode = ((mode & !umask) & !S_IFMT) | S_IFREG;
        match self.create_node(to_inum(parent), name, mode) {
            Ok(attr) => {
                let handle = self.assign_file_handle();
                reply.created(&Self::TTL, &attr, Self::GENERATION, handle, flags as u32);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(EINVAL);
            return;
        };

        let mode = ((mode & !umask) & !S_IFMT) | S_IFDIR;
        match self.create_node(to_inum(parent), name, mode) {
            Ok(attr) => reply.entry(&Self::TTL, &attr, Self::GENERATION),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let Some(name) = newname.to_str() else {
            reply.error(EINVAL);
            return;
        };

        match self.create_hard_link(to_inum(newparent), name, to_inum(ino)) {
            Ok(attr) => reply.entry(&Self::TTL, &attr, Self::GENERATION),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(EINVAL);
            return;
        };

        match self.nufs.unlink_entry(to_inum(parent), name) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(EINVAL);
            return;
        };

        match self.nufs.rmdir_entry(to_inum(parent), name) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(name), Some(new_name)) = (name.to_str(), newname.to_str()) else {
            reply.error(EINVAL);
            return;
        };

        let destination_exists = match self.nufs.lookup(to_inum(newparent), new_name) {
            Ok(found) => found.is_some(),
            Err(err) => {
                reply.error(err.errno());
                return;
            }
        };
        if let Err(errno) = check_rename_flags(flags, destination_exists) {
            reply.error(errno);
            return;
        }

        debug!("rename {name:?} in {parent} to {new_name:?} in {newparent}");
        match self
            .nufs
            .rename_entry(to_inum(parent), name, to_inum(newparent), new_name)
        {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }
}

/// Decides whether a rename with `flags` may go ahead. Only `RENAME_NOREPLACE` is supported.
fn check_rename_flags(flags: u32, destination_exists: bool) -> Result<(), c_int> {
    if flags & !RENAME_NOREPLACE != 0 {
        return Err(EINVAL);
    }

    if flags & RENAME_NOREPLACE != 0 && destination_exists {
        return Err(EEXIST);
    }

    Ok(())
}

fn to_inum(ino: u64) -> InodeNumber {
    InodeNumber(ino.wrapping_sub(FUSE_ROOT_ID) as u32)
}

fn to_ino(inum: InodeNumber) -> u64 {
    inum.0 as u64 + FUSE_ROOT_ID
}

fn file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::Directory => FileType::Directory,
        FileKind::Regular => FileType::RegularFile,
    }
}

fn system_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(time) => time,
        TimeOrNow::Now => SystemTime::now(),
    }
}

/// How many bytes a read of `size` bytes at `offset` returns from a `file_size`-byte file.
fn readable_len(file_size: usize, offset: usize, size: usize) -> usize {
    file_size.saturating_sub(offset).min(size)
}

fn file_attr(attributes: &Attributes, uid: u32, gid: u32) -> FileAttr {
    FileAttr {
        ino: to_ino(attributes.inum),
        size: attributes.size,
        blocks: attributes.blocks,
        atime: attributes.atime,
        mtime: attributes.mtime,
        ctime: attributes.mtime,
        crtime: attributes.crtime,
        kind: file_type(attributes.kind),
        perm: (attributes.mode & 0o7777) as u16,
        nlink: attributes.nlink,
        uid,
        gid,
        rdev: 0,
        flags: 0,
        blksize: BLOCK_SIZE as u32,
    }
}

#[cfg(test)]
mod tests {
    use crate::disk_format::header::Geometry;
    use crate::disk_format::inode::ROOT_INODE;
    use crate::storage::MemoryStorage;

    use super::*;

    fn fs() -> NufsFs<MemoryStorage> {
        NufsFs::new(Nufs::format(MemoryStorage::new(256), Geometry::default()).unwrap())
    }

    #[test]
    fn test_root_maps_to_fuse_root() {
        assert_eq!(to_ino(ROOT_INODE), FUSE_ROOT_ID);
        assert_eq!(to_inum(FUSE_ROOT_ID), ROOT_INODE);
        assert_eq!(to_inum(to_ino(InodeNumber(41))), InodeNumber(41));
    }

    #[test]
    fn test_rename_flags() {
        assert_eq!(check_rename_flags(0, false), Ok(()));
        assert_eq!(check_rename_flags(0, true), Ok(()));
        assert_eq!(check_rename_flags(RENAME_NOREPLACE, false), Ok(()));
        assert_eq!(check_rename_flags(RENAME_NOREPLACE, true), Err(EEXIST));
        assert_eq!(check_rename_flags(libc::RENAME_EXCHANGE, true), Err(EINVAL));
        assert_eq!(check_rename_flags(libc::RENAME_WHITEOUT, false), Err(EINVAL));
    }

    #[test]
    fn test_readable_len_stops_at_end_of_file() {
        assert_eq!(readable_len(100, 0, 4096), 100);
        assert_eq!(readable_len(100, 90, 4096), 10);
        assert_eq!(readable_len(100, 100, 4096), 0);
        assert_eq!(readable_len(100, 200, 4096), 0);
        assert_eq!(readable_len(10_000, 0, 4096), 4096);
    }

    #[test]
    fn test_attributes() {
        let mut fs = fs();
        let inum = fs.nufs.mknod("/file", S_IFREG | 0o640).unwrap();
        fs.nufs.write("/file", b"contents", 0).unwrap();

        let attr = fs.get_attributes(inum).unwrap();
        assert_eq!(attr.ino, to_ino(inum));
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o640);
        assert_eq!(attr.size, 8);
        assert_eq!(attr.nlink, 1);
    }

    #[test]
    fn test_read_file_clamps_to_size() {
        let mut fs = fs();
        let inum = fs.nufs.mknod("/file", S_IFREG | 0o644).unwrap();
        fs.nufs.write("/file", b"0123456789", 0).unwrap();

        assert_eq!(fs.read_file(inum, 6, 4096).unwrap(), b"6789");
        assert!(fs.read_file(inum, 10, 4096).unwrap().is_empty());
    }

    #[test]
    fn test_read_directory_lists_dot_entries() {
        let mut fs = fs();
        let dir = fs.nufs.mkdir("/dir", 0o755).unwrap();
        let file = fs.nufs.mknod("/dir/file", S_IFREG | 0o644).unwrap();

        let listing = fs.read_directory(dir, 0).unwrap();
        let names: Vec<_> = listing.iter().map(|(_, _, name)| name.as_str()).collect();
        assert_eq!(names, [".", "..", "file"]);
        assert_eq!(listing[2].0, to_ino(file));
        assert_eq!(listing[2].1, FileType::RegularFile);

        assert_eq!(fs.read_directory(dir, 2).unwrap().len(), 1);
    }

    #[test]
    fn test_set_attributes() {
        let mut fs = fs();
        let inum = fs.nufs.mknod("/file", S_IFREG | 0o644).unwrap();
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(86_400);

        let attr = fs
            .set_attributes(
                inum,
                Some(0o600),
                Some(5000),
                None,
                Some(TimeOrNow::SpecificTime(mtime)),
            )
            .unwrap();

        assert_eq!(attr.perm, 0o600);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.size, 5000);
        assert_eq!(attr.mtime, mtime);
    }
}
