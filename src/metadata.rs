use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::disk_format::inode::{FileKind, Inode, InodeNumber};

/// The attributes reported by `stat`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub inum: InodeNumber,
    /// Number of directory entries referring to the object.
    pub nlink: u32,
    pub size: u64,
    /// File type and permission bits.
    pub mode: u32,
    pub kind: FileKind,
    /// Number of data blocks backing the content.
    pub blocks: u64,
    pub crtime: SystemTime,
    pub atime: SystemTime,
    pub mtime: SystemTime,
}

impl Attributes {
    pub(crate) fn new(inum: InodeNumber, inode: &Inode) -> Self {
        Self {
            inum,
            nlink: inode.refs,
            size: inode.size as u64,
            mode: inode.mode,
            kind: inode.kind(),
            blocks: inode.span_count() as u64,
            crtime: to_system_time(inode.created),
            atime: to_system_time(inode.accessed),
            mtime: to_system_time(inode.modified),
        }
    }
}

/// The owner reported for every object in the volume.
#[derive(Default)]
pub struct OwnershipMetadata {
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
}

/// Seconds since the Unix epoch, as stored in inodes.
pub(crate) fn timestamp(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    }
}

pub(crate) fn now() -> i64 {
    timestamp(SystemTime::now())
}

pub(crate) fn to_system_time(seconds: i64) -> SystemTime {
    if seconds >= 0 {
        UNIX_EPOCH + Duration::from_secs(seconds as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(seconds.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_truncate_to_seconds() {
        let time = UNIX_EPOCH + Duration::new(1_700_000_000, 999_000_000);

        assert_eq!(timestamp(time), 1_700_000_000);
        assert_eq!(
            to_system_time(1_700_000_000),
            UNIX_EPOCH + Duration::from_secs(1_700_000_000)
        );
    }

    #[test]
    fn test_pre_epoch_timestamps() {
        let time = UNIX_EPOCH - Duration::from_secs(60);

        assert_eq!(timestamp(time), -60);
        assert_eq!(to_system_time(-60), time);
    }
}
