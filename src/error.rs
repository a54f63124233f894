use libc::c_int;
use thiserror::Error;

use crate::disk_format::block::BlockNumber;
use crate::disk_format::inode::InodeNumber;

pub type Result<T, E = FsError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("file exists: {0}")]
    AlreadyExists(String),
    #[error("no more free inodes")]
    NoFreeInodes,
    #[error("no more free blocks")]
    NoFreeBlocks,
    #[error("range {offset}..{end} is outside the {size}-byte file")]
    InvalidOffset {
        offset: usize,
        end: usize,
        size: usize,
    },
    #[error("{0} bytes exceeds the maximum file size")]
    FileTooLarge(usize),
    #[error("name is too long: {0}")]
    NameTooLong(String),
    #[error("invalid entry name: {0:?}")]
    InvalidName(String),
    #[error("inode is not a directory: {0}")]
    NotADirectory(InodeNumber),
    #[error("directory is not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("invalid inode number: {0}")]
    InvalidInode(InodeNumber),
    #[error("invalid block number: {0}")]
    InvalidBlock(BlockNumber),
    #[error("corrupt image: {0}")]
    Corrupt(String),
    #[error("unusable volume geometry: {0}")]
    InvalidGeometry(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
    #[error("encoding on-disk structure")]
    Codec(#[from] bincode::Error),
}

impl FsError {
    /// The errno reported to the kernel for this error.
    pub fn errno(&self) -> c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NoFreeInodes | FsError::NoFreeBlocks => libc::ENOSPC,
            FsError::InvalidOffset { .. } => libc::EINVAL,
            FsError::FileTooLarge(_) => libc::EFBIG,
            FsError::NameTooLong(_) => libc::ENAMETOOLONG,
            FsError::InvalidName(_) | FsError::InvalidGeometry(_) => libc::EINVAL,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            FsError::InvalidInode(_) => libc::ENOENT,
            FsError::InvalidBlock(_) | FsError::Corrupt(_) => libc::EIO,
            FsError::Storage(_) | FsError::Codec(_) => libc::EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound("/a".into()).errno(), libc::ENOENT);
        assert_eq!(FsError::AlreadyExists("/a".into()).errno(), libc::EEXIST);
        assert_eq!(FsError::NoFreeInodes.errno(), libc::ENOSPC);
        assert_eq!(FsError::NoFreeBlocks.errno(), libc::ENOSPC);
        assert_eq!(FsError::DirectoryNotEmpty("/d".into()).errno(), libc::ENOTEMPTY);
        assert_eq!(
            FsError::Storage(anyhow::anyhow!("short read")).errno(),
            libc::EIO
        );
    }
}
