use std::fmt::{self, Debug};
use std::mem::size_of;

use serde::{Deserialize, Serialize};

use super::block::BLOCK_SIZE;
use super::inode::InodeNumber;

/// The number of bytes occupied by a directory entry.
pub const DIRECTORY_ENTRY_SIZE: usize = 64;
const_assert!(size_of::<DirectoryEntry>() == DIRECTORY_ENTRY_SIZE);

const_assert!(BLOCK_SIZE % DIRECTORY_ENTRY_SIZE == 0);
/// The number of directory entries that fit in a block.
pub const DIRECTORY_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIRECTORY_ENTRY_SIZE;

/// The maximum supported length of a file or directory name in bytes.
pub const MAX_NAME_LEN: usize = 32;
const_assert!(size_of::<DirectoryEntryName>() == MAX_NAME_LEN);

/// A tombstoned slot.
pub const FREE_DIRECTORY_ENTRY: DirectoryEntry = DirectoryEntry {
    name: DirectoryEntryName([0; MAX_NAME_LEN]),
    inum: InodeNumber(0),
    used: false,
    padding: [0; 27],
};

/// A directory entry. A slot with `used == false` is a tombstone: skipped by lookups and
/// available for the next insertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(C)]
pub struct DirectoryEntry {
    /// The name of the entry.
    pub name: DirectoryEntryName,
    /// The inode number.
    pub inum: InodeNumber,
    pub used: bool,
    pub padding: [u8; 27],
}

impl DirectoryEntry {
    /// Constructs a new live [`DirectoryEntry`].
    pub fn new(inum: InodeNumber, name: DirectoryEntryName) -> DirectoryEntry {
        DirectoryEntry {
            name,
            inum,
            used: true,
            padding: [0; 27],
        }
    }
}

/// A name, as used in [`DirectoryEntry`].
///
/// Names are NUL-padded and at most [`MAX_NAME_LEN`] bytes long; a name that fills the whole
/// field has no terminator.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(C)]
pub struct DirectoryEntryName([u8; MAX_NAME_LEN]);

impl DirectoryEntryName {
    /// Encodes `name`, or returns `None` if it does not fit.
    pub fn new(name: &str) -> Option<Self> {
        let bytes = name.as_bytes();
        if bytes.len() > MAX_NAME_LEN {
            return None;
        }

        let mut converted = [0; MAX_NAME_LEN];
        converted[..bytes.len()].copy_from_slice(bytes);

        Some(DirectoryEntryName(converted))
    }

    /// The stored bytes up to the first NUL.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self
            .0
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_NAME_LEN);

        &self.0[..len]
    }

    pub fn matches(&self, name: &str) -> bool {
        self.as_bytes() == name.as_bytes()
    }
}

impl Debug for DirectoryEntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DirectoryEntryName")
            .field(&String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

impl fmt::Display for DirectoryEntryName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serialized_size() {
        let entry = DirectoryEntry::new(InodeNumber(7), DirectoryEntryName::new("foo").unwrap());
        let bytes = bincode::serialize(&entry).unwrap();

        assert_eq!(bytes.len(), DIRECTORY_ENTRY_SIZE);
        assert_eq!(&bytes[..3], b"foo");
        assert_eq!(bincode::serialize(&FREE_DIRECTORY_ENTRY).unwrap(), [0; 64]);
    }

    #[test]
    fn test_name_too_long() {
        assert!(DirectoryEntryName::new(&"x".repeat(MAX_NAME_LEN)).is_some());
        assert!(DirectoryEntryName::new(&"x".repeat(MAX_NAME_LEN + 1)).is_none());
    }

    #[test]
    fn test_full_length_name_round_trips() {
        let long = "y".repeat(MAX_NAME_LEN);
        let name = DirectoryEntryName::new(&long).unwrap();

        assert!(name.matches(&long));
        assert_eq!(name.to_string(), long);
    }

    #[test]
    fn test_matching_is_exact() {
        let name = DirectoryEntryName::new("notes").unwrap();

        assert!(name.matches("notes"));
        assert!(!name.matches("note"));
        assert!(!name.matches("notes.txt"));
        assert!(!name.matches("Notes"));
    }
}
