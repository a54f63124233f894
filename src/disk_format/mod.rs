/// Perform a const assertion.
macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    }
}

/// NUFS blocks and block numbers.
pub mod block;
/// Directory entries and entry names.
pub mod directory_entry;
/// The filesystem header and volume geometry.
pub mod header;
/// Inodes, inode numbers and span addressing.
pub mod inode;
