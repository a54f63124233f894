/// File-backed NUFS storage.
mod file;
/// Memory-backed NUFS storage.
mod memory;
/// The NUFS storage abstraction.
mod nufs_storage;

pub use file::*;
pub use memory::*;
pub use nufs_storage::*;
