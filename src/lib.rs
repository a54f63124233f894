mod check;
mod directory;
pub mod disk_format;
pub mod error;
#[cfg(feature = "fuse")]
pub mod fuse;
mod inode_table;
pub mod metadata;
pub mod nufs;
pub mod path;
pub mod storage;
pub mod volume;

pub use directory::entry_name;
pub use disk_format::header::Geometry;
pub use disk_format::inode::{FileKind, InodeNumber};
pub use error::{FsError, Result};
pub use metadata::Attributes;
pub use nufs::{FsStats, Nufs};
pub use volume::Volume;
