use tempfile::NamedTempFile;

use nufs::disk_format::block::BLOCK_SIZE;
use nufs::disk_format::inode::S_IFREG;
use nufs::storage::{FileBackedStorage, MemoryStorage};
use nufs::{FsError, Geometry, Nufs};

const FILE_MODE: u32 = S_IFREG | 0o644;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn contents_survive_remount() {
    let tf = NamedTempFile::new().unwrap();
    let geometry = Geometry::default();

    {
        let storage = FileBackedStorage::open_or_create(tf.path(), geometry.num_blocks).unwrap();
        let mut nufs = Nufs::open_or_format(storage, geometry).unwrap();

        nufs.mkdir("/docs", 0o755).unwrap();
        nufs.mknod("/docs/notes", FILE_MODE).unwrap();
        nufs.write("/docs/notes", &pattern(10_000), 0).unwrap();
        nufs.link("/notes", "/docs/notes").unwrap();
        nufs.sync().unwrap();
    }

    let storage = FileBackedStorage::open_or_create(tf.path(), geometry.num_blocks).unwrap();
    let nufs = Nufs::open_or_format(storage, geometry).unwrap();

    assert_eq!(nufs.list("/").unwrap(), ["docs", "notes"]);
    assert_eq!(nufs.stat("/notes").unwrap().nlink, 2);

    let mut buf = vec![0; 10_000];
    nufs.read("/docs/notes", &mut buf, 0).unwrap();
    assert_eq!(buf, pattern(10_000));

    assert!(nufs.volume().check().unwrap().is_empty());
}

#[test]
fn unformatted_image_is_rejected() {
    let tf = NamedTempFile::new().unwrap();
    let storage = FileBackedStorage::open_or_create(tf.path(), 64).unwrap();

    assert!(matches!(Nufs::open(storage), Err(FsError::Corrupt(_))));
}

#[test]
fn ten_thousand_byte_file() {
    let mut nufs = Nufs::format(MemoryStorage::new(256), Geometry::default()).unwrap();
    let free = nufs.statfs().free_blocks;

    nufs.mknod("/foo", FILE_MODE).unwrap();
    assert_eq!(nufs.write("/foo", &pattern(10_000), 0).unwrap(), 10_000);

    let attr = nufs.stat("/foo").unwrap();
    assert_eq!(attr.size, 10_000);
    assert_eq!(attr.blocks, 3);
    // three data blocks plus the indirect block
    assert_eq!(nufs.statfs().free_blocks, free - 4);

    let mut buf = vec![0; 100];
    nufs.read("/foo", &mut buf, 9_900).unwrap();
    assert_eq!(buf, pattern(10_000)[9_900..]);

    nufs.truncate("/foo", 0).unwrap();
    assert_eq!(nufs.statfs().free_blocks, free - 1);

    nufs.unlink("/foo").unwrap();
    assert_eq!(nufs.statfs().free_blocks, free);
    assert!(nufs.volume().check().unwrap().is_empty());
}

#[test]
fn inode_exhaustion_leaves_no_partial_state() {
    let geometry = Geometry {
        num_blocks: 64,
        num_inodes: 8,
    };
    let mut nufs = Nufs::format(MemoryStorage::new(64), geometry).unwrap();

    // the root takes the first inode
    for i in 0..7 {
        nufs.mknod(&format!("/f{i}"), FILE_MODE).unwrap();
    }
    let free_blocks = nufs.statfs().free_blocks;

    assert!(matches!(
        nufs.mknod("/one-too-many", FILE_MODE),
        Err(FsError::NoFreeInodes)
    ));

    assert_eq!(nufs.statfs().free_inodes, 0);
    assert_eq!(nufs.statfs().free_blocks, free_blocks);
    assert_eq!(nufs.list("/").unwrap().len(), 7);
    assert!(matches!(nufs.stat("/one-too-many"), Err(FsError::NotFound(_))));
    assert!(nufs.volume().check().unwrap().is_empty());

    nufs.unlink("/f3").unwrap();
    nufs.mknod("/one-too-many", FILE_MODE).unwrap();
}

#[test]
fn block_exhaustion_is_all_or_nothing() {
    let geometry = Geometry {
        num_blocks: 64,
        num_inodes: 8,
    };
    let mut nufs = Nufs::format(MemoryStorage::new(64), geometry).unwrap();
    nufs.mknod("/big", FILE_MODE).unwrap();
    let free = nufs.statfs().free_blocks;

    assert!(matches!(
        nufs.write("/big", &pattern(100 * BLOCK_SIZE), 0),
        Err(FsError::NoFreeBlocks)
    ));
    assert_eq!(nufs.stat("/big").unwrap().size, 0);
    assert_eq!(nufs.statfs().free_blocks, free);

    // every remaining block: the new spans plus the indirect block
    nufs.write("/big", &pattern(free * BLOCK_SIZE), 0).unwrap();
    assert_eq!(nufs.statfs().free_blocks, 0);
    assert!(nufs.volume().check().unwrap().is_empty());
}

#[test]
fn directory_tree_operations() {
    let mut nufs = Nufs::format(MemoryStorage::new(256), Geometry::default()).unwrap();

    nufs.mkdir("/a", 0o755).unwrap();
    nufs.mkdir("/a/b", 0o755).unwrap();
    nufs.mknod("/a/b/c", FILE_MODE).unwrap();
    nufs.write("/a/b/c", b"deep", 0).unwrap();

    nufs.rename("/a/b", "/b").unwrap();
    assert!(nufs.list("/a").unwrap().is_empty());
    assert_eq!(nufs.list("/b").unwrap(), ["c"]);

    assert!(matches!(nufs.rmdir("/b"), Err(FsError::DirectoryNotEmpty(_))));
    nufs.unlink("/b/c").unwrap();
    nufs.rmdir("/b").unwrap();
    nufs.rmdir("/a").unwrap();

    assert!(nufs.list("/").unwrap().is_empty());
    assert_eq!(nufs.statfs().free_inodes, Geometry::default().num_inodes - 1);
    assert!(nufs.volume().check().unwrap().is_empty());
}
