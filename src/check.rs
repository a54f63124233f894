//! Offline consistency checking of a volume.

use std::collections::{HashMap, HashSet};

use log::{info, warn};

use crate::disk_format::{
    block::BlockNumber,
    directory_entry::DIRECTORY_ENTRY_SIZE,
    inode::{InodeNumber, MAX_FILE_SIZE, NUM_DIRECT, ROOT_INODE},
};
use crate::error::Result;
use crate::storage::NufsStorage;
use crate::volume::Volume;

impl<S: NufsStorage> Volume<S> {
    /// Walks the directory tree from the root and reports every inconsistency found.
    ///
    /// An empty list means the volume is consistent: every reachable inode is allocated and owns
    /// exactly the blocks its size calls for, no block has two owners, the bitmaps mark exactly
    /// the reachable inodes and their blocks, directory names are unique and reference counts
    /// match the number of entries naming each inode.
    pub fn check(&self) -> Result<Vec<String>> {
        let geometry = self.geometry();
        let mut problems = Vec::new();

        let mut queue = vec![ROOT_INODE];
        let mut seen = HashSet::from([ROOT_INODE]);
        // the root is referenced by the volume itself
        let mut references = HashMap::from([(ROOT_INODE, 1u32)]);
        let mut block_owners = HashMap::<BlockNumber, InodeNumber>::new();

        while let Some(inum) = queue.pop() {
            if !self.is_inode_allocated(inum) {
                problems.push(format!("inode {inum} is reachable but not allocated"));
                continue;
            }

            let inode = self.read_inode(inum)?;

            if inode.size() > MAX_FILE_SIZE {
                problems.push(format!(
                    "inode {inum} size {} exceeds the maximum file size",
                    inode.size
                ));
                continue;
            }

            let blocks = self.owned_blocks(&inode)?;
            let spans = inode.span_count();
            let expected = spans + usize::from(spans > NUM_DIRECT);
            if blocks.len() != expected {
                problems.push(format!(
                    "inode {inum} owns {} blocks but its {}-byte size needs {expected}",
                    blocks.len(),
                    inode.size
                ));
            }

            for block_number in blocks {
                if block_number.index() < geometry.first_data_block()
                    || block_number.index() >= geometry.num_blocks
                {
                    problems.push(format!(
                        "inode {inum} points at block {block_number} outside the data region"
                    ));
                    continue;
                }

                if !self.is_block_allocated(block_number) {
                    problems.push(format!(
                        "block {block_number} of inode {inum} is marked free"
                    ));
                }

                if let Some(owner) = block_owners.insert(block_number, inum) {
                    problems.push(format!(
                        "block {block_number} is owned by both inode {owner} and inode {inum}"
                    ));
                }
            }

            if !inode.is_directory() {
                continue;
            }

            if inode.size() % DIRECTORY_ENTRY_SIZE != 0 {
                problems.push(format!(
                    "directory {inum} size {} is not a multiple of {DIRECTORY_ENTRY_SIZE}",
                    inode.size
                ));
                continue;
            }

            let mut names = HashSet::new();
            for entry in self.list_entries(inum)? {
                if entry.inum.index() >= geometry.num_inodes {
                    problems.push(format!(
                        "directory {inum} entry {} names invalid inode {}",
                        entry.name, entry.inum
                    ));
                    continue;
                }

                if !names.insert(entry.name.to_string()) {
                    problems.push(format!(
                        "directory {inum} holds {} more than once",
                        entry.name
                    ));
                }

                *references.entry(entry.inum).or_default() += 1;

                if seen.insert(entry.inum) {
                    queue.push(entry.inum);
                }
            }
        }

        for (&inum, &count) in &references {
            if !self.is_inode_allocated(inum) {
                continue;
            }

            let refs = self.read_inode(inum)?.refs;
            if refs != count {
                problems.push(format!(
                    "inode {inum} records {refs} references but {count} entries name it"
                ));
            }
        }

        for index in 0..geometry.num_inodes {
            let inum = InodeNumber(index as u32);
            if self.is_inode_allocated(inum) && !seen.contains(&inum) {
                problems.push(format!("inode {inum} is allocated but unreachable"));
            }
        }

        for index in geometry.first_data_block()..geometry.num_blocks {
            let block_number = BlockNumber(index as u32);
            if self.is_block_allocated(block_number) && !block_owners.contains_key(&block_number)
            {
                problems.push(format!("block {block_number} is allocated but unowned"));
            }
        }

        for problem in &problems {
            warn!("{problem}");
        }
        info!(
            "checked {} inodes and {} blocks: {} problems",
            seen.len(),
            block_owners.len(),
            problems.len()
        );

        Ok(problems)
    }
}

#[cfg(test)]
mod tests {
    use crate::disk_format::header::Geometry;
    use crate::disk_format::inode::{S_IFDIR, S_IFREG};
    use crate::storage::MemoryStorage;

    use super::*;

    fn volume() -> Volume<MemoryStorage> {
        Volume::format(MemoryStorage::new(256), Geometry::default()).unwrap()
    }

    fn add_node(
        volume: &mut Volume<MemoryStorage>,
        dir: InodeNumber,
        name: &str,
        mode: u32,
    ) -> InodeNumber {
        let inum = volume.allocate_inode().unwrap();
        volume.update_inode(inum, |inode| inode.mode = mode).unwrap();
        volume.insert_entry(dir, name, inum).unwrap();
        inum
    }

    #[test]
    fn test_fresh_volume_is_consistent() {
        assert!(volume().check().unwrap().is_empty());
    }

    #[test]
    fn test_populated_volume_is_consistent() {
        let mut volume = volume();
        let dir = add_node(&mut volume, ROOT_INODE, "dir", S_IFDIR | 0o755);
        let file = add_node(&mut volume, dir, "file", S_IFREG | 0o644);

        let mut inode = volume.read_inode(file).unwrap();
        volume.write_content(&mut inode, 0, &[1; 20_000]).unwrap();
        volume.write_inode(file, &inode).unwrap();

        volume.insert_entry(ROOT_INODE, "alias", file).unwrap();
        volume.update_inode(file, |inode| inode.refs += 1).unwrap();

        assert_eq!(volume.check().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_reference_count_mismatch() {
        let mut volume = volume();
        let file = add_node(&mut volume, ROOT_INODE, "file", S_IFREG | 0o644);
        volume.update_inode(file, |inode| inode.refs = 3).unwrap();

        let problems = volume.check().unwrap();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("references"));
    }

    #[test]
    fn test_unreachable_inode() {
        let mut volume = volume();
        volume.allocate_inode().unwrap();

        let problems = volume.check().unwrap();
        assert!(problems.iter().any(|p| p.contains("unreachable")));
        assert!(problems.iter().any(|p| p.contains("unowned")));
    }

    #[test]
    fn test_leaked_block() {
        let mut volume = volume();
        volume.allocate_block().unwrap();

        let problems = volume.check().unwrap();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("unowned"));
    }

    #[test]
    fn test_shared_block() {
        let mut volume = volume();
        let a = add_node(&mut volume, ROOT_INODE, "a", S_IFREG | 0o644);
        let b = add_node(&mut volume, ROOT_INODE, "b", S_IFREG | 0o644);

        let stolen = volume.read_inode(a).unwrap().direct[0];
        let orphaned = volume.read_inode(b).unwrap().direct[0];
        volume.update_inode(b, |inode| inode.direct[0] = stolen).unwrap();

        let problems = volume.check().unwrap();
        assert!(problems.iter().any(|p| p.contains("owned by both")));
        assert!(problems
            .iter()
            .any(|p| p.contains(&format!("block {orphaned} is allocated but unowned"))));
    }

    #[test]
    fn test_duplicate_names() {
        let mut volume = volume();
        let file = add_node(&mut volume, ROOT_INODE, "same", S_IFREG | 0o644);
        volume.insert_entry(ROOT_INODE, "same", file).unwrap();
        volume.update_inode(file, |inode| inode.refs += 1).unwrap();

        let problems = volume.check().unwrap();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("more than once"));
    }
}
