use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::build::Result;
use crate::udf::{FileEntry, FileIdentifierDescriptor, Timestamp};

/// Digests of one packaged file, filled in while its bytes are streamed
/// into the image.
#[derive(Clone)]
pub struct FileDigests {
    pub hashed_bytes: u64,
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
    pub sha256: [u8; 32],
}

/// One scanned inode: a directory or a regular file.
pub struct FileNode {
    /// positive, monotonically increasing in scan order
    pub id: u64,
    /// 0 for entries directly under the source root
    pub parent: u64,
    pub name: String,
    pub abspath: PathBuf,
    /// host size in bytes; forced to 0 for directories
    pub size: u64,
    /// UDF file characteristics; bit 1 set for directories
    pub characteristics: u8,
    pub permissions: u32,
    pub atime: Timestamp,
    pub ctime: Timestamp,
    pub mtime: Timestamp,
    pub digests: Option<FileDigests>,
}

impl FileNode {
    pub fn is_dir(&self) -> bool {
        self.characteristics & FileIdentifierDescriptor::FILE_CHARACTERISTIC_DIRECTORY != 0
    }
}

/// The scanned source tree: id → node, ordered so that all siblings share
/// contiguous ids starting at the parent's first-child id.
#[derive(Default)]
pub struct FileList {
    nodes: BTreeMap<u64, FileNode>,
    /// parent id → id of its first child; absent for childless directories
    first_child: BTreeMap<u64, u64>,
    /// running sum of regular-file sizes
    pub total_content_bytes: u64,
}

impl FileList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id in sequential order; ids start at 1.
    pub fn alloc_id(&self) -> u64 {
        match self.nodes.last_key_value() {
            Some((&id, _)) => id + 1,
            None => 1,
        }
    }

    pub fn insert(&mut self, node: FileNode) {
        self.nodes.insert(node.id, node);
    }

    pub fn record_first_child(&mut self, parent_id: u64, first_child_id: u64) {
        self.first_child.insert(parent_id, first_child_id);
    }

    pub fn get(&self, id: u64) -> Option<&FileNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut FileNode> {
        self.nodes.get_mut(&id)
    }

    pub fn children(&self, parent_id: u64) -> impl Iterator<Item = &FileNode> + '_ {
        let first = self.first_child.get(&parent_id).copied();
        self.nodes
            .range(first.unwrap_or(u64::MAX)..)
            .map(|(_, n)| n)
            .take_while(move |n| n.parent == parent_id)
    }

    pub fn subdirectory_count(&self, parent_id: u64) -> u16 {
        self.children(parent_id).filter(|n| n.is_dir()).count() as u16
    }
}

/// Scan the source tree breadth-last: enumerate one directory completely,
/// then descend into its subdirectories in enumeration order, so that all
/// siblings get contiguous ids.
pub fn scan(root: &Path) -> Result<FileList> {
    let mut list = FileList::new();
    scan_directory(&mut list, root, 0, true)?;
    Ok(list)
}

fn scan_directory(list: &mut FileList, dir: &Path, parent_id: u64, is_root: bool) -> Result<()> {
    let reader = match fs::read_dir(dir) {
        Ok(r) => r,
        Err(e) if is_root => return Err(e.into()),
        Err(e) => {
            warn!("cannot read directory {}, ignoring: {}", dir.display(), e);
            return Ok(());
        }
    };

    // Sort by name so two runs over the same tree lay the image out
    // identically regardless of readdir order.
    let mut entries: Vec<fs::DirEntry> = Vec::new();
    for entry in reader {
        match entry {
            Ok(e) => entries.push(e),
            Err(e) => warn!("cannot read entry in {}, ignoring: {}", dir.display(), e),
        }
    }
    entries.sort_by_key(|e| e.file_name());

    let mut first_child: Option<u64> = None;
    let mut deferred: Vec<u64> = Vec::new();
    for entry in entries {
        let abspath = entry.path();
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(n) => {
                warn!("{:?} is not valid UTF-8, ignoring", n);
                continue;
            }
        };
        // a compressed file identifier must fit a one-byte length field
        if name.len() > 254 {
            warn!("{} has a name longer than 254 bytes, ignoring", name);
            continue;
        }
        // lstat: symbolic links are rejected, not followed
        let meta = match fs::symlink_metadata(&abspath) {
            Ok(m) => m,
            Err(e) => {
                warn!("cannot stat {}, ignoring: {}", abspath.display(), e);
                continue;
            }
        };
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            warn!(
                "{} is a symbolic link, which is not supported yet",
                abspath.display()
            );
            continue;
        }
        if !file_type.is_file() && !file_type.is_dir() {
            warn!("{} is not a file, ignoring", abspath.display());
            continue;
        }

        let is_dir = file_type.is_dir();
        // it's pretty silly to associate size with directories
        let size = if is_dir { 0 } else { meta.len() };

        let id = list.alloc_id();
        let node = FileNode {
            id,
            parent: parent_id,
            name,
            abspath,
            size,
            characteristics: if is_dir {
                FileIdentifierDescriptor::FILE_CHARACTERISTIC_DIRECTORY
            } else {
                0
            },
            permissions: FileEntry::PERMISSIONS_DEFAULT,
            atime: Timestamp::from_unix(meta.atime()),
            ctime: Timestamp::from_unix(meta.ctime()),
            mtime: Timestamp::from_unix(meta.mtime()),
            digests: None,
        };
        debug!("scan: #{} {} ({} bytes)", id, node.abspath.display(), size);
        list.insert(node);

        if is_dir {
            deferred.push(id);
        } else {
            list.total_content_bytes += size;
        }
        if first_child.is_none() {
            first_child = Some(id);
        }
    }

    if let Some(first) = first_child {
        list.record_first_child(parent_id, first);
    }

    for dir_id in deferred {
        let path = match list.get(dir_id) {
            Some(n) => n.abspath.clone(),
            None => continue,
        };
        scan_directory(list, &path, dir_id, false)?;
    }

    Ok(())
}
