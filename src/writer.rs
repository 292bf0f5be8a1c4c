use std::fs::File;
use std::io::{self, Read, Write};

use log::warn;
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::Sha256;

use crate::build::{Layout, Result, UdfError};
use crate::extent::ExtentSource;
use crate::scan::{FileDigests, FileList};
use crate::udf::SECTOR_SIZE;

/// Whole-image digests and the number of sectors streamed.
#[derive(Debug)]
pub struct ImageDigests {
    pub sectors: u64,
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
    pub sha256: [u8; 32],
}

struct HasherTriple {
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
}

impl HasherTriple {
    fn new() -> Self {
        Self {
            md5: Md5::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
    }

    fn finish(self) -> ([u8; 16], [u8; 20], [u8; 32]) {
        (
            self.md5.finalize().into(),
            self.sha1.finalize().into(),
            self.sha256.finalize().into(),
        )
    }
}

/// Walk the extent map in ascending order and emit every sector exactly
/// once: zeros for inter-extent gaps, pre-rendered descriptor bytes, or
/// the streamed bytes of a host file. Per-file digests land on the nodes;
/// the whole-image digests are returned when hashing is on.
pub fn write_image<W: Write>(
    out: &mut W,
    layout: &Layout,
    files: &mut FileList,
    do_hash: bool,
    progress: bool,
) -> Result<Option<ImageDigests>> {
    let total_bytes = layout.extents.highest_end() * SECTOR_SIZE as u64;
    let mut image_hash = if do_hash { Some(HasherTriple::new()) } else { None };
    let zero = [0u8; SECTOR_SIZE];
    let mut sector = [0u8; SECTOR_SIZE];
    let mut n: u64 = 0;

    for extent in layout.extents.iter() {
        while n < extent.start {
            out.write_all(&zero)?;
            if let Some(h) = image_hash.as_mut() {
                h.update(&zero);
            }
            n += 1;
        }

        match &extent.source {
            ExtentSource::Content(content) => {
                let mut off = 0usize;
                while n < extent.end {
                    let rem = (content.len() - off).min(SECTOR_SIZE);
                    sector[..rem].copy_from_slice(&content[off..off + rem]);
                    sector[rem..].fill(0);
                    off += rem;
                    out.write_all(&sector)?;
                    if let Some(h) = image_hash.as_mut() {
                        h.update(&sector);
                    }
                    n += 1;
                }
            }
            ExtentSource::File(id) => {
                let (abspath, name, size) = match files.get(*id) {
                    Some(node) => (node.abspath.clone(), node.name.clone(), node.size),
                    None => return Err(UdfError::Layout("file extent without a node")),
                };
                if progress {
                    println!(
                        "        writing: {} ({} of the {} iso)",
                        name,
                        humanize(size),
                        humanize(total_bytes)
                    );
                }
                let mut f = File::open(&abspath)?;
                let mut file_hash = if do_hash { Some(HasherTriple::new()) } else { None };
                let mut hashed: u64 = 0;
                let mut copied: u64 = 0;
                while n < extent.end {
                    let rd = read_full(&mut f, &mut sector)?;
                    sector[rd..].fill(0);
                    out.write_all(&sector)?;
                    copied += rd as u64;
                    if let Some(h) = image_hash.as_mut() {
                        h.update(&sector);
                    }
                    if let Some(h) = file_hash.as_mut() {
                        // only the recorded bytes count, never the padding
                        let real = (size - hashed).min(rd as u64) as usize;
                        if real > 0 {
                            h.update(&sector[..real]);
                            hashed += real as u64;
                        }
                    }
                    n += 1;
                }
                if copied < size {
                    return Err(UdfError::ShortRead {
                        path: abspath,
                        got: copied,
                        expected: size,
                    });
                }
                let mut probe = [0u8; 1];
                if copied > size || f.read(&mut probe).unwrap_or(0) > 0 {
                    warn!(
                        "{} grew after scanning; the image keeps the recorded {} bytes",
                        abspath.display(),
                        size
                    );
                }
                if let Some(h) = file_hash {
                    let (md5, sha1, sha256) = h.finish();
                    if let Some(node) = files.get_mut(*id) {
                        node.digests = Some(FileDigests {
                            hashed_bytes: hashed,
                            md5,
                            sha1,
                            sha256,
                        });
                    }
                }
            }
        }
    }
    out.flush()?;

    // embedded payloads never pass through the streaming loop as file
    // bytes; digest them out of their File Entries
    if do_hash {
        for p in layout.placements.iter().filter(|p| p.embedded) {
            let size = match files.get(p.node_id) {
                Some(node) => node.size as usize,
                None => continue,
            };
            let fe = match layout.extents.get(p.start) {
                Some(e) => match &e.source {
                    ExtentSource::Content(c) => c,
                    _ => continue,
                },
                None => continue,
            };
            let payload = &fe[176..176 + size];
            let mut h = HasherTriple::new();
            h.update(payload);
            let (md5, sha1, sha256) = h.finish();
            if let Some(node) = files.get_mut(p.node_id) {
                node.digests = Some(FileDigests {
                    hashed_bytes: size as u64,
                    md5,
                    sha1,
                    sha256,
                });
            }
        }
    }

    Ok(image_hash.map(|h| {
        let (md5, sha1, sha256) = h.finish();
        ImageDigests {
            sectors: n,
            md5,
            sha1,
            sha256,
        }
    }))
}

/// Read until the sector buffer is full or the file ends.
fn read_full(f: &mut File, buf: &mut [u8; SECTOR_SIZE]) -> Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match f.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(k) => filled += k,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Byte counts for humans, binary units with a three-digit fraction.
pub fn humanize(mut s: u64) -> String {
    let mut suffix = "b";
    let mut fraction = 0u32;
    for next in ["KB", "MB", "GB", "TB"] {
        if s < 1024 {
            break;
        }
        suffix = next;
        fraction = ((s & 0x3FF) as u32 * 1000) >> 10;
        s >>= 10;
    }
    if fraction != 0 {
        format!("{s}.{fraction:03}{suffix}")
    } else {
        format!("{s}{suffix}")
    }
}
