use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::warn;

use crate::build::{FilePlacement, Layout, Result, IMPLEMENTATION_ID};
use crate::extent::ExtentSource;
use crate::scan::{FileList, FileNode};
use crate::udf::{
    tag_id, DescriptorTag, EntityId, FileEntry, ImplementationUseVolumeDescriptor, Timestamp,
    SECTOR_SIZE,
};
use crate::writer::ImageDigests;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// File placements in ascending sector order. Embedded files point at
/// their File Entry's sector.
fn sorted_placements(layout: &Layout) -> Vec<&FilePlacement> {
    let mut v: Vec<_> = layout.placements.iter().collect();
    v.sort_by_key(|p| p.start);
    v
}

/// Human-readable listing of every packaged file with its sector range;
/// enough to carve the files back out even if the UDF structure is bad.
pub fn write_report(
    path: &Path,
    layout: &Layout,
    files: &FileList,
    volume_label: &str,
    volume_set: &str,
    now: &Timestamp,
) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(
        out,
        "mkudfiso report for volume \"{}\" volumeset \"{}\"",
        volume_label, volume_set
    )?;
    writeln!(out, "Generated {}\n", now)?;
    for p in sorted_placements(layout) {
        if let Some(f) = files.get(p.node_id) {
            writeln!(out, "Entry {}", f.name)?;
            writeln!(out, "\tAbsolute path: {}", f.abspath.display())?;
            writeln!(out, "\tFile size: {}", f.size)?;
            writeln!(out, "\tSectors: {}-{}", p.start, p.end - 1)?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Schedule the report for inclusion in the image: a file extent for its
/// bytes plus an Implementation Use descriptor locating them. Runs before
/// streaming, so the main write loop emits both.
pub fn append_report(
    layout: &mut Layout,
    files: &mut FileList,
    report_path: &Path,
    size_limit: u64,
) -> Result<()> {
    let report_sz = fs::metadata(report_path)?.len();
    let image_bytes = layout.extents.highest_end() * SECTOR_SIZE as u64;
    if size_limit > 0 && image_bytes + report_sz + 4096 > size_limit {
        warn!("not inserting report into ISO, not enough space");
        return Ok(());
    }

    let id = files.alloc_id();
    files.insert(sidecar_node(id, "report", report_path, report_sz));
    let sectors = report_sz.div_ceil(SECTOR_SIZE as u64).max(1);
    let data_start = layout.extents.allocate(sectors);
    layout.extents.set_file(data_start, id);
    layout.placements.push(FilePlacement {
        node_id: id,
        start: data_start,
        end: data_start + sectors,
        embedded: false,
    });

    let desc_start = layout.extents.allocate(1);
    let desc = locator_descriptor(desc_start, b"Report", data_start, report_sz);
    layout.extents.set_content(desc_start, desc);
    Ok(())
}

/// Per-file and whole-image MD5/SHA-1/SHA-256, in the same shape as the
/// report.
pub fn write_hash_table(
    path: &Path,
    layout: &Layout,
    files: &FileList,
    volume_label: &str,
    volume_set: &str,
    now: &Timestamp,
    image: &ImageDigests,
) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(
        out,
        "mkudfiso hash table for volume \"{}\" volumeset \"{}\"",
        volume_label, volume_set
    )?;
    writeln!(out, "Generated {}\n", now)?;
    for p in sorted_placements(layout) {
        if let Some(f) = files.get(p.node_id) {
            writeln!(out, "Entry {}", f.name)?;
            writeln!(out, "\tAbsolute path: {}", f.abspath.display())?;
            let hashed = f.digests.as_ref().map(|d| d.hashed_bytes).unwrap_or(0);
            writeln!(out, "\tHash length: {}", hashed)?;
            writeln!(out, "\tSectors: {}-{}", p.start, p.end - 1)?;
            if let Some(d) = &f.digests {
                writeln!(
                    out,
                    "\tMD5/SHA-1/SHA-256: {}/{}/{}",
                    hex(&d.md5),
                    hex(&d.sha1),
                    hex(&d.sha256)
                )?;
            }
            writeln!(out)?;
        }
    }
    writeln!(out, "Whole ISO information:")?;
    writeln!(out, "\tSectors:           {}", image.sectors)?;
    writeln!(
        out,
        "\tMD5/SHA-1/SHA-256: {}/{}/{}",
        hex(&image.md5),
        hex(&image.sha1),
        hex(&image.sha256)
    )?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// The hash table can only exist after the image is streamed, so it is
/// appended directly to the (seekable) image file, followed by its
/// locator descriptor. The extents are registered afterwards so the gap
/// list still sees them.
pub fn append_hash_table(
    iso: &mut File,
    layout: &mut Layout,
    files: &mut FileList,
    table_path: &Path,
    size_limit: u64,
) -> Result<()> {
    let table_sz = fs::metadata(table_path)?.len();
    let image_bytes = layout.extents.highest_end() * SECTOR_SIZE as u64;
    if size_limit > 0 && image_bytes + table_sz + 4096 > size_limit {
        warn!("not inserting hash table into ISO, not enough space");
        return Ok(());
    }

    let starting_sector = iso.seek(SeekFrom::End(0))? / SECTOR_SIZE as u64;
    let mut f = File::open(table_path)?;
    let mut sector = [0u8; SECTOR_SIZE];
    loop {
        let mut rd = 0usize;
        while rd < SECTOR_SIZE {
            match f.read(&mut sector[rd..]) {
                Ok(0) => break,
                Ok(k) => rd += k,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if rd == 0 {
            break;
        }
        sector[rd..].fill(0);
        iso.write_all(&sector)?;
        if rd < SECTOR_SIZE {
            break;
        }
    }

    let descriptor_sector = iso.seek(SeekFrom::End(0))? / SECTOR_SIZE as u64;
    let desc = locator_descriptor(descriptor_sector, b"Hashtbl", starting_sector, table_sz);
    sector.fill(0);
    sector[..desc.len()].copy_from_slice(&desc);
    iso.write_all(&sector)?;
    iso.flush()?;

    // register what was just written, for the gap list's benefit
    let id = files.alloc_id();
    files.insert(sidecar_node(id, "hashes", table_path, table_sz));
    let s = layout
        .extents
        .allocate_at(starting_sector, table_sz.div_ceil(SECTOR_SIZE as u64).max(1));
    layout.extents.set_file(s, id);
    let d = layout.extents.allocate_at(descriptor_sector, 1);
    layout.extents.set_content(d, desc);
    Ok(())
}

/// Every unwritten region: whole-sector runs between extents, the tail of
/// partially-filled extents, and the registered intra-sector paddings.
pub fn write_gap_file(path: &Path, layout: &Layout, files: &FileList) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    // record formats:
    //     A          sector A is a gap
    //     A B        sectors A <= x <= B are a gap
    //     (A,a-b)    within sector A the byte range a <= x <= b is a gap
    writeln!(out, "# mkudfiso gap list")?;
    let mut n: u64 = 0;
    for extent in layout.extents.iter() {
        if n < extent.start {
            if n + 1 == extent.start {
                writeln!(out, "{}", n)?;
            } else {
                writeln!(out, "{} {}", n, extent.start - 1)?;
            }
            n = extent.start;
        }
        let content_len = match &extent.source {
            ExtentSource::File(id) => files.get(*id).map(|f| f.size).unwrap_or(0),
            ExtentSource::Content(c) => c.len() as u64,
        };
        let mut end = extent.start + (content_len >> 11);
        let esb = (content_len & 0x7FF) as u32;
        if esb != 0 {
            writeln!(out, "({},{}-2047)", end, esb)?;
            end += 1;
        }
        n = end;
    }
    for (sector, gap) in layout.extents.sector_gaps() {
        if gap.start == 0 && gap.end == 2047 {
            writeln!(out, "{}", sector)?;
        } else {
            writeln!(out, "({},{}-{})", sector, gap.start, gap.end)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn sidecar_node(id: u64, name: &str, path: &Path, size: u64) -> FileNode {
    FileNode {
        id,
        // outside the scanned tree
        parent: u64::MAX,
        name: name.into(),
        abspath: path.to_path_buf(),
        size,
        characteristics: 0,
        permissions: FileEntry::PERMISSIONS_DEFAULT,
        atime: Timestamp::default(),
        ctime: Timestamp::default(),
        mtime: Timestamp::default(),
        digests: None,
    }
}

/// A 64-byte Implementation Use descriptor whose implementation-use area
/// carries the sidecar's starting sector and byte length.
fn locator_descriptor(sector: u64, suffix: &[u8], data_start: u64, byte_len: u64) -> Vec<u8> {
    let mut iuvd = ImplementationUseVolumeDescriptor::default();
    iuvd.tag = DescriptorTag::new(tag_id::IMPLEMENTATION_USE_VOLUME_DESCRIPTOR, sector as u32);
    iuvd.volume_descriptor_sequence_number = 1;
    iuvd.implementation_identifier = EntityId::new(1, IMPLEMENTATION_ID, suffix);
    iuvd.implementation_use[0..4].copy_from_slice(&(data_start as u32).to_le_bytes());
    iuvd.implementation_use[4..8].copy_from_slice(&(byte_len as u32).to_le_bytes());
    let mut full = vec![0u8; ImplementationUseVolumeDescriptor::SIZE];
    iuvd.write(&mut full);
    DescriptorTag::seal(&mut full[..60], 44);
    full.truncate(64);
    full
}
