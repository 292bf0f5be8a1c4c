//! End-to-end checks: scan a real temporary tree, build the layout,
//! stream the image into memory, and read the resulting structures back
//! with an independent, minimal parser.

use std::fs;
use std::path::Path;

use md5::{Digest, Md5};

use mkudfiso::build::{self, BuildConfig, Layout};
use mkudfiso::scan::{self, FileList};
use mkudfiso::sidecar;
use mkudfiso::udf::{tag_id, DescriptorTag, Timestamp, SECTOR_SIZE};
use mkudfiso::writer::{self, ImageDigests};

const RECORDING_TIME: i64 = 1_204_288_496;

fn config(label: &str) -> BuildConfig {
    BuildConfig {
        volume_label: label.into(),
        volume_set_identifier: String::new(),
        source_root: "/src".into(),
        image_name: "test.iso".into(),
        recording_time: RECORDING_TIME,
    }
}

fn author(dir: &Path, do_hash: bool) -> (Layout, FileList, Vec<u8>, Option<ImageDigests>) {
    let mut files = scan::scan(dir).unwrap();
    let layout = build::build(&files, &config("TEST")).unwrap();
    let mut image = Vec::new();
    let digests = writer::write_image(&mut image, &layout, &mut files, do_hash, false).unwrap();
    (layout, files, image, digests)
}

fn sector(image: &[u8], n: u64) -> &[u8] {
    &image[n as usize * SECTOR_SIZE..(n as usize + 1) * SECTOR_SIZE]
}

fn le16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

fn le32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn le64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

/// Parse the File Identifier Descriptors of one directory body:
/// (name, file characteristics, ICB logical block number).
fn parse_dir(body: &[u8]) -> Vec<(String, u8, u32)> {
    let mut out = Vec::new();
    let mut off = 0usize;
    while off + 38 <= body.len() {
        if le16(body, off) != tag_id::FILE_IDENTIFIER_DESCRIPTOR {
            break;
        }
        assert!(
            DescriptorTag::validate(&body[off..]),
            "FID at {} fails its tag checks",
            off
        );
        let characteristics = body[off + 18];
        let len_fi = body[off + 19] as usize;
        let lbn = le32(body, off + 24);
        let name = if len_fi > 0 {
            assert_eq!(body[off + 38], 8, "8-bit OSTA compression id");
            String::from_utf8_lossy(&body[off + 39..off + 38 + len_fi]).into_owned()
        } else {
            String::new()
        };
        out.push((name, characteristics, lbn));
        off += (38 + len_fi + 3) & !3;
    }
    out
}

/// Partition starting location, read back from the Partition Descriptor.
fn partition_start(image: &[u8], layout: &Layout) -> u64 {
    let pd = sector(image, layout.vds_start + 2);
    assert_eq!(le16(pd, 0), tag_id::PARTITION_DESCRIPTOR);
    u64::from(le32(pd, 188))
}

#[test]
fn empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    let (layout, _files, image, _) = author(dir.path(), false);

    // recognition area
    for (n, id) in [(16u64, b"BEA01"), (17, b"NSR02"), (18, b"TEA01")] {
        let s = sector(&image, n);
        assert_eq!(s[0], 0);
        assert_eq!(&s[1..6], id);
        assert_eq!(s[6], 1);
    }

    // the image ends well before sector 300, and covers every sector
    let total = layout.extents.highest_end();
    assert!(total < 300, "empty tree image ends at {}", total);
    assert_eq!(image.len() as u64, total * SECTOR_SIZE as u64);

    // root directory body: exactly one 40-byte parent entry
    let ps = partition_start(&image, &layout);
    assert_eq!(ps, layout.partition_start);
    let body = sector(&image, ps + 3);
    let entries = parse_dir(body);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "");
    assert_eq!(entries[0].1, 0x0A);
    assert!(body[40..].iter().all(|&b| b == 0));
}

#[test]
fn hash_sidecar_reports_zero_files_for_empty_tree() {
    let dir = tempfile::tempdir().unwrap();
    let (layout, files, _image, digests) = author(dir.path(), true);
    let digests = digests.unwrap();

    let out = tempfile::tempdir().unwrap();
    let table = out.path().join("hashes.txt");
    let now = Timestamp::from_unix(RECORDING_TIME);
    sidecar::write_hash_table(&table, &layout, &files, "TEST", "", &now, &digests).unwrap();
    let text = fs::read_to_string(&table).unwrap();
    assert_eq!(text.matches("Entry ").count(), 0);
    assert!(text.contains("Whole ISO information:"));
}

#[test]
fn anchor_integrity() {
    let dir = tempfile::tempdir().unwrap();
    let (layout, _files, image, _) = author(dir.path(), false);

    let anchor = sector(&image, 256);
    assert!(DescriptorTag::validate(anchor));
    let tag = DescriptorTag::read(anchor);
    assert_eq!(tag.tag_identifier, tag_id::ANCHOR_VOLUME_DESCRIPTOR_POINTER);
    assert_eq!(tag.tag_location, 256);
    assert_eq!(le32(anchor, 16), 32768);
    let vds = u64::from(le32(anchor, 20));
    assert_eq!(vds, layout.vds_start);

    // a sealed PVD sits at the pointed-to location
    let pvd = sector(&image, vds);
    assert!(DescriptorTag::validate(pvd));
    assert_eq!(le16(pvd, 0), tag_id::PRIMARY_VOLUME_DESCRIPTOR);
}

#[test]
fn vds_descriptors_are_sealed() {
    let dir = tempfile::tempdir().unwrap();
    let (layout, _files, image, _) = author(dir.path(), false);
    let expected = [
        tag_id::PRIMARY_VOLUME_DESCRIPTOR,
        tag_id::IMPLEMENTATION_USE_VOLUME_DESCRIPTOR,
        tag_id::PARTITION_DESCRIPTOR,
        tag_id::LOGICAL_VOLUME_DESCRIPTOR,
        tag_id::UNALLOCATED_SPACE_DESCRIPTOR,
        tag_id::TERMINATING_DESCRIPTOR,
    ];
    for (i, id) in expected.iter().enumerate() {
        let s = sector(&image, layout.vds_start + i as u64);
        assert_eq!(le16(s, 0), *id, "descriptor {} of the sequence", i);
        assert!(DescriptorTag::validate(s), "descriptor {} fails CRC", i);
        assert_eq!(
            u64::from(le32(s, 12)),
            layout.vds_start + i as u64,
            "TagLocation of descriptor {}",
            i
        );
    }
}

#[test]
fn partition_length_closure() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("data.bin"), vec![7u8; 10_000]).unwrap();
    let (layout, _files, image, _) = author(dir.path(), false);

    let pd = sector(&image, layout.vds_start + 2);
    assert!(DescriptorTag::validate(pd));
    let highest = layout.extents.highest_end();
    assert_eq!(
        u64::from(le32(pd, 192)),
        highest - layout.partition_start,
        "PartitionLength covers everything past PartitionStart"
    );
    assert_eq!(image.len() as u64, highest * SECTOR_SIZE as u64);
}

#[test]
fn single_small_file_is_embedded() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("A"), b"abc").unwrap();
    let (layout, _files, image, _) = author(dir.path(), false);
    let ps = partition_start(&image, &layout);

    let body = sector(&image, ps + 3);
    let entries = parse_dir(body);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].0, "A");
    assert_eq!(entries[1].1, 0);

    // the child File Entry embeds the three bytes at +176
    let fe = sector(&image, ps + u64::from(entries[1].2));
    assert!(DescriptorTag::validate(fe));
    assert_eq!(le16(fe, 0), tag_id::FILE_ENTRY);
    assert_eq!(le16(fe, 34), 0x0233, "in-ICB flags");
    assert_eq!(le64(fe, 56), 3, "InformationLength");
    assert_eq!(le64(fe, 64), 0, "LogicalBlocksRecorded");
    assert_eq!(le32(fe, 172), 3, "LengthOfAllocationDescriptors");
    assert_eq!(&fe[176..179], b"abc");

    // no separate content extent was allocated
    assert_eq!(layout.placements.len(), 1);
    assert!(layout.placements[0].embedded);
}

#[test]
fn four_kilobyte_file_uses_external_extent() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("Z"), vec![0u8; 4096]).unwrap();
    let (layout, _files, image, _) = author(dir.path(), false);
    let ps = partition_start(&image, &layout);

    let entries = parse_dir(sector(&image, ps + 3));
    let fe = sector(&image, ps + u64::from(entries[1].2));
    assert_eq!(le16(fe, 34), 0x0230, "short_ad flags");
    assert_eq!(le64(fe, 56), 4096);
    assert_eq!(le64(fe, 64), 2, "two logical blocks recorded");
    assert_eq!(le32(fe, 172), 8, "one short_ad");
    assert_eq!(le32(fe, 176), 4096, "short_ad length");

    let content_rel = u64::from(le32(fe, 180));
    let p = &layout.placements[0];
    assert!(!p.embedded);
    assert_eq!(content_rel, p.start - layout.partition_start);
    assert_eq!(p.end - p.start, 2);
    // the content sectors really are zeros
    assert!(sector(&image, p.start).iter().all(|&b| b == 0));
    assert!(sector(&image, p.start + 1).iter().all(|&b| b == 0));
}

#[test]
fn nested_tree_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    let inner_text = b"hello world, this is a test";
    fs::write(dir.path().join("sub/inner.txt"), inner_text).unwrap();
    let top_payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    fs::write(dir.path().join("top.bin"), &top_payload).unwrap();

    let (layout, _files, image, _) = author(dir.path(), false);
    let ps = partition_start(&image, &layout);

    // file set descriptor names the root ICB
    let fsd = sector(&image, ps);
    assert_eq!(le16(fsd, 0), tag_id::FILE_SET_DESCRIPTOR);
    assert!(DescriptorTag::validate(fsd));
    let root_fe_lbn = u64::from(le32(fsd, 404));
    let root_fe = sector(&image, ps + root_fe_lbn);
    assert_eq!(le16(root_fe, 0), tag_id::FILE_ENTRY);
    let root_body_lbn = u64::from(le32(root_fe, 180));
    let root_body_len = le32(root_fe, 176) as usize;
    assert_eq!(le64(root_fe, 56), root_body_len as u64);

    let root_entries = parse_dir(sector(&image, ps + root_body_lbn));
    assert_eq!(root_entries.len(), 3);
    assert_eq!(root_entries[1].0, "sub");
    assert_eq!(root_entries[1].1, 0x02, "directory bit");
    assert_eq!(root_entries[2].0, "top.bin");

    // descend into the subdirectory
    let sub_fe = sector(&image, ps + u64::from(root_entries[1].2));
    // a directory with no subdirectories links to itself and its parent
    assert_eq!(le16(sub_fe, 48), 2, "FileLinkCount");
    let sub_body = sector(&image, ps + u64::from(le32(sub_fe, 180)));
    let sub_entries = parse_dir(sub_body);
    assert_eq!(sub_entries.len(), 2);
    // the parent entry points back at the root file entry
    assert_eq!(sub_entries[0].1, 0x0A);
    assert_eq!(u64::from(sub_entries[0].2), root_fe_lbn);
    assert_eq!(sub_entries[1].0, "inner.txt");

    // the embedded grandchild reads back bit-exactly
    let inner_fe = sector(&image, ps + u64::from(sub_entries[1].2));
    assert_eq!(le16(inner_fe, 34), 0x0233);
    let len = le64(inner_fe, 56) as usize;
    assert_eq!(&inner_fe[176..176 + len], inner_text);

    // the external file reads back bit-exactly
    let top_fe = sector(&image, ps + u64::from(root_entries[2].2));
    assert_eq!(le16(top_fe, 34), 0x0230);
    assert_eq!(le64(top_fe, 56), 3000);
    let content_start = (ps + u64::from(le32(top_fe, 180))) as usize * SECTOR_SIZE;
    assert_eq!(&image[content_start..content_start + 3000], &top_payload[..]);
    assert!(image[content_start + 3000..content_start + 4096]
        .iter()
        .all(|&b| b == 0));

    // the root directory counts its one subdirectory
    assert_eq!(le16(root_fe, 48), 3, "root FileLinkCount = 2 + subdirs");
}

#[test]
fn report_and_hashes_list_both_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a"), b"foo").unwrap();
    fs::write(dir.path().join("b"), b"bar").unwrap();

    let mut files = scan::scan(dir.path()).unwrap();
    let layout = build::build(&files, &config("TEST")).unwrap();
    let mut image = Vec::new();
    let digests = writer::write_image(&mut image, &layout, &mut files, true, false)
        .unwrap()
        .unwrap();

    let out = tempfile::tempdir().unwrap();
    let now = Timestamp::from_unix(RECORDING_TIME);

    let report = out.path().join("report.txt");
    sidecar::write_report(&report, &layout, &files, "TEST", "", &now).unwrap();
    let text = fs::read_to_string(&report).unwrap();
    assert_eq!(text.matches("Entry ").count(), 2);
    assert!(text.contains("Entry a"));
    assert!(text.contains("Entry b"));

    let table = out.path().join("hashes.txt");
    sidecar::write_hash_table(&table, &layout, &files, "TEST", "", &now, &digests).unwrap();
    let text = fs::read_to_string(&table).unwrap();
    assert!(text.contains("acbd18db4cc2f85cedef654fccc4a4d8"), "md5 of foo");
    assert!(text.contains("37b51d194a7513e45b56f6524f2d51f2"), "md5 of bar");

    // the whole-image digest matches the bytes that reached the disc
    let expect: [u8; 16] = Md5::digest(&image).into();
    assert_eq!(digests.md5, expect);
    assert_eq!(digests.sectors, layout.extents.highest_end());
}

#[test]
fn idempotent_at_fixed_recording_time() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("d")).unwrap();
    fs::write(dir.path().join("d/x"), b"payload").unwrap();
    fs::write(dir.path().join("y"), vec![1u8; 5000]).unwrap();

    let mut files = scan::scan(dir.path()).unwrap();
    let mut first = Vec::new();
    let layout = build::build(&files, &config("TEST")).unwrap();
    writer::write_image(&mut first, &layout, &mut files, false, false).unwrap();

    let mut second = Vec::new();
    let layout = build::build(&files, &config("TEST")).unwrap();
    writer::write_image(&mut second, &layout, &mut files, false, false).unwrap();

    assert_eq!(first, second);
}

#[test]
fn extents_disjoint_and_coverage() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..20 {
        fs::write(dir.path().join(format!("f{:02}", i)), vec![i as u8; 3000]).unwrap();
    }
    let (layout, _files, image, _) = author(dir.path(), false);

    let mut prev_end = 0u64;
    for e in layout.extents.iter() {
        assert!(e.start >= prev_end, "extent overlap at {}", e.start);
        prev_end = e.end;
    }
    assert_eq!(image.len() as u64, prev_end * SECTOR_SIZE as u64);
}

#[test]
fn gap_file_covers_system_area() {
    let dir = tempfile::tempdir().unwrap();
    let (layout, files, _image, _) = author(dir.path(), false);

    let out = tempfile::tempdir().unwrap();
    let gaps = out.path().join("gaps.txt");
    sidecar::write_gap_file(&gaps, &layout, &files).unwrap();
    let text = fs::read_to_string(&gaps).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "# mkudfiso gap list");
    assert_eq!(lines[1], "0 15", "the unused system area leads the list");
    // the per-descriptor paddings registered during the build show up
    assert!(lines
        .iter()
        .any(|l| *l == format!("({},490-2047)", layout.vds_start)));
}
