use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use log::{debug, warn};
use thiserror::Error;

use crate::extent::ExtentMap;
use crate::osta;
use crate::scan::{FileList, FileNode};
use crate::udf::{
    tag_id, AnchorVolumeDescriptorPointer, CharSpec, DescriptorTag, EntityId, ExtentAd, FileEntry,
    FileIdentifierDescriptor, FileSetDescriptor, IcbTag, ImplementationUseVolumeDescriptor,
    LbAddr, LogicalVolumeDescriptor, LogicalVolumeIntegrityDescriptor, LongAd,
    LvidImplementationUse, PartitionDescriptor, PrimaryVolumeDescriptor, ShortAd,
    TerminatingDescriptor, Timestamp, Type1PartitionMap, UnallocatedSpaceDescriptor,
    VolumeStructureDescriptor, SECTOR_SIZE,
};

#[derive(Error, Debug)]
pub enum UdfError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("CRC self-test failure")]
    CrcSelfTest,
    #[error("the sum of all input files exceeds the ISO size limit")]
    SizeLimitExceeded,
    #[error("ISO file {0} already exists (use --force-iso to overwrite)")]
    OutputExists(PathBuf),
    #[error("{path}: read {got} bytes but the file was recorded as {expected} bytes")]
    ShortRead {
        path: PathBuf,
        got: u64,
        expected: u64,
    },
    #[error("internal layout error: {0}")]
    Layout(&'static str),
}

pub type Result<T> = std::result::Result<T, UdfError>;

pub const IMPLEMENTATION_ID: &str = "*mkudfiso";
const OSTA_DOMAIN_ID: &str = "*OSTA UDF Compliant";
/// UDF revision 1.02 domain identifier suffix
const UDF_102_DOMAIN_SUFFIX: [u8; 3] = [0x02, 0x01, 0x03];
/// “*UDF LV Info” identifier suffix, same revision
const LV_INFO_SUFFIX: [u8; 3] = [0x02, 0x01, 0x05];

/// One short_ad covers at most this many bytes of file content.
pub const MAX_SLICE_BYTES: u64 = 1_048_576_000;
/// Files below this go into the File Entry itself. No extended attributes
/// are ever emitted, so the whole area past the fixed fields is available.
pub const EMBED_THRESHOLD: u64 = (SECTOR_SIZE - FileEntry::FIXED_SIZE) as u64;

pub const ANCHOR_SECTOR: u64 = 256;
/// The LVD's IntegritySequenceExtent points here.
pub const LVID_SECTOR: u64 = 64;
const VDS_SECTORS: u64 = 6;

pub struct BuildConfig {
    pub volume_label: String,
    pub volume_set_identifier: String,
    /// source directory, shown in the free-form tool descriptor
    pub source_root: String,
    /// output destination, shown in the free-form tool descriptor
    pub image_name: String,
    /// Unix time stamped into every descriptor
    pub recording_time: i64,
}

/// Where one packaged file ended up: its content extent, or the sector of
/// the File Entry that embeds it. Drives the report and hash sidecars.
pub struct FilePlacement {
    pub node_id: u64,
    /// inclusive-start, exclusive-end sector range
    pub start: u64,
    pub end: u64,
    /// true when the bytes live inside the File Entry at +176
    pub embedded: bool,
}

/// The finished sector layout: every descriptor pre-rendered, every file
/// assigned its content extent.
pub struct Layout {
    pub extents: ExtentMap,
    pub vds_start: u64,
    pub partition_start: u64,
    pub placements: Vec<FilePlacement>,
}

pub fn build(files: &FileList, cfg: &BuildConfig) -> Result<Layout> {
    let mut b = Builder {
        extents: ExtentMap::new(),
        files,
        cfg,
        now: Timestamp::from_unix(cfg.recording_time),
        partition_start: 0,
        placements: Vec::new(),
    };
    b.volume_recognition();
    b.bragging_rights();
    let vds_start = b.volume_descriptor_sequence();
    b.logical_volume_integrity();
    b.anchor(vds_start);
    b.partition_head()?;
    b.patch_partition_length(vds_start)?;
    Ok(Layout {
        extents: b.extents,
        vds_start,
        partition_start: b.partition_start,
        placements: b.placements,
    })
}

fn slice_count(size: u64) -> usize {
    size.div_ceil(MAX_SLICE_BYTES).max(1) as usize
}

fn icb_tag(file_type: u8, parent_rel: u32) -> IcbTag {
    IcbTag {
        prior_recorded_number_of_direct_entries: 0,
        strategy_type: 4,
        strategy_parameter: [0; 2],
        maximum_number_of_entries: 1,
        reserved: 0,
        file_type,
        parent_icb_location: LbAddr::in_partition(parent_rel),
        flags: IcbTag::FLAGS_SHORT_AD,
    }
}

struct Builder<'a> {
    extents: ExtentMap,
    files: &'a FileList,
    cfg: &'a BuildConfig,
    now: Timestamp,
    partition_start: u64,
    placements: Vec<FilePlacement>,
}

impl Builder<'_> {
    /// Sectors 16, 17, 18: BEA01, NSR02, TEA01.
    fn volume_recognition(&mut self) {
        for (sector, id) in [(16u64, b"BEA01"), (17, b"NSR02"), (18, b"TEA01")] {
            let s = self.extents.allocate_at(sector, 1);
            let mut buf = vec![0u8; VolumeStructureDescriptor::SIZE];
            VolumeStructureDescriptor::new(id).write(&mut buf);
            self.extents.set_content(s, buf);
        }
    }

    // mkisofs does this, why not us too? :)
    fn bragging_rights(&mut self) {
        let s = self.extents.allocate(1);
        let text = format!(
            "mkudfiso v{} UDF authoring tool. \"{}\" -> \"{}\" on {}\n",
            env!("CARGO_PKG_VERSION"),
            self.cfg.source_root,
            self.cfg.image_name,
            self.now
        );
        let mut data = text.into_bytes();
        data.push(0);
        data.truncate(SECTOR_SIZE);
        self.extents.set_content(s, data);
    }

    /// Six sectors carrying PVD, IUVD, PD, LVD, USD and the terminator,
    /// each sealed against its own absolute sector.
    fn volume_descriptor_sequence(&mut self) -> u64 {
        let label = self.cfg.volume_label.as_str();
        let vds_start = self.extents.allocate(VDS_SECTORS);
        // past the sequence itself and the two reserved sectors the
        // partition begins with the file set descriptor
        let begin = vds_start + VDS_SECTORS + 2;
        self.partition_start = begin;
        debug!("volume descriptor sequence @ {}", vds_start);
        debug!("root fileset @ {}", begin);
        debug!("root terminator @ {}", begin + 1);
        debug!("root file entry @ {}", begin + 2);
        debug!("root directory @ {}", begin + 3);

        let mut data = vec![0u8; VDS_SECTORS as usize * SECTOR_SIZE];

        {
            let mut pvd = PrimaryVolumeDescriptor::default();
            pvd.tag = DescriptorTag::new(tag_id::PRIMARY_VOLUME_DESCRIPTOR, vds_start as u32);
            pvd.volume_descriptor_sequence_number = 0;
            osta::pack_dstring(&mut pvd.volume_identifier, label);
            pvd.volume_sequence_number = 1;
            pvd.maximum_volume_sequence_number = 1;
            pvd.interchange_level = 3;
            pvd.maximum_interchange_level = 3;
            pvd.character_set_list = 1;
            pvd.maximum_character_set_list = 1;
            osta::pack_dstring(
                &mut pvd.volume_set_identifier,
                &self.cfg.volume_set_identifier,
            );
            pvd.descriptor_character_set = CharSpec::osta_compressed_unicode();
            pvd.explanatory_character_set = CharSpec::osta_compressed_unicode();
            pvd.application_identifier = EntityId::new(0, IMPLEMENTATION_ID, &[]);
            pvd.recording_date_and_time = self.now.clone();
            pvd.implementation_identifier = EntityId::new(0, IMPLEMENTATION_ID, &[]);
            pvd.write(&mut data[0..PrimaryVolumeDescriptor::SIZE]);
            DescriptorTag::seal(
                &mut data[0..PrimaryVolumeDescriptor::SIZE],
                PrimaryVolumeDescriptor::SIZE - DescriptorTag::SIZE,
            );
            self.extents.note_sector_gap(vds_start, 490, 2047);
        }

        {
            let off = SECTOR_SIZE;
            let mut iuvd = ImplementationUseVolumeDescriptor::default();
            iuvd.tag = DescriptorTag::new(
                tag_id::IMPLEMENTATION_USE_VOLUME_DESCRIPTOR,
                (vds_start + 1) as u32,
            );
            iuvd.volume_descriptor_sequence_number = 1;
            iuvd.implementation_identifier = EntityId::new(0, "*UDF LV Info", &LV_INFO_SUFFIX);
            // UDF 1.02 2.2.7: a charspec, then the LV identifier
            CharSpec::osta_compressed_unicode().write(&mut iuvd.implementation_use[0..64]);
            osta::pack_dstring(&mut iuvd.implementation_use[64..148], label);
            iuvd.write(&mut data[off..off + ImplementationUseVolumeDescriptor::SIZE]);
            DescriptorTag::seal(
                &mut data[off..off + ImplementationUseVolumeDescriptor::SIZE],
                ImplementationUseVolumeDescriptor::SIZE - DescriptorTag::SIZE,
            );
            self.extents.note_sector_gap(vds_start + 1, 512, 2047);
        }

        {
            let off = 2 * SECTOR_SIZE;
            let mut pd = PartitionDescriptor::default();
            pd.tag = DescriptorTag::new(tag_id::PARTITION_DESCRIPTOR, (vds_start + 2) as u32);
            pd.volume_descriptor_sequence_number = 2;
            pd.partition_flags = 1;
            pd.partition_number = 0;
            pd.partition_contents = EntityId::new(0x02, "+NSR02", &[]);
            pd.access_type = 1; // read only
            pd.partition_starting_location = begin as u32;
            pd.partition_length = 0x7FFF_FFFF; // a guess, updated after allocation
            pd.implementation_identifier = EntityId::new(0, IMPLEMENTATION_ID, &[]);
            pd.write(&mut data[off..off + PartitionDescriptor::SIZE]);
            DescriptorTag::seal(
                &mut data[off..off + PartitionDescriptor::SIZE],
                PartitionDescriptor::SIZE - DescriptorTag::SIZE,
            );
            self.extents.note_sector_gap(vds_start + 2, 356, 2047);
        }

        {
            let off = 3 * SECTOR_SIZE;
            let mut lvd = LogicalVolumeDescriptor::default();
            lvd.tag = DescriptorTag::new(tag_id::LOGICAL_VOLUME_DESCRIPTOR, (vds_start + 3) as u32);
            lvd.volume_descriptor_sequence_number = 3;
            lvd.descriptor_character_set = CharSpec::osta_compressed_unicode();
            osta::pack_dstring(&mut lvd.logical_volume_identifier, label);
            lvd.logical_block_size = SECTOR_SIZE as u32;
            lvd.domain_identifier = EntityId::new(0, OSTA_DOMAIN_ID, &UDF_102_DOMAIN_SUFFIX);
            // long_ad to the file set descriptor, known here only by length
            lvd.logical_volume_contents_use[0..4]
                .copy_from_slice(&(SECTOR_SIZE as u32).to_le_bytes());
            lvd.map_table_length = Type1PartitionMap::SIZE as u32;
            lvd.number_of_partition_maps = 1;
            lvd.implementation_identifier = EntityId::new(0, IMPLEMENTATION_ID, &[]);
            lvd.integrity_sequence_extent =
                ExtentAd::new(2 * SECTOR_SIZE as u32, LVID_SECTOR as u32);
            lvd.partition_map = Type1PartitionMap {
                volume_sequence_number: 0,
                partition_number: 0,
            };
            lvd.write(&mut data[off..off + LogicalVolumeDescriptor::SIZE]);
            DescriptorTag::seal(
                &mut data[off..off + LogicalVolumeDescriptor::SIZE],
                LogicalVolumeDescriptor::SIZE - DescriptorTag::SIZE,
            );
            self.extents.note_sector_gap(vds_start + 3, 512, 2047);
        }

        {
            let off = 4 * SECTOR_SIZE;
            let mut usd = UnallocatedSpaceDescriptor::default();
            usd.tag = DescriptorTag::new(
                tag_id::UNALLOCATED_SPACE_DESCRIPTOR,
                (vds_start + 4) as u32,
            );
            usd.volume_descriptor_sequence_number = 4;
            usd.number_of_allocation_descriptors = 0;
            usd.write(&mut data[off..off + UnallocatedSpaceDescriptor::SIZE]);
            DescriptorTag::seal(
                &mut data[off..off + UnallocatedSpaceDescriptor::SIZE],
                UnallocatedSpaceDescriptor::SIZE - DescriptorTag::SIZE,
            );
            self.extents.note_sector_gap(vds_start + 4, 512, 2047);
        }

        {
            let off = 5 * SECTOR_SIZE;
            TerminatingDescriptor::new((vds_start + 5) as u32)
                .write(&mut data[off..off + TerminatingDescriptor::SIZE]);
            DescriptorTag::seal(&mut data[off..off + TerminatingDescriptor::SIZE], 0);
            self.extents.note_sector_gap(vds_start + 5, 16, 2047);
        }

        self.extents.set_content(vds_start, data);
        // keep first fit away from the two sectors between the sequence
        // and the partition head
        self.extents.allocate_at(vds_start + VDS_SECTORS, 2);
        vds_start
    }

    /// LVID plus terminator at sector 64, matching the LVD pointer.
    fn logical_volume_integrity(&mut self) {
        let s = self.extents.allocate_at(LVID_SECTOR, 2);
        let mut data = vec![0u8; 2 * SECTOR_SIZE];
        let lvid = LogicalVolumeIntegrityDescriptor {
            tag: DescriptorTag::new(
                tag_id::LOGICAL_VOLUME_INTEGRITY_DESCRIPTOR,
                LVID_SECTOR as u32,
            ),
            recording_date_and_time: self.now.clone(),
            integrity_type: 1, // closed
            next_integrity_extent: ExtentAd::default(),
            logical_volume_contents_use: [0; 32],
            number_of_partitions: 1,
            length_of_implementation_use: LvidImplementationUse::SIZE as u32,
            free_space_table: 0,
            size_table: 0x7FFF_FFFF,
            implementation_use: LvidImplementationUse {
                implementation_id: EntityId::new(0, IMPLEMENTATION_ID, &[0x05]),
                // not tracked; readers only care that the counts are sane
                number_of_files: 999_999_999,
                number_of_directories: 999_999_999,
                minimum_udf_read_revision: 0x0102,
                minimum_udf_write_revision: 0x0102,
                maximum_udf_write_revision: 0x0102,
            },
        };
        lvid.write(&mut data[0..LogicalVolumeIntegrityDescriptor::SIZE]);
        DescriptorTag::seal(
            &mut data[0..LogicalVolumeIntegrityDescriptor::SIZE],
            LogicalVolumeIntegrityDescriptor::SIZE - DescriptorTag::SIZE,
        );
        self.extents.note_sector_gap(LVID_SECTOR, 512, 2047);

        let off = SECTOR_SIZE;
        TerminatingDescriptor::new((LVID_SECTOR + 1) as u32)
            .write(&mut data[off..off + TerminatingDescriptor::SIZE]);
        DescriptorTag::seal(&mut data[off..off + TerminatingDescriptor::SIZE], 0);
        self.extents.note_sector_gap(LVID_SECTOR + 1, 16, 2047);

        self.extents.set_content(s, data);
    }

    fn anchor(&mut self, vds_start: u64) {
        let s = self.extents.allocate_at(ANCHOR_SECTOR, 1);
        let avdp = AnchorVolumeDescriptorPointer {
            tag: DescriptorTag::new(
                tag_id::ANCHOR_VOLUME_DESCRIPTOR_POINTER,
                ANCHOR_SECTOR as u32,
            ),
            main_volume_descriptor_sequence_extent: ExtentAd::new(
                (SECTOR_SIZE * 16) as u32,
                vds_start as u32,
            ),
            reserve_volume_descriptor_sequence_extent: ExtentAd::new(
                (SECTOR_SIZE * 16) as u32,
                0,
            ),
        };
        let mut buf = vec![0u8; AnchorVolumeDescriptorPointer::SIZE];
        avdp.write(&mut buf);
        DescriptorTag::seal(
            &mut buf,
            AnchorVolumeDescriptorPointer::SIZE - DescriptorTag::SIZE,
        );
        self.extents.set_content(s, buf);
    }

    /// File Set Descriptor, terminator, root File Entry, then the whole
    /// directory tree. From here on every TagLocation and logical block
    /// number is partition relative; the Linux UDF driver requires it.
    fn partition_head(&mut self) -> Result<()> {
        let ps = self.partition_start;
        let label = self.cfg.volume_label.as_str();
        let rootfileset = ps;
        let rootterm = ps + 1;
        let rootfileent = ps + 2;
        let rootdir = ps + 3;

        let s = self.extents.allocate_at(rootfileset, 1);
        let mut fsd = FileSetDescriptor::default();
        fsd.tag = DescriptorTag::new(tag_id::FILE_SET_DESCRIPTOR, (rootfileset - ps) as u32);
        fsd.recording_date_and_time = self.now.clone();
        fsd.interchange_level = 3;
        fsd.maximum_interchange_level = 3;
        fsd.character_set_list = 1;
        fsd.maximum_character_set_list = 1;
        fsd.file_set_number = 0;
        fsd.file_set_descriptor_number = 0;
        fsd.logical_volume_identifier_character_set = CharSpec::osta_compressed_unicode();
        osta::pack_dstring(&mut fsd.logical_volume_identifier, label);
        fsd.file_set_character_set = CharSpec::osta_compressed_unicode();
        osta::pack_dstring(&mut fsd.file_set_identifier, label);
        fsd.domain_identifier = EntityId::new(0, OSTA_DOMAIN_ID, &UDF_102_DOMAIN_SUFFIX);
        fsd.root_directory_icb =
            LongAd::in_partition(SECTOR_SIZE as u32, (rootfileent - ps) as u32);
        let mut buf = vec![0u8; FileSetDescriptor::SIZE];
        fsd.write(&mut buf);
        DescriptorTag::seal(&mut buf, FileSetDescriptor::SIZE - DescriptorTag::SIZE);
        self.extents.set_content(s, buf);

        let s = self.extents.allocate_at(rootterm, 1);
        let mut buf = vec![0u8; TerminatingDescriptor::SIZE];
        TerminatingDescriptor::new((rootterm - ps) as u32).write(&mut buf);
        DescriptorTag::seal(&mut buf, 0);
        self.extents.set_content(s, buf);

        let s = self.extents.allocate_at(rootfileent, 1);
        let mut fe = FileEntry::default();
        fe.tag = DescriptorTag::new(tag_id::FILE_ENTRY, (rootfileent - ps) as u32);
        fe.icb_tag = icb_tag(IcbTag::FILE_TYPE_DIRECTORY, 0);
        fe.uid = FileEntry::ID_INVALID;
        fe.gid = FileEntry::ID_INVALID;
        fe.permissions = FileEntry::PERMISSIONS_DEFAULT;
        fe.file_link_count = 2 + self.files.subdirectory_count(0);
        fe.access_time = self.now.clone();
        fe.modification_time = self.now.clone();
        fe.attribute_time = self.now.clone();
        fe.checkpoint = 1;
        fe.implementation_identifier = EntityId::new(0, IMPLEMENTATION_ID, &[]);
        fe.unique_id = 0;
        fe.length_of_allocation_descriptors = ShortAd::SIZE as u32;
        let mut ad = vec![0u8; ShortAd::SIZE];
        // length patched once the directory body is materialized
        ShortAd::new(0, (rootdir - ps) as u32).write(&mut ad);
        fe.allocation_descriptors = ad;
        let mut buf = vec![0u8; fe.len()];
        fe.write(&mut buf);
        DescriptorTag::seal(&mut buf, fe.len() - DescriptorTag::SIZE);
        self.extents.set_content(s, buf);

        self.materialize_directory(0, rootfileent, rootfileent, Some(rootdir))
    }

    /// Lay out one directory: body extent, the parent entry, one File
    /// Entry plus File Identifier Descriptor per child, then recurse into
    /// subdirectories and attach external file content.
    fn materialize_directory(
        &mut self,
        dir_id: u64,
        self_fe_sector: u64,
        parent_fe_sector: u64,
        fixed_body_start: Option<u64>,
    ) -> Result<()> {
        let files = self.files;
        let ps = self.partition_start;

        let mut alloc_sz = 40usize; // the “..” entry
        for child in files.children(dir_id) {
            alloc_sz += FileIdentifierDescriptor::padded_size(&child.name);
        }
        let body_sectors = alloc_sz.div_ceil(SECTOR_SIZE) as u64;
        let body_start = match fixed_body_start {
            // the fixed root slot sits below the integrity extent; a root
            // directory too large for it falls back to first fit
            Some(s) if s + body_sectors <= LVID_SECTOR => self.extents.allocate_at(s, body_sectors),
            _ => self.extents.allocate(body_sectors),
        };
        let body_rel = (body_start - ps) as u32;

        let mut dir_raw = vec![0u8; alloc_sz];
        let parent_fid = FileIdentifierDescriptor {
            tag: DescriptorTag::new(tag_id::FILE_IDENTIFIER_DESCRIPTOR, body_rel),
            file_version_number: 1,
            file_characteristics: FileIdentifierDescriptor::FILE_CHARACTERISTIC_PARENT_DIR,
            length_of_file_identifier: 0,
            icb: LongAd::in_partition(SECTOR_SIZE as u32, (parent_fe_sector - ps) as u32),
            length_of_implementation_use: 0,
            file_identifier: String::new(),
        };
        parent_fid.write(&mut dir_raw[0..40]);
        DescriptorTag::seal(&mut dir_raw[0..40], 40 - DescriptorTag::SIZE);
        let mut cur = 40usize;

        let mut dir_children: Vec<(u64, u64)> = Vec::new();
        let mut file_children: Vec<(u64, u64)> = Vec::new();

        let child_ids: Vec<u64> = files.children(dir_id).map(|n| n.id).collect();
        for id in child_ids {
            let node = files
                .get(id)
                .ok_or(UdfError::Layout("node vanished during build"))?;
            let fid_sz = FileIdentifierDescriptor::padded_size(&node.name);
            if cur + fid_sz > alloc_sz {
                return Err(UdfError::Layout("miscalculated a directory entry size"));
            }

            let fe_sector = self.extents.allocate(1);
            let fe_rel = (fe_sector - ps) as u32;

            let mut fe = FileEntry::default();
            fe.tag = DescriptorTag::new(tag_id::FILE_ENTRY, fe_rel);
            let file_type = if node.is_dir() {
                IcbTag::FILE_TYPE_DIRECTORY
            } else {
                IcbTag::FILE_TYPE_BYTES
            };
            fe.icb_tag = icb_tag(file_type, (self_fe_sector - ps) as u32);
            fe.uid = FileEntry::ID_INVALID;
            fe.gid = FileEntry::ID_INVALID;
            fe.permissions = node.permissions;
            fe.file_link_count = if node.is_dir() {
                2 + files.subdirectory_count(node.id)
            } else {
                1
            };
            fe.information_length = node.size;
            fe.logical_blocks_recorded = (node.size + 2047) >> 11;
            fe.access_time = node.atime.clone();
            fe.modification_time = node.mtime.clone();
            fe.attribute_time = node.ctime.clone();
            fe.checkpoint = 1;
            fe.implementation_identifier = EntityId::new(0, IMPLEMENTATION_ID, &[]);
            fe.unique_id = node.id;

            if node.is_dir() {
                // sized and pointed at the child body during recursion
                fe.length_of_allocation_descriptors = ShortAd::SIZE as u32;
                fe.allocation_descriptors = vec![0u8; ShortAd::SIZE];
                dir_children.push((fe_sector, id));
            } else if node.size < EMBED_THRESHOLD {
                // the allocation descriptor area IS the file content,
                // see ECMA-167 4/14.6 “ICB tag”
                fe.icb_tag.flags = IcbTag::FLAGS_EMBEDDED;
                fe.length_of_allocation_descriptors = node.size as u32;
                fe.logical_blocks_recorded = 0;
                fe.allocation_descriptors = read_embedded(node);
                self.placements.push(FilePlacement {
                    node_id: id,
                    start: fe_sector,
                    end: fe_sector + 1,
                    embedded: true,
                });
            } else {
                fe.length_of_allocation_descriptors =
                    (slice_count(node.size) * ShortAd::SIZE) as u32;
                fe.allocation_descriptors =
                    vec![0u8; fe.length_of_allocation_descriptors as usize];
                file_children.push((fe_sector, id));
            }

            let mut fe_buf = vec![0u8; fe.len()];
            fe.write(&mut fe_buf);
            DescriptorTag::seal(&mut fe_buf, fe.len() - DescriptorTag::SIZE);
            self.extents.set_content(fe_sector, fe_buf);

            let fid = FileIdentifierDescriptor {
                tag: DescriptorTag::new(tag_id::FILE_IDENTIFIER_DESCRIPTOR, body_rel),
                file_version_number: 1,
                file_characteristics: node.characteristics,
                length_of_file_identifier: osta::identifier_len(&node.name) as u8,
                icb: LongAd::in_partition(SECTOR_SIZE as u32, fe_rel),
                length_of_implementation_use: 0,
                file_identifier: node.name.clone(),
            };
            fid.write(&mut dir_raw[cur..cur + fid_sz]);
            DescriptorTag::seal(&mut dir_raw[cur..cur + fid_sz], fid_sz - DescriptorTag::SIZE);
            cur += fid_sz;
        }

        self.extents.set_content(body_start, dir_raw);

        // the enclosing file entry finally knows its directory's size
        let fe_buf = self
            .extents
            .content_mut(self_fe_sector)
            .ok_or(UdfError::Layout("directory file entry missing"))?;
        fe_buf[56..64].copy_from_slice(&(alloc_sz as u64).to_le_bytes());
        fe_buf[64..72].copy_from_slice(&body_sectors.to_le_bytes());
        let ad_off = FileEntry::FIXED_SIZE;
        ShortAd::new(alloc_sz as u32, body_rel).write(&mut fe_buf[ad_off..ad_off + ShortAd::SIZE]);
        let crc_len = fe_buf.len() - DescriptorTag::SIZE;
        DescriptorTag::seal(fe_buf, crc_len);

        for (fe_sector, id) in dir_children {
            self.materialize_directory(id, fe_sector, self_fe_sector, None)?;
        }
        for (fe_sector, id) in file_children {
            self.attach_file_content(fe_sector, id)?;
        }
        Ok(())
    }

    /// Allocate the content extent of an external file and rewrite its
    /// File Entry's short_ad array, one descriptor per slice.
    fn attach_file_content(&mut self, fe_sector: u64, id: u64) -> Result<()> {
        let files = self.files;
        let node = files
            .get(id)
            .ok_or(UdfError::Layout("node vanished during build"))?;
        let blocks = (node.size + 2047) >> 11;
        let content_start = self.extents.allocate(blocks);
        self.extents.set_file(content_start, id);
        self.placements.push(FilePlacement {
            node_id: id,
            start: content_start,
            end: content_start + blocks,
            embedded: false,
        });
        let start_rel = (content_start - self.partition_start) as u32;

        let slices = slice_count(node.size);
        let mut ads = vec![0u8; slices * ShortAd::SIZE];
        let mut remaining = node.size;
        let mut pos = start_rel;
        let mut i = 0usize;
        while remaining > 0 {
            let this = remaining.min(MAX_SLICE_BYTES);
            ShortAd::new(this as u32, pos).write(&mut ads[i * ShortAd::SIZE..(i + 1) * ShortAd::SIZE]);
            remaining -= this;
            pos += this.div_ceil(SECTOR_SIZE as u64) as u32;
            i += 1;
        }
        if i != slices {
            return Err(UdfError::Layout("miscalculated the number of allocation extents"));
        }
        if u64::from(pos) != u64::from(start_rel) + blocks {
            return Err(UdfError::Layout("extent computation mismatch"));
        }

        let fe_buf = self
            .extents
            .content_mut(fe_sector)
            .ok_or(UdfError::Layout("file entry content missing"))?;
        let ad_off = FileEntry::FIXED_SIZE;
        fe_buf[ad_off..ad_off + ads.len()].copy_from_slice(&ads);
        let crc_len = fe_buf.len() - DescriptorTag::SIZE;
        DescriptorTag::seal(fe_buf, crc_len);
        Ok(())
    }

    fn patch_partition_length(&mut self, vds_start: u64) -> Result<()> {
        let highest = self.extents.highest_end();
        let len = (highest - self.partition_start) as u32;
        let vds = self
            .extents
            .content_mut(vds_start)
            .ok_or(UdfError::Layout("volume descriptor sequence missing"))?;
        let off = 2 * SECTOR_SIZE + PartitionDescriptor::PARTITION_LENGTH_OFFSET;
        vds[off..off + 4].copy_from_slice(&len.to_le_bytes());
        let pd = 2 * SECTOR_SIZE;
        DescriptorTag::seal(
            &mut vds[pd..pd + PartitionDescriptor::SIZE],
            PartitionDescriptor::SIZE - DescriptorTag::SIZE,
        );
        Ok(())
    }
}

/// Copy a small file straight into its File Entry. Read problems degrade
/// to zero padding with a warning, matching the per-entry scan policy.
fn read_embedded(node: &FileNode) -> Vec<u8> {
    let mut content = vec![0u8; node.size as usize];
    match File::open(&node.abspath) {
        Ok(mut f) => {
            let mut filled = 0usize;
            loop {
                match f.read(&mut content[filled..]) {
                    Ok(0) => break,
                    Ok(n) => {
                        filled += n;
                        if filled == content.len() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("read error on {}: {}", node.abspath.display(), e);
                        break;
                    }
                }
            }
            if filled < content.len() {
                warn!(
                    "read less data than expected for {}",
                    node.abspath.display()
                );
            }
        }
        Err(e) => warn!("cannot open {}: {}", node.abspath.display(), e),
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::ExtentSource;

    fn test_config() -> BuildConfig {
        BuildConfig {
            volume_label: "TEST".into(),
            volume_set_identifier: String::new(),
            source_root: "/src".into(),
            image_name: "/out.iso".into(),
            recording_time: 1_204_288_496,
        }
    }

    fn external_file(id: u64, name: &str, size: u64) -> FileNode {
        FileNode {
            id,
            parent: 0,
            name: name.into(),
            abspath: "/nonexistent".into(),
            size,
            characteristics: 0,
            permissions: FileEntry::PERMISSIONS_DEFAULT,
            atime: Timestamp::default(),
            ctime: Timestamp::default(),
            mtime: Timestamp::default(),
            digests: None,
        }
    }

    fn read_u32(buf: &[u8], off: usize) -> u32 {
        u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
    }

    #[test]
    fn test_empty_tree_layout() {
        let files = FileList::new();
        let layout = build(&files, &test_config()).unwrap();
        assert_eq!(layout.vds_start, 20);
        assert_eq!(layout.partition_start, 28);
        // recognition, bragging, VDS, reserved, LVID, anchor, partition head
        assert_eq!(layout.extents.highest_end(), 257);

        // the root directory body is one parent entry
        match &layout.extents.get(31).unwrap().source {
            ExtentSource::Content(body) => {
                assert_eq!(body.len(), 40);
                assert!(DescriptorTag::validate(body));
                let tag = DescriptorTag::read(body);
                assert_eq!(tag.tag_identifier, tag_id::FILE_IDENTIFIER_DESCRIPTOR);
            }
            _ => panic!("expected a directory body at sector 31"),
        }
    }

    #[test]
    fn test_partition_length_closure() {
        let files = FileList::new();
        let layout = build(&files, &test_config()).unwrap();
        let vds = match &layout.extents.get(layout.vds_start).unwrap().source {
            ExtentSource::Content(c) => c,
            _ => panic!(),
        };
        let pd = &vds[2 * SECTOR_SIZE..2 * SECTOR_SIZE + PartitionDescriptor::SIZE];
        assert!(DescriptorTag::validate(pd));
        let len = read_u32(pd, PartitionDescriptor::PARTITION_LENGTH_OFFSET);
        assert_eq!(
            u64::from(len),
            layout.extents.highest_end() - layout.partition_start
        );
        assert_eq!(read_u32(pd, 188), layout.partition_start as u32);
    }

    #[test]
    fn test_exactly_one_slice_at_slice_boundary() {
        // a file of exactly one slice gets exactly one short_ad
        let mut files = FileList::new();
        files.insert(external_file(1, "big", MAX_SLICE_BYTES));
        files.record_first_child(0, 1);
        let layout = build(&files, &test_config()).unwrap();

        // child FE lands on the first free sector after the root directory
        let fe = match &layout.extents.get(32).unwrap().source {
            ExtentSource::Content(c) => c,
            _ => panic!("expected file entry at sector 32"),
        };
        let content = layout
            .extents
            .iter()
            .find(|e| matches!(e.source, ExtentSource::File(1)))
            .expect("content extent");
        assert_eq!(content.sectors(), MAX_SLICE_BYTES / 2048);
        assert_eq!(fe.len(), FileEntry::FIXED_SIZE + 8);
        assert_eq!(read_u32(fe, 172), 8);
        assert_eq!(read_u32(fe, 176), MAX_SLICE_BYTES as u32);
        assert_eq!(
            u64::from(read_u32(fe, 180)),
            content.start - layout.partition_start
        );
        assert!(DescriptorTag::validate(fe));
    }

    #[test]
    fn test_two_slices_are_contiguous() {
        let mut files = FileList::new();
        files.insert(external_file(1, "big", 2 * MAX_SLICE_BYTES));
        files.record_first_child(0, 1);
        let layout = build(&files, &test_config()).unwrap();

        let fe = match &layout.extents.get(32).unwrap().source {
            ExtentSource::Content(c) => c,
            _ => panic!("expected file entry at sector 32"),
        };
        let content = layout
            .extents
            .iter()
            .find(|e| matches!(e.source, ExtentSource::File(1)))
            .expect("content extent");
        assert_eq!(content.sectors(), 2 * MAX_SLICE_BYTES / 2048);
        let rel = (content.start - layout.partition_start) as u32;
        assert_eq!(fe.len(), FileEntry::FIXED_SIZE + 16);
        assert_eq!(read_u32(fe, 172), 16);
        assert_eq!(read_u32(fe, 176), MAX_SLICE_BYTES as u32);
        assert_eq!(read_u32(fe, 180), rel);
        assert_eq!(read_u32(fe, 184), MAX_SLICE_BYTES as u32);
        assert_eq!(read_u32(fe, 188), rel + (MAX_SLICE_BYTES / 2048) as u32);
    }

    #[test]
    fn test_embed_threshold_boundary() {
        assert_eq!(EMBED_THRESHOLD, 1872);
        let mut files = FileList::new();
        files.insert(external_file(1, "edge", EMBED_THRESHOLD));
        files.record_first_child(0, 1);
        let layout = build(&files, &test_config()).unwrap();
        let fe = match &layout.extents.get(32).unwrap().source {
            ExtentSource::Content(c) => c,
            _ => panic!(),
        };
        // exactly at the threshold the file stays external
        let flags = u16::from_le_bytes([fe[34], fe[35]]);
        assert_eq!(flags, IcbTag::FLAGS_SHORT_AD);
        assert!(layout
            .extents
            .iter()
            .any(|e| matches!(e.source, ExtentSource::File(1))));
    }

    #[test]
    fn test_anchor_points_at_vds() {
        let files = FileList::new();
        let layout = build(&files, &test_config()).unwrap();
        let anchor = match &layout.extents.get(ANCHOR_SECTOR).unwrap().source {
            ExtentSource::Content(c) => c,
            _ => panic!(),
        };
        assert!(DescriptorTag::validate(anchor));
        let tag = DescriptorTag::read(anchor);
        assert_eq!(tag.tag_identifier, tag_id::ANCHOR_VOLUME_DESCRIPTOR_POINTER);
        assert_eq!(tag.tag_location, 256);
        assert_eq!(read_u32(anchor, 16), 2048 * 16);
        assert_eq!(u64::from(read_u32(anchor, 20)), layout.vds_start);
    }

    #[test]
    fn test_lvid_at_its_pointer() {
        let files = FileList::new();
        let layout = build(&files, &test_config()).unwrap();
        let lvid = match &layout.extents.get(LVID_SECTOR).unwrap().source {
            ExtentSource::Content(c) => c,
            _ => panic!(),
        };
        assert!(DescriptorTag::validate(lvid));
        let tag = DescriptorTag::read(lvid);
        assert_eq!(
            tag.tag_identifier,
            tag_id::LOGICAL_VOLUME_INTEGRITY_DESCRIPTOR
        );
        assert_eq!(u64::from(tag.tag_location), LVID_SECTOR);
        // integrity type 1 (closed) at +28
        assert_eq!(read_u32(lvid, 28), 1);
        // terminator in the second sector
        let term = &lvid[SECTOR_SIZE..SECTOR_SIZE + 16];
        assert_eq!(
            DescriptorTag::read(term).tag_identifier,
            tag_id::TERMINATING_DESCRIPTOR
        );
    }
}
