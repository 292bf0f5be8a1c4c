use std::fmt::Debug;

use chrono::{DateTime, Datelike, Timelike, Utc};
use static_assertions::assert_eq_size;

use crate::crc::cksum;
use crate::osta;

/// Standard logical sector size; the unit of all UDF addressing.
pub const SECTOR_SIZE: usize = 2048;

/// UDF 1.5.0 2.1.2 OSTA CS0 Charspec
#[derive(Clone, PartialEq)]
#[repr(C)]
pub struct CharSpec {
    /// should always be 0 in UDF
    pub character_set_type: u8,
    /// should always be “OSTA Compressed Unicode” in UDF padded with 0
    pub character_set_info: [u8; 63],
}
assert_eq_size!(CharSpec, [u8; 64]);
impl CharSpec {
    pub fn osta_compressed_unicode() -> Self {
        let mut info = [0u8; 63];
        info[..23].copy_from_slice(b"OSTA Compressed Unicode");
        Self {
            character_set_type: 0,
            character_set_info: info,
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0] = self.character_set_type;
        bytes[1..64].copy_from_slice(&self.character_set_info);
    }
}
impl Default for CharSpec {
    fn default() -> Self {
        Self {
            character_set_type: 0,
            character_set_info: [0; 63],
        }
    }
}

/// UDF 2.1.4 Timestamp aka ISO 13346 1/7.3
#[derive(Default, Clone, PartialEq)]
#[repr(C)]
pub struct Timestamp {
    pub type_and_timezone: u16,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub centiseconds: u8,
    pub hundreds_of_microseconds: u8,
    pub microseconds: u8,
}
assert_eq_size!(Timestamp, [u8; 12]);
impl Debug for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "Timestamp {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        ))
    }
}
impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        ))
    }
}
impl Timestamp {
    /// UTC calendar fields from a Unix time. TypeAndTimeZone bits 15-12 = 0
    /// (Coordinated Universal Time), offset 0.
    pub fn from_unix(secs: i64) -> Self {
        let dt = DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH);
        Self {
            type_and_timezone: 0,
            year: dt.year() as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
            centiseconds: 0,
            hundreds_of_microseconds: 0,
            microseconds: 0,
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&self.type_and_timezone.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.year.to_le_bytes());
        bytes[4] = self.month;
        bytes[5] = self.day;
        bytes[6] = self.hour;
        bytes[7] = self.minute;
        bytes[8] = self.second;
        bytes[9] = self.centiseconds;
        bytes[10] = self.hundreds_of_microseconds;
        bytes[11] = self.microseconds;
    }
}

/// 2.1.5 Entity Identifier aka ISO 13346 1/7.4
/// http://www.osta.org/specs/pdf/udf150.pdf#page=17
#[derive(Clone, PartialEq)]
#[repr(C)]
pub struct EntityId {
    pub flags: u8,
    pub identifier: [u8; 23],
    pub identifier_suffix: [u8; 8],
}
assert_eq_size!(EntityId, [u8; 32]);
impl Default for EntityId {
    fn default() -> Self {
        Self {
            flags: 0,
            identifier: [0; 23],
            identifier_suffix: [0; 8],
        }
    }
}
impl EntityId {
    pub fn new(flags: u8, identifier: &str, suffix: &[u8]) -> Self {
        let mut id = [0u8; 23];
        let b = identifier.as_bytes();
        let n = b.len().min(23);
        id[..n].copy_from_slice(&b[..n]);
        let mut sfx = [0u8; 8];
        let n = suffix.len().min(8);
        sfx[..n].copy_from_slice(&suffix[..n]);
        Self {
            flags,
            identifier: id,
            identifier_suffix: sfx,
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0] = self.flags;
        bytes[1..24].copy_from_slice(&self.identifier);
        bytes[24..32].copy_from_slice(&self.identifier_suffix);
    }
}

/// ECMA-167 3/7.1 Extent Descriptor aka extent_ad
#[derive(Default, Debug, Clone)]
#[repr(C)]
pub struct ExtentAd {
    /// length in bytes
    pub length_bytes: u32,
    /// location in logical sector number, or 0 if length is 0
    pub location_sector: u32,
}
assert_eq_size!(ExtentAd, [u8; 8]);
impl ExtentAd {
    pub fn new(length_bytes: u32, location_sector: u32) -> Self {
        Self {
            length_bytes,
            location_sector,
        }
    }
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.length_bytes.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.location_sector.to_le_bytes());
    }
}

/// ECMA-167 4/7.1 Recorded address aka lb_addr
#[derive(Default, Debug, Clone, PartialEq, Copy)]
#[repr(C, packed)]
pub struct LbAddr {
    pub logical_block_number: u32,
    pub partition_reference_number: u16,
}
assert_eq_size!(LbAddr, [u8; 6]);
impl LbAddr {
    pub fn in_partition(logical_block_number: u32) -> Self {
        Self {
            logical_block_number,
            partition_reference_number: 0,
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        let lbn = self.logical_block_number;
        let prn = self.partition_reference_number;
        bytes[0..4].copy_from_slice(&lbn.to_le_bytes());
        bytes[4..6].copy_from_slice(&prn.to_le_bytes());
    }
}

/// ECMA-167 4/14.14.2 Long Allocation Descriptor aka long_ad
#[derive(Default, Debug, Clone, PartialEq)]
#[repr(C)]
pub struct LongAd {
    /// length in bytes, with most significant 2 bits used for flags
    pub extent_length_and_type: u32,
    pub extent_location: LbAddr,
    pub implementation_use: [u8; 6],
}
assert_eq_size!(LongAd, [u8; 16]);
impl LongAd {
    /// A recorded-and-allocated extent inside partition 0.
    pub fn in_partition(length_bytes: u32, logical_block_number: u32) -> Self {
        Self {
            extent_length_and_type: length_bytes,
            extent_location: LbAddr::in_partition(logical_block_number),
            implementation_use: [0; 6],
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.extent_length_and_type.to_le_bytes());
        self.extent_location.write(&mut bytes[4..10]);
        bytes[10..16].copy_from_slice(&self.implementation_use);
    }
}

/// ECMA-167 4/14.14.1 Short Allocation Descriptor aka short_ad
#[derive(Default, Debug, Clone)]
#[repr(C)]
pub struct ShortAd {
    /// bits 30-31 carry the extent type; always 0 (recorded and allocated) here
    pub extent_length_and_type: u32,
    /// logical block number within the partition
    pub extent_position: u32,
}
assert_eq_size!(ShortAd, [u8; 8]);
impl ShortAd {
    pub const SIZE: usize = 8;

    pub fn new(length_bytes: u32, extent_position: u32) -> Self {
        Self {
            extent_length_and_type: length_bytes,
            extent_position,
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.extent_length_and_type.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.extent_position.to_le_bytes());
    }
}

/// ECMA-167 4/14.6 ICB tag
/// UDF 2.3.5 http://www.osta.org/specs/pdf/udf260.pdf#page=60
#[derive(Default, Debug, Clone)]
#[repr(C)]
pub struct IcbTag {
    pub prior_recorded_number_of_direct_entries: u32,
    pub strategy_type: u16,
    pub strategy_parameter: [u8; 2],
    pub maximum_number_of_entries: u16,
    pub reserved: u8,
    pub file_type: u8,
    pub parent_icb_location: LbAddr,
    pub flags: u16,
}
assert_eq_size!(IcbTag, [u8; 20]);
impl IcbTag {
    pub const FILE_TYPE_DIRECTORY: u8 = 4;
    pub const FILE_TYPE_BYTES: u8 = 5;
    /// non-relocatable, short_ad allocation descriptors
    pub const FLAGS_SHORT_AD: u16 = 0x0230;
    /// non-relocatable, the allocation descriptor area IS the file content
    pub const FLAGS_EMBEDDED: u16 = 0x0233;

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.prior_recorded_number_of_direct_entries.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.strategy_type.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.strategy_parameter);
        bytes[8..10].copy_from_slice(&self.maximum_number_of_entries.to_le_bytes());
        bytes[10] = self.reserved;
        bytes[11] = self.file_type;
        self.parent_icb_location.write(&mut bytes[12..18]);
        bytes[18..20].copy_from_slice(&self.flags.to_le_bytes());
    }
}

/// DescriptorTag is the 16-byte header of all UDF descriptors.
/// UDF Descriptor Tag aka ISO 13346 3/7.2
// http://www.osta.org/specs/pdf/udf150.pdf#page=22
#[derive(Default, Debug, Clone, PartialEq)]
#[repr(C)]
pub struct DescriptorTag {
    pub tag_identifier: u16,
    pub descriptor_version: u16,
    /// “This field shall specify the sum modulo 256 of bytes 0-3 and 5-15 of the tag”
    /// ECMA-167 7.2.3 Tag Checksum
    pub tag_checksum: u8,
    pub _reserved: u8,
    pub tag_serial_number: u16,
    pub descriptor_crc: u16,
    /// UDF 1.5.0 2.2.1.2: “(Size of the Descriptor) - (Length of Descriptor Tag)”
    pub descriptor_crc_length: u16,
    pub tag_location: u32,
}
assert_eq_size!(DescriptorTag, [u8; 16]);
impl DescriptorTag {
    pub const SIZE: usize = 16;

    /// Checksum and CRC are filled in by [`DescriptorTag::seal`] once the
    /// descriptor bytes are final.
    pub fn new(tag_identifier: u16, tag_location: u32) -> Self {
        Self {
            tag_identifier,
            descriptor_version: 2,
            tag_serial_number: 1,
            tag_location,
            ..Default::default()
        }
    }

    pub fn read(bytes: &[u8]) -> Self {
        let mut r = Self::default();
        r.tag_identifier = u16::from_le_bytes([bytes[0], bytes[1]]);
        r.descriptor_version = u16::from_le_bytes([bytes[2], bytes[3]]);
        r.tag_checksum = bytes[4];
        r._reserved = bytes[5];
        r.tag_serial_number = u16::from_le_bytes([bytes[6], bytes[7]]);
        r.descriptor_crc = u16::from_le_bytes([bytes[8], bytes[9]]);
        r.descriptor_crc_length = u16::from_le_bytes([bytes[10], bytes[11]]);
        r.tag_location = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        r
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&self.tag_identifier.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.descriptor_version.to_le_bytes());
        bytes[4] = self.tag_checksum;
        bytes[5] = self._reserved;
        bytes[6..8].copy_from_slice(&self.tag_serial_number.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.descriptor_crc.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.descriptor_crc_length.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.tag_location.to_le_bytes());
    }

    /// Seal a serialized descriptor in place: DescriptorCRC over the
    /// `crc_len` bytes following the tag, then the tag checksum over tag
    /// bytes 0-3 and 5-15.
    pub fn seal(buf: &mut [u8], crc_len: usize) {
        let crc = cksum(&buf[16..16 + crc_len]);
        buf[8..10].copy_from_slice(&crc.to_le_bytes());
        buf[10..12].copy_from_slice(&(crc_len as u16).to_le_bytes());
        let checksum = buf[0..4]
            .iter()
            .chain(&buf[5..16])
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        buf[4] = checksum;
    }

    /// Recompute checksum and CRC of a sealed descriptor; used by tests
    /// to verify what the builder emitted.
    pub fn validate(buf: &[u8]) -> bool {
        let tag = DescriptorTag::read(&buf[0..16]);
        let checksum = buf[0..4]
            .iter()
            .chain(&buf[5..16])
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        if tag.tag_checksum != checksum {
            return false;
        }
        let end = 16 + tag.descriptor_crc_length as usize;
        if end > buf.len() {
            return false;
        }
        tag.descriptor_crc_length == 0 || cksum(&buf[16..end]) == tag.descriptor_crc
    }
}

/// Tag identifier values (ECMA-167 3/7.2.1 and 4/7.2.1)
pub mod tag_id {
    pub const PRIMARY_VOLUME_DESCRIPTOR: u16 = 1;
    pub const ANCHOR_VOLUME_DESCRIPTOR_POINTER: u16 = 2;
    pub const IMPLEMENTATION_USE_VOLUME_DESCRIPTOR: u16 = 4;
    pub const PARTITION_DESCRIPTOR: u16 = 5;
    pub const LOGICAL_VOLUME_DESCRIPTOR: u16 = 6;
    pub const UNALLOCATED_SPACE_DESCRIPTOR: u16 = 7;
    pub const TERMINATING_DESCRIPTOR: u16 = 8;
    pub const LOGICAL_VOLUME_INTEGRITY_DESCRIPTOR: u16 = 9;
    pub const FILE_SET_DESCRIPTOR: u16 = 256;
    pub const FILE_IDENTIFIER_DESCRIPTOR: u16 = 257;
    pub const FILE_ENTRY: u16 = 261;
}

/// Volume recognition descriptor (ECMA-167 2/9.1): BEA01, NSR02, TEA01.
/// Untagged; only the first 7 bytes carry information.
pub struct VolumeStructureDescriptor {
    pub structure_type: u8,
    pub standard_identifier: [u8; 5],
    pub structure_version: u8,
}
impl VolumeStructureDescriptor {
    /// Meaningful prefix recorded into the extent map.
    pub const SIZE: usize = 32;

    pub fn new(standard_identifier: &[u8; 5]) -> Self {
        Self {
            structure_type: 0,
            standard_identifier: *standard_identifier,
            structure_version: 1,
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0] = self.structure_type;
        bytes[1..6].copy_from_slice(&self.standard_identifier);
        bytes[6] = self.structure_version;
    }
}

/// UDF Primary Volume Descriptor aka ISO 13346 3/10.1
// UDF 1.5.0 2.2.2 http://www.osta.org/specs/pdf/udf150.pdf#page=22
#[derive(Clone)]
#[repr(C)]
pub struct PrimaryVolumeDescriptor {
    pub tag: DescriptorTag,
    pub volume_descriptor_sequence_number: u32,
    pub primary_volume_descriptor_number: u32,
    pub volume_identifier: [u8; 32],
    pub volume_sequence_number: u16,
    pub maximum_volume_sequence_number: u16,
    pub interchange_level: u16,
    pub maximum_interchange_level: u16,
    pub character_set_list: u32,
    pub maximum_character_set_list: u32,
    pub volume_set_identifier: [u8; 128],
    pub descriptor_character_set: CharSpec,
    pub explanatory_character_set: CharSpec,
    pub volume_abstract: ExtentAd,
    pub volume_copyright_notice: ExtentAd,
    pub application_identifier: EntityId,
    pub recording_date_and_time: Timestamp,
    pub implementation_identifier: EntityId,
    pub implementation_use: [u8; 64],
    pub predecessor_volume_descriptor_sequence_location: u32,
    pub flags: u16,
    pub reserved: [u8; 22],
}
impl Default for PrimaryVolumeDescriptor {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            volume_descriptor_sequence_number: 0,
            primary_volume_descriptor_number: 0,
            volume_identifier: [0; 32],
            volume_sequence_number: 0,
            maximum_volume_sequence_number: 0,
            interchange_level: 0,
            maximum_interchange_level: 0,
            character_set_list: 0,
            maximum_character_set_list: 0,
            volume_set_identifier: [0; 128],
            descriptor_character_set: Default::default(),
            explanatory_character_set: Default::default(),
            volume_abstract: Default::default(),
            volume_copyright_notice: Default::default(),
            application_identifier: Default::default(),
            recording_date_and_time: Default::default(),
            implementation_identifier: Default::default(),
            implementation_use: [0; 64],
            predecessor_volume_descriptor_sequence_location: 0,
            flags: 0,
            reserved: [0; 22],
        }
    }
}
impl PrimaryVolumeDescriptor {
    pub const SIZE: usize = 512;

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..20].copy_from_slice(&self.volume_descriptor_sequence_number.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.primary_volume_descriptor_number.to_le_bytes());
        bytes[24..56].copy_from_slice(&self.volume_identifier);
        bytes[56..58].copy_from_slice(&self.volume_sequence_number.to_le_bytes());
        bytes[58..60].copy_from_slice(&self.maximum_volume_sequence_number.to_le_bytes());
        bytes[60..62].copy_from_slice(&self.interchange_level.to_le_bytes());
        bytes[62..64].copy_from_slice(&self.maximum_interchange_level.to_le_bytes());
        bytes[64..68].copy_from_slice(&self.character_set_list.to_le_bytes());
        bytes[68..72].copy_from_slice(&self.maximum_character_set_list.to_le_bytes());
        bytes[72..200].copy_from_slice(&self.volume_set_identifier);
        self.descriptor_character_set.write(&mut bytes[200..264]);
        self.explanatory_character_set.write(&mut bytes[264..328]);
        self.volume_abstract.write(&mut bytes[328..336]);
        self.volume_copyright_notice.write(&mut bytes[336..344]);
        self.application_identifier.write(&mut bytes[344..376]);
        self.recording_date_and_time.write(&mut bytes[376..388]);
        self.implementation_identifier.write(&mut bytes[388..420]);
        bytes[420..484].copy_from_slice(&self.implementation_use);
        bytes[484..488].copy_from_slice(
            &self
                .predecessor_volume_descriptor_sequence_location
                .to_le_bytes(),
        );
        bytes[488..490].copy_from_slice(&self.flags.to_le_bytes());
        bytes[490..512].copy_from_slice(&self.reserved);
    }
}

/// UDF Implementation Use Volume Descriptor aka ISO 13346 3/10.4.
/// Carries the “*UDF LV Info” block, and the Report/Hashtbl sidecar
/// pointers when those are appended to the image.
#[derive(Clone)]
#[repr(C)]
pub struct ImplementationUseVolumeDescriptor {
    pub tag: DescriptorTag,
    pub volume_descriptor_sequence_number: u32,
    pub implementation_identifier: EntityId,
    pub implementation_use: [u8; 460],
}
impl Default for ImplementationUseVolumeDescriptor {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            volume_descriptor_sequence_number: 0,
            implementation_identifier: Default::default(),
            implementation_use: [0; 460],
        }
    }
}
impl ImplementationUseVolumeDescriptor {
    pub const SIZE: usize = 512;

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..20].copy_from_slice(&self.volume_descriptor_sequence_number.to_le_bytes());
        self.implementation_identifier.write(&mut bytes[20..52]);
        bytes[52..512].copy_from_slice(&self.implementation_use);
    }
}

/// UDF Partition Descriptor aka ISO 13346 3/10.5
#[derive(Clone)]
#[repr(C)]
pub struct PartitionDescriptor {
    pub tag: DescriptorTag,
    pub volume_descriptor_sequence_number: u32,
    pub partition_flags: u16,
    pub partition_number: u16,
    pub partition_contents: EntityId,
    pub partition_contents_use: [u8; 128],
    /// 1 = read only
    pub access_type: u32,
    pub partition_starting_location: u32,
    /// length in blocks
    pub partition_length: u32,
    pub implementation_identifier: EntityId,
    pub implementation_use: [u8; 128],
    pub reserved: [u8; 156],
}
impl Default for PartitionDescriptor {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            volume_descriptor_sequence_number: 0,
            partition_flags: 0,
            partition_number: 0,
            partition_contents: Default::default(),
            partition_contents_use: [0; 128],
            access_type: 0,
            partition_starting_location: 0,
            partition_length: 0,
            implementation_identifier: Default::default(),
            implementation_use: [0; 128],
            reserved: [0; 156],
        }
    }
}
impl PartitionDescriptor {
    pub const SIZE: usize = 512;
    /// byte offset of PartitionLength inside the serialized descriptor;
    /// patched after the last extent is allocated
    pub const PARTITION_LENGTH_OFFSET: usize = 192;

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..20].copy_from_slice(&self.volume_descriptor_sequence_number.to_le_bytes());
        bytes[20..22].copy_from_slice(&self.partition_flags.to_le_bytes());
        bytes[22..24].copy_from_slice(&self.partition_number.to_le_bytes());
        self.partition_contents.write(&mut bytes[24..56]);
        bytes[56..184].copy_from_slice(&self.partition_contents_use);
        bytes[184..188].copy_from_slice(&self.access_type.to_le_bytes());
        bytes[188..192].copy_from_slice(&self.partition_starting_location.to_le_bytes());
        bytes[192..196].copy_from_slice(&self.partition_length.to_le_bytes());
        self.implementation_identifier.write(&mut bytes[196..228]);
        bytes[228..356].copy_from_slice(&self.implementation_use);
        bytes[356..512].copy_from_slice(&self.reserved);
    }
}

/// ECMA-167 3/10.7.2 Type 1 Partition Map
#[derive(Default, Debug, Clone)]
pub struct Type1PartitionMap {
    pub volume_sequence_number: u16,
    pub partition_number: u16,
}
impl Type1PartitionMap {
    pub const SIZE: usize = 6;

    pub fn write(&self, bytes: &mut [u8]) {
        bytes[0] = 1; // type
        bytes[1] = Self::SIZE as u8;
        bytes[2..4].copy_from_slice(&self.volume_sequence_number.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.partition_number.to_le_bytes());
    }
}

/// UDF Logical Volume Descriptor aka ISO 13346 3/10.6.
/// The single Type 1 partition map follows the 440 fixed bytes.
#[derive(Clone)]
#[repr(C)]
pub struct LogicalVolumeDescriptor {
    pub tag: DescriptorTag,
    pub volume_descriptor_sequence_number: u32,
    pub descriptor_character_set: CharSpec,
    pub logical_volume_identifier: [u8; 128],
    pub logical_block_size: u32,
    pub domain_identifier: EntityId,
    /// holds a long_ad to the File Set Descriptor
    pub logical_volume_contents_use: [u8; 16],
    pub map_table_length: u32,
    pub number_of_partition_maps: u32,
    pub implementation_identifier: EntityId,
    pub implementation_use: [u8; 128],
    /// points to the Logical Volume Integrity Descriptor
    pub integrity_sequence_extent: ExtentAd,
    pub partition_map: Type1PartitionMap,
}
impl Default for LogicalVolumeDescriptor {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            volume_descriptor_sequence_number: 0,
            descriptor_character_set: Default::default(),
            logical_volume_identifier: [0; 128],
            logical_block_size: 0,
            domain_identifier: Default::default(),
            logical_volume_contents_use: [0; 16],
            map_table_length: 0,
            number_of_partition_maps: 0,
            implementation_identifier: Default::default(),
            implementation_use: [0; 128],
            integrity_sequence_extent: Default::default(),
            partition_map: Default::default(),
        }
    }
}
impl LogicalVolumeDescriptor {
    pub const SIZE: usize = 440 + Type1PartitionMap::SIZE;

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..20].copy_from_slice(&self.volume_descriptor_sequence_number.to_le_bytes());
        self.descriptor_character_set.write(&mut bytes[20..84]);
        bytes[84..212].copy_from_slice(&self.logical_volume_identifier);
        bytes[212..216].copy_from_slice(&self.logical_block_size.to_le_bytes());
        self.domain_identifier.write(&mut bytes[216..248]);
        bytes[248..264].copy_from_slice(&self.logical_volume_contents_use);
        bytes[264..268].copy_from_slice(&self.map_table_length.to_le_bytes());
        bytes[268..272].copy_from_slice(&self.number_of_partition_maps.to_le_bytes());
        self.implementation_identifier.write(&mut bytes[272..304]);
        bytes[304..432].copy_from_slice(&self.implementation_use);
        self.integrity_sequence_extent.write(&mut bytes[432..440]);
        self.partition_map.write(&mut bytes[440..446]);
    }
}

/// ECMA-167 3/10.8 Unallocated Space Descriptor; zero descriptors on
/// read-only media.
#[derive(Default, Clone)]
#[repr(C)]
pub struct UnallocatedSpaceDescriptor {
    pub tag: DescriptorTag,
    pub volume_descriptor_sequence_number: u32,
    pub number_of_allocation_descriptors: u32,
}
impl UnallocatedSpaceDescriptor {
    pub const SIZE: usize = 24;

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..20].copy_from_slice(&self.volume_descriptor_sequence_number.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.number_of_allocation_descriptors.to_le_bytes());
    }
}

/// ECMA-167 3/10.9 and 4/14.2 Terminating Descriptor: a tag and reserved
/// zeros.
#[derive(Default, Clone)]
pub struct TerminatingDescriptor {
    pub tag: DescriptorTag,
}
impl TerminatingDescriptor {
    pub const SIZE: usize = 16;

    pub fn new(tag_location: u32) -> Self {
        Self {
            tag: DescriptorTag::new(tag_id::TERMINATING_DESCRIPTOR, tag_location),
        }
    }

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
    }
}

/// Implementation use block of the LVID per UDF 1.02 2.2.6.4.
#[derive(Clone)]
pub struct LvidImplementationUse {
    pub implementation_id: EntityId,
    pub number_of_files: u32,
    pub number_of_directories: u32,
    pub minimum_udf_read_revision: u16,
    pub minimum_udf_write_revision: u16,
    pub maximum_udf_write_revision: u16,
}
impl LvidImplementationUse {
    pub const SIZE: usize = 46;

    pub fn write(&self, bytes: &mut [u8]) {
        self.implementation_id.write(&mut bytes[0..32]);
        bytes[32..36].copy_from_slice(&self.number_of_files.to_le_bytes());
        bytes[36..40].copy_from_slice(&self.number_of_directories.to_le_bytes());
        bytes[40..42].copy_from_slice(&self.minimum_udf_read_revision.to_le_bytes());
        bytes[42..44].copy_from_slice(&self.minimum_udf_write_revision.to_le_bytes());
        bytes[44..46].copy_from_slice(&self.maximum_udf_write_revision.to_le_bytes());
    }
}

/// ECMA-167 3/10.10 Logical Volume Integrity Descriptor, with exactly one
/// partition entry in the free-space and size tables.
#[derive(Clone)]
#[repr(C)]
pub struct LogicalVolumeIntegrityDescriptor {
    pub tag: DescriptorTag,
    pub recording_date_and_time: Timestamp,
    /// 1 = close integrity descriptor
    pub integrity_type: u32,
    pub next_integrity_extent: ExtentAd,
    pub logical_volume_contents_use: [u8; 32],
    pub number_of_partitions: u32,
    pub length_of_implementation_use: u32,
    pub free_space_table: u32,
    pub size_table: u32,
    pub implementation_use: LvidImplementationUse,
}
impl LogicalVolumeIntegrityDescriptor {
    pub const SIZE: usize = 88 + LvidImplementationUse::SIZE;

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        self.recording_date_and_time.write(&mut bytes[16..28]);
        bytes[28..32].copy_from_slice(&self.integrity_type.to_le_bytes());
        self.next_integrity_extent.write(&mut bytes[32..40]);
        bytes[40..72].copy_from_slice(&self.logical_volume_contents_use);
        bytes[72..76].copy_from_slice(&self.number_of_partitions.to_le_bytes());
        bytes[76..80].copy_from_slice(&self.length_of_implementation_use.to_le_bytes());
        bytes[80..84].copy_from_slice(&self.free_space_table.to_le_bytes());
        bytes[84..88].copy_from_slice(&self.size_table.to_le_bytes());
        self.implementation_use.write(&mut bytes[88..134]);
    }
}

/// UDF Anchor Volume Descriptor Pointer aka ISO 13346 3/10.2, recorded at
/// logical sector 256. Only the first 32 bytes carry information.
#[derive(Default, Clone)]
#[repr(C)]
pub struct AnchorVolumeDescriptorPointer {
    pub tag: DescriptorTag,
    pub main_volume_descriptor_sequence_extent: ExtentAd,
    pub reserve_volume_descriptor_sequence_extent: ExtentAd,
}
impl AnchorVolumeDescriptorPointer {
    pub const SIZE: usize = 32;

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        self.main_volume_descriptor_sequence_extent
            .write(&mut bytes[16..24]);
        self.reserve_volume_descriptor_sequence_extent
            .write(&mut bytes[24..32]);
    }
}

/// UDF 2.3.2 File Set Descriptor aka ECMA 167 4/14.1.
/// Bytes 480..511 are reserved; only the first 480 are recorded.
#[derive(Clone)]
#[repr(C)]
pub struct FileSetDescriptor {
    pub tag: DescriptorTag,
    pub recording_date_and_time: Timestamp,
    pub interchange_level: u16,
    pub maximum_interchange_level: u16,
    pub character_set_list: u32,
    pub maximum_character_set_list: u32,
    pub file_set_number: u32,
    pub file_set_descriptor_number: u32,
    pub logical_volume_identifier_character_set: CharSpec,
    pub logical_volume_identifier: [u8; 128],
    pub file_set_character_set: CharSpec,
    pub file_set_identifier: [u8; 32],
    pub copyright_file_identifier: [u8; 32],
    pub abstract_file_identifier: [u8; 32],
    pub root_directory_icb: LongAd,
    pub domain_identifier: EntityId,
    pub next_extent: LongAd,
    pub system_stream_directory_icb: LongAd,
}
impl Default for FileSetDescriptor {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            recording_date_and_time: Default::default(),
            interchange_level: 0,
            maximum_interchange_level: 0,
            character_set_list: 0,
            maximum_character_set_list: 0,
            file_set_number: 0,
            file_set_descriptor_number: 0,
            logical_volume_identifier_character_set: Default::default(),
            logical_volume_identifier: [0; 128],
            file_set_character_set: Default::default(),
            file_set_identifier: [0; 32],
            copyright_file_identifier: [0; 32],
            abstract_file_identifier: [0; 32],
            root_directory_icb: Default::default(),
            domain_identifier: Default::default(),
            next_extent: Default::default(),
            system_stream_directory_icb: Default::default(),
        }
    }
}
impl FileSetDescriptor {
    pub const SIZE: usize = 480;

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        self.recording_date_and_time.write(&mut bytes[16..28]);
        bytes[28..30].copy_from_slice(&self.interchange_level.to_le_bytes());
        bytes[30..32].copy_from_slice(&self.maximum_interchange_level.to_le_bytes());
        bytes[32..36].copy_from_slice(&self.character_set_list.to_le_bytes());
        bytes[36..40].copy_from_slice(&self.maximum_character_set_list.to_le_bytes());
        bytes[40..44].copy_from_slice(&self.file_set_number.to_le_bytes());
        bytes[44..48].copy_from_slice(&self.file_set_descriptor_number.to_le_bytes());
        self.logical_volume_identifier_character_set
            .write(&mut bytes[48..112]);
        bytes[112..240].copy_from_slice(&self.logical_volume_identifier);
        self.file_set_character_set.write(&mut bytes[240..304]);
        bytes[304..336].copy_from_slice(&self.file_set_identifier);
        bytes[336..368].copy_from_slice(&self.copyright_file_identifier);
        bytes[368..400].copy_from_slice(&self.abstract_file_identifier);
        self.root_directory_icb.write(&mut bytes[400..416]);
        self.domain_identifier.write(&mut bytes[416..448]);
        self.next_extent.write(&mut bytes[448..464]);
        self.system_stream_directory_icb.write(&mut bytes[464..480]);
    }
}

/// File Entry is like an inode in Unix: permissions, timestamps, and the
/// allocation descriptors (or, for small files, the content itself)
/// pointing at data blocks.
/// ECMA-167 4/14.9 File Entry
#[derive(Clone)]
#[repr(C)]
pub struct FileEntry {
    pub tag: DescriptorTag,
    pub icb_tag: IcbTag,
    pub uid: u32,
    pub gid: u32,
    pub permissions: u32,
    pub file_link_count: u16,
    pub record_format: u8,
    pub record_display_attributes: u8,
    pub record_length: u32,
    pub information_length: u64,
    pub logical_blocks_recorded: u64,
    pub access_time: Timestamp,
    pub modification_time: Timestamp,
    pub attribute_time: Timestamp,
    pub checkpoint: u32,
    pub extended_attribute_icb: LongAd,
    pub implementation_identifier: EntityId,
    pub unique_id: u64,
    pub length_of_extended_attributes: u32,
    pub length_of_allocation_descriptors: u32,
    /// short_ad array, or the file content itself when the in-ICB flag
    /// is set. “Only Short Allocation Descriptors shall be used.”
    /// http://www.osta.org/specs/pdf/udf260.pdf#page=64
    pub allocation_descriptors: Vec<u8>,
}
impl Default for FileEntry {
    fn default() -> Self {
        Self {
            tag: Default::default(),
            icb_tag: Default::default(),
            uid: 0,
            gid: 0,
            permissions: 0,
            file_link_count: 0,
            record_format: 0,
            record_display_attributes: 0,
            record_length: 0,
            information_length: 0,
            logical_blocks_recorded: 0,
            access_time: Default::default(),
            modification_time: Default::default(),
            attribute_time: Default::default(),
            checkpoint: 0,
            extended_attribute_icb: Default::default(),
            implementation_identifier: Default::default(),
            unique_id: 0,
            length_of_extended_attributes: 0,
            length_of_allocation_descriptors: 0,
            allocation_descriptors: Vec::new(),
        }
    }
}
impl FileEntry {
    /// fixed bytes before the extended attribute / allocation descriptor
    /// areas
    pub const FIXED_SIZE: usize = 176;
    /// invalid uid/gid sentinel
    pub const ID_INVALID: u32 = 0xFFFF_FFFF;
    /// rwxr-xr-x in the UDF permission layout
    pub const PERMISSIONS_DEFAULT: u32 = 0x14A5;

    pub fn len(&self) -> usize {
        Self::FIXED_SIZE
            + self.length_of_extended_attributes as usize
            + self.length_of_allocation_descriptors as usize
    }

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        self.icb_tag.write(&mut bytes[16..36]);
        bytes[36..40].copy_from_slice(&self.uid.to_le_bytes());
        bytes[40..44].copy_from_slice(&self.gid.to_le_bytes());
        bytes[44..48].copy_from_slice(&self.permissions.to_le_bytes());
        bytes[48..50].copy_from_slice(&self.file_link_count.to_le_bytes());
        bytes[50] = self.record_format;
        bytes[51] = self.record_display_attributes;
        bytes[52..56].copy_from_slice(&self.record_length.to_le_bytes());
        bytes[56..64].copy_from_slice(&self.information_length.to_le_bytes());
        bytes[64..72].copy_from_slice(&self.logical_blocks_recorded.to_le_bytes());
        self.access_time.write(&mut bytes[72..84]);
        self.modification_time.write(&mut bytes[84..96]);
        self.attribute_time.write(&mut bytes[96..108]);
        bytes[108..112].copy_from_slice(&self.checkpoint.to_le_bytes());
        self.extended_attribute_icb.write(&mut bytes[112..128]);
        self.implementation_identifier.write(&mut bytes[128..160]);
        bytes[160..168].copy_from_slice(&self.unique_id.to_le_bytes());
        bytes[168..172].copy_from_slice(&self.length_of_extended_attributes.to_le_bytes());
        bytes[172..176].copy_from_slice(&self.length_of_allocation_descriptors.to_le_bytes());
        bytes[176..176 + self.allocation_descriptors.len()]
            .copy_from_slice(&self.allocation_descriptors);
    }
}

/// UDF 2.3.4 File Identifier Descriptor aka ECMA 167 4/14.4: one directory
/// entry, padded to the next 4-byte boundary.
#[derive(Clone)]
#[repr(C)]
pub struct FileIdentifierDescriptor {
    pub tag: DescriptorTag,
    pub file_version_number: u16,
    /// see ECMA-167 14.4.3 File Characteristics (RBP 18)
    pub file_characteristics: u8,
    pub length_of_file_identifier: u8,
    pub icb: LongAd,
    pub length_of_implementation_use: u16,
    /// length 0 for the parent entry, otherwise the child name
    pub file_identifier: String,
}
impl FileIdentifierDescriptor {
    pub const FILE_CHARACTERISTIC_DIRECTORY: u8 = 0b0000_0010;
    /// directory bit + parent bit, as carried by the leading “..” entry
    pub const FILE_CHARACTERISTIC_PARENT_DIR: u8 = 0b0000_1010;

    /// Recorded size of a FID for a given name: the 38 fixed bytes, no
    /// implementation use, the compressed identifier, rounded up to a
    /// 4-byte boundary. The parent FID (empty name) is exactly 40 bytes.
    pub fn padded_size(name: &str) -> usize {
        let sz = 38 + if name.is_empty() {
            0
        } else {
            osta::identifier_len(name)
        };
        (sz + 3) & !3
    }

    pub fn len(&self) -> usize {
        Self::padded_size(&self.file_identifier)
    }

    pub fn write(&self, bytes: &mut [u8]) {
        self.tag.write(&mut bytes[0..16]);
        bytes[16..18].copy_from_slice(&self.file_version_number.to_le_bytes());
        bytes[18] = self.file_characteristics;
        bytes[19] = self.length_of_file_identifier;
        self.icb.write(&mut bytes[20..36]);
        bytes[36..38].copy_from_slice(&self.length_of_implementation_use.to_le_bytes());
        let id_len = self.length_of_file_identifier as usize;
        if id_len > 0 {
            osta::pack_dstring_ne(&mut bytes[38..38 + id_len], &self.file_identifier);
        }
    }
}
