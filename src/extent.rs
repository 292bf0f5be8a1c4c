use std::collections::BTreeMap;

/// What a sector range carries at write time.
pub enum ExtentSource {
    /// Pre-rendered bytes; shorter than the extent, the remainder is
    /// zero-filled. An empty vector reserves the range.
    Content(Vec<u8>),
    /// Stream the bytes of this scanned file (by node id).
    File(u64),
}

/// A half-open range of consecutive 2048-byte sectors owned by one
/// descriptor or one file's content.
pub struct OutputExtent {
    pub start: u64,
    pub end: u64,
    pub source: ExtentSource,
}

impl OutputExtent {
    pub fn sectors(&self) -> u64 {
        self.end - self.start
    }
}

/// Byte range [start,end] within a single sector that stays zero; feeds
/// the gap-list sidecar.
#[derive(Clone, Copy)]
pub struct SectorGap {
    pub start: u32,
    pub end: u32,
}

/// Sorted view of everything placed on the disc. Sectors [0,16) are the
/// unused system area and are never allocated.
pub struct ExtentMap {
    extents: BTreeMap<u64, OutputExtent>,
    /// the largest contiguous prefix known to be fully occupied; first-fit
    /// scans start here
    solid: u64,
    sector_gaps: BTreeMap<u64, SectorGap>,
}

impl Default for ExtentMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtentMap {
    pub fn new() -> Self {
        Self {
            extents: BTreeMap::new(),
            solid: 16,
            sector_gaps: BTreeMap::new(),
        }
    }

    /// First-fit allocation of `sectors` consecutive sectors past the
    /// `solid` watermark. Returns the starting sector, always >= 16.
    pub fn allocate(&mut self, sectors: u64) -> u64 {
        let mut start: u64 = 16;
        let mut solid = self.solid;
        let mut iter = self
            .extents
            .range(solid..)
            .map(|(_, e)| (e.start, e.end))
            .peekable();
        while let Some((_, last)) = iter.next() {
            match iter.peek().copied() {
                Some((next_start, _)) => {
                    if last >= next_start {
                        // contiguous; everything up to here is occupied
                        solid = next_start;
                    } else if last + sectors <= next_start {
                        start = last;
                        break;
                    }
                }
                None => {
                    start = last;
                    break;
                }
            }
        }
        self.solid = solid;
        debug_assert!(start >= 16);
        self.insert(start, sectors)
    }

    /// Place an extent at a fixed sector. The caller is responsible for
    /// disjointness at fixed sectors.
    pub fn allocate_at(&mut self, start: u64, sectors: u64) -> u64 {
        self.insert(start, sectors)
    }

    fn insert(&mut self, start: u64, sectors: u64) -> u64 {
        self.extents.insert(
            start,
            OutputExtent {
                start,
                end: start + sectors,
                source: ExtentSource::Content(Vec::new()),
            },
        );
        start
    }

    pub fn set_content(&mut self, start: u64, content: Vec<u8>) {
        if let Some(e) = self.extents.get_mut(&start) {
            debug_assert!(content.len() as u64 <= e.sectors() * 2048);
            e.source = ExtentSource::Content(content);
        }
    }

    pub fn set_file(&mut self, start: u64, node_id: u64) {
        if let Some(e) = self.extents.get_mut(&start) {
            e.source = ExtentSource::File(node_id);
        }
    }

    /// Mutable view of an extent's pre-rendered bytes, for post-allocation
    /// patching (file entries, the partition descriptor).
    pub fn content_mut(&mut self, start: u64) -> Option<&mut Vec<u8>> {
        match self.extents.get_mut(&start) {
            Some(OutputExtent {
                source: ExtentSource::Content(v),
                ..
            }) => Some(v),
            _ => None,
        }
    }

    pub fn get(&self, start: u64) -> Option<&OutputExtent> {
        self.extents.get(&start)
    }

    /// All extents in ascending start order; the writer's sole source of
    /// truth.
    pub fn iter(&self) -> impl Iterator<Item = &OutputExtent> {
        self.extents.values()
    }

    /// One past the last allocated sector.
    pub fn highest_end(&self) -> u64 {
        self.extents
            .last_key_value()
            .map(|(_, e)| e.end)
            .unwrap_or(0)
    }

    pub fn note_sector_gap(&mut self, sector: u64, start: u32, end: u32) {
        self.sector_gaps.insert(sector, SectorGap { start, end });
    }

    pub fn sector_gaps(&self) -> impl Iterator<Item = (u64, SectorGap)> + '_ {
        self.sector_gaps.iter().map(|(&s, &g)| (s, g))
    }
}
