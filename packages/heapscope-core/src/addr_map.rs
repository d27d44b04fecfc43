//! Virtual Address Map
//!
//! Read-only random access over the process snapshot. Maps a virtual
//! address to the longest contiguous readable byte image starting there.
//! Ranges are non-overlapping and sorted by base address; lookup is a
//! binary search over range starts.
//!
//! The snapshot may omit pages (typically zero-filled ones), so an
//! allocation's image can be shorter than its directory size or missing
//! entirely. Callers treat absent bytes as unknown rather than zero.

use crate::shared::models::{Offset, WORD_BYTES};

#[derive(Debug)]
struct MappedRange {
    base: Offset,
    bytes: Vec<u8>,
}

impl MappedRange {
    #[inline]
    fn limit(&self) -> Offset {
        self.base + self.bytes.len() as Offset
    }
}

/// Immutable map from virtual addresses to snapshot byte images.
///
/// Safe for concurrent readers; nothing is mutated after build.
#[derive(Debug, Default)]
pub struct VirtualAddressMap {
    ranges: Vec<MappedRange>,
}

impl VirtualAddressMap {
    /// The longest contiguous readable slice starting at `addr`, or an
    /// empty slice if `addr` is not mapped.
    pub fn find_mapped(&self, addr: Offset) -> &[u8] {
        match self.range_of(addr) {
            Some(range) => &range.bytes[(addr - range.base) as usize..],
            None => &[],
        }
    }

    /// Read one aligned machine word at `addr`, if fully mapped.
    pub fn read_word(&self, addr: Offset) -> Option<Offset> {
        let image = self.find_mapped(addr);
        if image.len() < WORD_BYTES {
            return None;
        }
        let mut word = [0u8; WORD_BYTES];
        word.copy_from_slice(&image[..WORD_BYTES]);
        Some(Offset::from_le_bytes(word))
    }

    /// Read a little-endian u32 at `addr`, if fully mapped.
    pub fn read_u32(&self, addr: Offset) -> Option<u32> {
        let image = self.find_mapped(addr);
        if image.len() < 4 {
            return None;
        }
        let mut val = [0u8; 4];
        val.copy_from_slice(&image[..4]);
        Some(u32::from_le_bytes(val))
    }

    /// Whether any byte is mapped at `addr`.
    pub fn is_mapped(&self, addr: Offset) -> bool {
        self.range_of(addr).is_some()
    }

    /// Total number of mapped ranges.
    pub fn num_ranges(&self) -> usize {
        self.ranges.len()
    }

    /// Iterate over `(base, length)` for every mapped range, ascending.
    pub fn ranges(&self) -> impl Iterator<Item = (Offset, Offset)> + '_ {
        self.ranges
            .iter()
            .map(|r| (r.base, r.bytes.len() as Offset))
    }

    fn range_of(&self, addr: Offset) -> Option<&MappedRange> {
        let pos = self.ranges.partition_point(|r| r.base <= addr);
        if pos == 0 {
            return None;
        }
        let range = &self.ranges[pos - 1];
        if addr < range.limit() {
            Some(range)
        } else {
            None
        }
    }
}

/// Assembles a `VirtualAddressMap` from range images supplied by the host.
///
/// Adjacent ranges are coalesced so `find_mapped` returns the longest
/// contiguous image available.
#[derive(Debug, Default)]
pub struct VirtualAddressMapBuilder {
    ranges: Vec<MappedRange>,
}

impl VirtualAddressMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one mapped range. Ranges may be added in any order but must not
    /// overlap.
    pub fn add_range(&mut self, base: Offset, bytes: Vec<u8>) -> &mut Self {
        if !bytes.is_empty() {
            self.ranges.push(MappedRange { base, bytes });
        }
        self
    }

    pub fn build(mut self) -> VirtualAddressMap {
        self.ranges.sort_by_key(|r| r.base);
        let mut coalesced: Vec<MappedRange> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges {
            match coalesced.last_mut() {
                Some(prev) if prev.limit() == range.base => {
                    prev.bytes.extend_from_slice(&range.bytes);
                }
                _ => coalesced.push(range),
            }
        }
        VirtualAddressMap { ranges: coalesced }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(ranges: &[(Offset, &[u8])]) -> VirtualAddressMap {
        let mut builder = VirtualAddressMapBuilder::new();
        for (base, bytes) in ranges {
            builder.add_range(*base, bytes.to_vec());
        }
        builder.build()
    }

    #[test]
    fn test_find_mapped_inside_range() {
        let map = map_with(&[(0x1000, &[1, 2, 3, 4])]);
        assert_eq!(map.find_mapped(0x1000), &[1, 2, 3, 4]);
        assert_eq!(map.find_mapped(0x1002), &[3, 4]);
        assert!(map.find_mapped(0x1004).is_empty());
        assert!(map.find_mapped(0xfff).is_empty());
    }

    #[test]
    fn test_adjacent_ranges_coalesce() {
        let map = map_with(&[(0x1004, &[5, 6]), (0x1000, &[1, 2, 3, 4])]);
        assert_eq!(map.num_ranges(), 1);
        assert_eq!(map.find_mapped(0x1000).len(), 6);
    }

    #[test]
    fn test_read_word_little_endian() {
        let map = map_with(&[(0x2000, &[0x10, 0x20, 0, 0, 0, 0, 0, 0])]);
        assert_eq!(map.read_word(0x2000), Some(0x2010));
        assert_eq!(map.read_word(0x2001), None);
    }

    #[test]
    fn test_read_word_truncated_image() {
        let map = map_with(&[(0x3000, &[1, 2, 3])]);
        assert_eq!(map.read_word(0x3000), None);
        assert_eq!(map.read_u32(0x3000), None);
    }
}
