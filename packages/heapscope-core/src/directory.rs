//! Allocation Directory
//!
//! Ordered, index-addressable catalog of every allocation found in the
//! snapshot. Allocations come from one or more `AllocationFinder`s, each a
//! pull iterator reporting `(address, size, used)` in ascending address
//! order; the directory merges the streams, assigns dense indices, and is
//! immutable afterward.
//!
//! `index_of` resolves an arbitrary address to the allocation that owns it
//! in O(log N); the sentinel "none" value is the directory length.

use tracing::debug;

use crate::errors::{Result, SessionError};
use crate::shared::models::{Allocation, AllocationIndex, Offset};

/// One allocation as reported by a finder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    pub address: Offset,
    pub size: Offset,
    pub used: bool,
}

/// Pull iterator over the allocations of one allocator in the snapshot.
///
/// Implementations must report allocations in strictly ascending address
/// order. Any allocations already reported have already been assigned
/// indices by the time the next one is requested.
pub trait AllocationFinder {
    /// The next allocation, or `None` when the finder is exhausted.
    fn next_allocation(&mut self) -> Option<AllocationRecord>;

    /// The smallest request size that might reasonably have produced an
    /// allocation of the given size under this allocator.
    fn min_request_size(&self, size: Offset) -> Offset {
        size
    }
}

/// Dense catalog of all allocations, ordered by base address.
#[derive(Debug, Default)]
pub struct Directory {
    allocations: Vec<Allocation>,
    num_used: usize,
}

impl Directory {
    /// Build the directory by merging finder streams in address order.
    ///
    /// Out-of-order or overlapping reports mean the snapshot (or a finder)
    /// is corrupt in a way that would poison every later analysis pass, so
    /// they fail construction outright.
    pub fn build(finders: Vec<Box<dyn AllocationFinder>>) -> Result<Self> {
        struct Stream {
            finder: Box<dyn AllocationFinder>,
            head: AllocationRecord,
        }

        let mut streams: Vec<Stream> = Vec::with_capacity(finders.len());
        for mut finder in finders {
            if let Some(head) = finder.next_allocation() {
                streams.push(Stream { finder, head });
            }
        }

        let mut allocations: Vec<Allocation> = Vec::new();
        let mut num_used = 0usize;
        while !streams.is_empty() {
            let mut lowest = 0;
            for i in 1..streams.len() {
                if streams[i].head.address < streams[lowest].head.address {
                    lowest = i;
                }
            }
            let record = streams[lowest].head;
            if let Some(prev) = allocations.last() {
                if record.address < prev.limit() {
                    return Err(SessionError::corrupt_directory(format!(
                        "allocation at 0x{:x} overlaps allocation at 0x{:x}",
                        record.address, prev.address
                    )));
                }
            }
            if record.size == 0 {
                return Err(SessionError::corrupt_directory(format!(
                    "empty allocation reported at 0x{:x}",
                    record.address
                )));
            }
            if record.used {
                num_used += 1;
            }
            allocations.push(Allocation::new(record.address, record.size, record.used));
            match streams[lowest].finder.next_allocation() {
                Some(next) => {
                    if next.address <= record.address {
                        return Err(SessionError::corrupt_directory(format!(
                            "finder reported 0x{:x} after 0x{:x}",
                            next.address, record.address
                        )));
                    }
                    streams[lowest].head = next;
                }
                None => {
                    streams.swap_remove(lowest);
                }
            }
        }

        debug!(
            total = allocations.len(),
            used = num_used,
            "allocation directory built"
        );
        Ok(Self {
            allocations,
            num_used,
        })
    }

    /// Number of allocations; also the sentinel index meaning "none".
    #[inline]
    pub fn len(&self) -> AllocationIndex {
        self.allocations.len() as AllocationIndex
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// The sentinel index, equal to `len()`.
    #[inline]
    pub fn none(&self) -> AllocationIndex {
        self.len()
    }

    /// The allocation at index `i`, which must be in range.
    #[inline]
    pub fn at(&self, i: AllocationIndex) -> &Allocation {
        &self.allocations[i as usize]
    }

    /// The allocation at `i`, or `None` for the sentinel or out of range.
    #[inline]
    pub fn get(&self, i: AllocationIndex) -> Option<&Allocation> {
        self.allocations.get(i as usize)
    }

    /// Index of the allocation owning `addr`, or the sentinel.
    pub fn index_of(&self, addr: Offset) -> AllocationIndex {
        let pos = self.allocations.partition_point(|a| a.address <= addr);
        if pos == 0 {
            return self.none();
        }
        let candidate = &self.allocations[pos - 1];
        if candidate.contains(addr) {
            (pos - 1) as AllocationIndex
        } else {
            self.none()
        }
    }

    /// Number of allocations flagged as in use.
    #[inline]
    pub fn num_used(&self) -> usize {
        self.num_used
    }

    pub fn iter(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.iter()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{record, FixedFinder};
    use super::*;

    fn build(records: Vec<AllocationRecord>) -> Directory {
        Directory::build(vec![Box::new(FixedFinder::new(records))]).unwrap()
    }

    #[test]
    fn test_index_of_covers_every_byte() {
        let dir = build(vec![
            record(0x1000, 0x20, true),
            record(0x1040, 0x10, false),
            record(0x2000, 0x100, true),
        ]);
        for i in 0..dir.len() {
            let a = *dir.at(i);
            assert_eq!(dir.index_of(a.address), i);
            assert_eq!(dir.index_of(a.address + a.size - 1), i);
        }
    }

    #[test]
    fn test_index_of_misses_are_sentinel() {
        let dir = build(vec![record(0x1000, 0x20, true), record(0x1040, 0x10, true)]);
        assert_eq!(dir.index_of(0xfff), dir.none());
        assert_eq!(dir.index_of(0x1020), dir.none());
        assert_eq!(dir.index_of(0x1050), dir.none());
    }

    #[test]
    fn test_merge_two_finders_in_address_order() {
        let even = FixedFinder::new(vec![record(0x1000, 0x10, true), record(0x3000, 0x10, true)]);
        let odd = FixedFinder::new(vec![record(0x2000, 0x10, false)]);
        let dir = Directory::build(vec![Box::new(even), Box::new(odd)]).unwrap();
        let addresses: Vec<Offset> = dir.iter().map(|a| a.address).collect();
        assert_eq!(addresses, vec![0x1000, 0x2000, 0x3000]);
        assert_eq!(dir.num_used(), 2);
    }

    #[test]
    fn test_overlap_is_fatal() {
        let result = Directory::build(vec![Box::new(FixedFinder::new(vec![
            record(0x1000, 0x20, true),
            record(0x1010, 0x20, true),
        ]))]);
        assert!(matches!(result, Err(SessionError::CorruptDirectory(_))));
    }
}
