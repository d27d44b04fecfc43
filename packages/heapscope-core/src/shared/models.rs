//! Core data model: allocations and the index space that names them.
//!
//! All cross-references between analysis components use dense
//! `AllocationIndex` values rather than addresses or pointers; the sentinel
//! for "no allocation" is the directory length, available as
//! `Directory::none()`.

use serde::{Deserialize, Serialize};

/// A virtual address or byte count within the snapshotted process.
pub type Offset = u64;

/// Dense index into the allocation directory, assigned in ascending
/// address order at directory construction.
pub type AllocationIndex = u32;

/// Size of one machine word in the snapshotted process.
///
/// Reference scanning, signature extraction, and offset arithmetic all
/// operate at this granularity.
pub const WORD_BYTES: usize = 8;

/// A single dynamically allocated memory region.
///
/// Immutable after directory construction. The byte image is not stored
/// here; it is read through the virtual address map on demand, because the
/// snapshot may omit zero-filled pages and the image may therefore be
/// shorter than `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Base virtual address.
    pub address: Offset,

    /// Size in bytes as reported by the finder.
    pub size: Offset,

    /// Whether the allocation was in use when the snapshot was taken.
    pub used: bool,
}

impl Allocation {
    pub fn new(address: Offset, size: Offset, used: bool) -> Self {
        Self {
            address,
            size,
            used,
        }
    }

    /// Whether `addr` falls inside this allocation.
    #[inline]
    pub fn contains(&self, addr: Offset) -> bool {
        addr >= self.address && addr - self.address < self.size
    }

    /// One past the last byte.
    #[inline]
    pub fn limit(&self) -> Offset {
        self.address + self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_bounds() {
        let a = Allocation::new(0x1000, 0x20, true);
        assert!(a.contains(0x1000));
        assert!(a.contains(0x101f));
        assert!(!a.contains(0x1020));
        assert!(!a.contains(0xfff));
    }
}
