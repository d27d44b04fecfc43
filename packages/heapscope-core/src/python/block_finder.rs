//! Block allocation finder for the Python small-object allocator.
//!
//! Arena layout: an arena struct array holds one entry per arena; each
//! active entry points at an arena of `arena_size` bytes, divided into
//! pools of `pool_size` bytes aligned to the pool size. A pool header
//! records the block size, the high-water offset of blocks ever handed
//! out, and the head of the pool's free list. Every block becomes one
//! allocation; a pool with no blocks at all is reported as a single free
//! allocation covering the whole pool.
//!
//! Corruption handling is conservative: a pool header that fails its
//! consistency check is treated as fully used (overstating "used" beats
//! inventing leaks), and a free-list entry outside the pool stops the
//! free-list walk for that pool.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use tracing::warn;

use crate::addr_map::VirtualAddressMap;
use crate::directory::{AllocationFinder, AllocationRecord};
use crate::shared::models::{Offset, WORD_BYTES};

// Pool header field offsets.
const POOL_REF_COUNT: Offset = 0;
const POOL_FREE_LIST_HEAD: Offset = 8;
const POOL_NEXT_OFFSET: Offset = 0x28;
const POOL_MAX_EXCESS: Offset = 0x2c;
const POOL_HEADER_SIZE: Offset = 0x30;

/// Where the host found the arena table and how it is shaped.
#[derive(Debug, Clone)]
pub struct ArenaTableLayout {
    /// Address of the arena struct array.
    pub arena_struct_array: Offset,

    /// Total entries in the array, active or not.
    pub arena_struct_count: u64,

    /// Stride of one arena struct.
    pub arena_struct_size: Offset,

    /// Bytes covered by one arena.
    pub arena_size: Offset,

    /// Bytes covered by one pool; a power of two.
    pub pool_size: Offset,

    /// Indices of arena structs with a live arena.
    pub active_indices: Vec<u32>,
}

/// Shared collector for data-integrity warnings raised during the walk;
/// the host prints them once the load finishes.
pub type WarningSink = Rc<RefCell<Vec<String>>>;

pub struct PythonBlockFinder {
    addr_map: Arc<VirtualAddressMap>,
    layout: ArenaTableLayout,
    warnings: WarningSink,

    arenas: Vec<Offset>,
    arena_cursor: usize,

    pool: Offset,
    pools_limit: Offset,
    block: Offset,
    block_size: Offset,
    block_index: usize,
    blocks_limit: Offset,
    block_used: Vec<bool>,

    pending: Option<AllocationRecord>,
}

impl PythonBlockFinder {
    pub fn new(
        addr_map: Arc<VirtualAddressMap>,
        layout: ArenaTableLayout,
        warnings: WarningSink,
    ) -> Self {
        let mut arenas: Vec<Offset> = layout
            .active_indices
            .iter()
            .filter_map(|&index| {
                addr_map.read_word(
                    layout.arena_struct_array + layout.arena_struct_size * index as Offset,
                )
            })
            .filter(|&arena| arena != 0)
            .collect();
        arenas.sort_unstable();

        let mut finder = Self {
            addr_map,
            layout,
            warnings,
            arenas,
            arena_cursor: 0,
            pool: 0,
            pools_limit: 0,
            block: 0,
            block_size: 0,
            block_index: 0,
            blocks_limit: 0,
            block_used: Vec::new(),
            pending: None,
        };
        finder.advance_to_first_allocation_of_arena();
        finder
    }

    fn warn(&self, message: String) {
        warn!("{}", message);
        self.warnings.borrow_mut().push(message);
    }

    fn advance_to_first_allocation_of_arena(&mut self) {
        while self.arena_cursor < self.arenas.len() {
            let arena = self.arenas[self.arena_cursor];
            let pool_size = self.layout.pool_size;
            self.pool = (arena + pool_size - 1) & !(pool_size - 1);
            self.pools_limit = (arena + self.layout.arena_size) & !(pool_size - 1);
            if self.pool < self.pools_limit {
                self.advance_to_first_allocation_for_pool();
                return;
            }
            self.arena_cursor += 1;
        }
    }

    /// The first allocation for a pool is its first block, or the whole
    /// pool as one free allocation when the pool holds no blocks at all.
    fn advance_to_first_allocation_for_pool(&mut self) {
        if !self.advance_to_first_block_of_pool() {
            self.pending = Some(AllocationRecord {
                address: self.pool,
                size: self.layout.pool_size,
                used: false,
            });
        }
    }

    fn advance_to_first_block_of_pool(&mut self) -> bool {
        let pool = self.pool;
        let pool_size = self.layout.pool_size;
        if self.addr_map.read_u32(pool + POOL_REF_COUNT).unwrap_or(0) == 0 {
            return false;
        }
        let max_excess = self.addr_map.read_u32(pool + POOL_MAX_EXCESS).unwrap_or(0) as Offset;
        let block_size = pool_size - max_excess;
        if block_size == pool_size || block_size == 0 {
            return false;
        }
        self.block_size = block_size;
        self.block_index = 0;
        self.block = pool + POOL_HEADER_SIZE;
        let num_blocks = ((pool_size - POOL_HEADER_SIZE) / block_size) as usize;
        self.blocks_limit = self.block + block_size * num_blocks as Offset;

        let next_offset = self.addr_map.read_u32(pool + POOL_NEXT_OFFSET).unwrap_or(0) as Offset;
        let mut blocks_ever_used = if next_offset >= POOL_HEADER_SIZE {
            ((next_offset - POOL_HEADER_SIZE) / block_size) as usize
        } else {
            usize::MAX
        };
        if blocks_ever_used > num_blocks
            || next_offset != POOL_HEADER_SIZE + blocks_ever_used as Offset * block_size
        {
            self.warn(format!(
                "Warning: Probable corruption in header for python pool at 0x{:x}",
                pool
            ));
            // Pick the value that overstates usage rather than inventing
            // free blocks from a header that cannot be trusted.
            blocks_ever_used = num_blocks;
        }

        self.block_used.clear();
        self.block_used.resize(num_blocks, false);
        for used in self.block_used.iter_mut().take(blocks_ever_used) {
            *used = true;
        }

        let mut free_block = self.addr_map.read_word(pool + POOL_FREE_LIST_HEAD).unwrap_or(0);
        while free_block != 0 {
            if free_block < self.block || free_block >= self.blocks_limit {
                self.warn(format!(
                    "Warning: probable corrupt free list found for pool at 0x{:x}.\n\
                     Free status cannot be trusted for this pool.",
                    pool
                ));
                break;
            }
            self.block_used[((free_block - self.block) / block_size) as usize] = false;
            free_block = self.addr_map.read_word(free_block).unwrap_or(0);
        }

        self.pending = Some(AllocationRecord {
            address: self.block,
            size: block_size,
            used: self.block_used[0],
        });
        true
    }

    /// Step to the next block or pool of the current arena. Returns false
    /// once the arena is exhausted.
    fn advance_within_arena(&mut self, last: AllocationRecord) -> bool {
        if last.size != self.layout.pool_size {
            // The last report was a block; try the next block in the pool.
            self.block += self.block_size;
            self.block_index += 1;
            if self.block < self.blocks_limit {
                self.pending = Some(AllocationRecord {
                    address: self.block,
                    size: self.block_size,
                    used: self.block_used[self.block_index],
                });
                return true;
            }
        }
        self.pool += self.layout.pool_size;
        if self.pool < self.pools_limit {
            self.advance_to_first_allocation_for_pool();
            return true;
        }
        false
    }
}

impl AllocationFinder for PythonBlockFinder {
    fn next_allocation(&mut self) -> Option<AllocationRecord> {
        let current = self.pending.take()?;
        if !self.advance_within_arena(current) {
            self.arena_cursor += 1;
            self.advance_to_first_allocation_of_arena();
        }
        Some(current)
    }

    /// The runtime rounds requests up to the block size, so anything more
    /// than one word smaller could not have produced this block.
    fn min_request_size(&self, size: Offset) -> Offset {
        size.saturating_sub(WORD_BYTES as Offset - 1).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr_map::VirtualAddressMapBuilder;

    const POOL_SIZE: Offset = 0x100;
    const ARENA_SIZE: Offset = 0x200;

    /// One arena at 0x10000 with two pools. Pool images are assembled
    /// from a header plus blocks.
    struct PoolImage {
        ref_count: u32,
        block_size: u32,
        next_offset: u32,
        free_list_head: u64,
        words: Vec<(Offset, u64)>,
    }

    fn build_map(pools: Vec<PoolImage>) -> (Arc<VirtualAddressMap>, ArenaTableLayout) {
        let arena = 0x10000u64;
        let mut builder = VirtualAddressMapBuilder::new();

        // Arena struct array with a single entry pointing at the arena.
        builder.add_range(0x9000, arena.to_le_bytes().to_vec());

        for (i, pool) in pools.iter().enumerate() {
            let base = arena + POOL_SIZE * i as Offset;
            let mut bytes = vec![0u8; POOL_SIZE as usize];
            bytes[0..4].copy_from_slice(&pool.ref_count.to_le_bytes());
            bytes[8..16].copy_from_slice(&pool.free_list_head.to_le_bytes());
            bytes[0x28..0x2c].copy_from_slice(&pool.next_offset.to_le_bytes());
            let max_excess = POOL_SIZE as u32 - pool.block_size;
            bytes[0x2c..0x30].copy_from_slice(&max_excess.to_le_bytes());
            for &(offset, word) in &pool.words {
                let at = offset as usize;
                bytes[at..at + 8].copy_from_slice(&word.to_le_bytes());
            }
            builder.add_range(base, bytes);
        }

        let layout = ArenaTableLayout {
            arena_struct_array: 0x9000,
            arena_struct_count: 1,
            arena_struct_size: 8,
            arena_size: ARENA_SIZE,
            pool_size: POOL_SIZE,
            active_indices: vec![0],
        };
        (Arc::new(builder.build()), layout)
    }

    fn drain(mut finder: PythonBlockFinder) -> Vec<AllocationRecord> {
        let mut records = Vec::new();
        while let Some(record) = finder.next_allocation() {
            records.push(record);
        }
        records
    }

    #[test]
    fn test_pool_with_blocks_and_free_list() {
        // Block size 0x40: header 0x30, then 3 blocks of 0x40.
        // next_offset covers two blocks; the second is on the free list.
        let (map, layout) = build_map(vec![
            PoolImage {
                ref_count: 1,
                block_size: 0x40,
                next_offset: 0x30 + 0x80,
                free_list_head: 0x10000 + 0x70,
                words: vec![],
            },
            PoolImage {
                ref_count: 0,
                block_size: 0x40,
                next_offset: 0,
                free_list_head: 0,
                words: vec![],
            },
        ]);
        let warnings: WarningSink = Rc::new(RefCell::new(Vec::new()));
        let records = drain(PythonBlockFinder::new(map, layout, warnings.clone()));

        // Pool 1: blocks at +0x30, +0x70, +0xb0; used, free (free list),
        // free (never handed out). Pool 2: one whole free pool.
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].address, 0x10030);
        assert!(records[0].used);
        assert_eq!(records[1].address, 0x10070);
        assert!(!records[1].used);
        assert_eq!(records[2].address, 0x100b0);
        assert!(!records[2].used);
        assert_eq!(records[3].address, 0x10100);
        assert_eq!(records[3].size, POOL_SIZE);
        assert!(!records[3].used);
        assert!(warnings.borrow().is_empty());
    }

    #[test]
    fn test_corrupt_header_marks_pool_fully_used() {
        // next_offset not a whole number of blocks past the header.
        let (map, layout) = build_map(vec![PoolImage {
            ref_count: 1,
            block_size: 0x40,
            next_offset: 0x31,
            free_list_head: 0,
            words: vec![],
        }]);
        let warnings: WarningSink = Rc::new(RefCell::new(Vec::new()));
        let records = drain(PythonBlockFinder::new(map, layout, warnings.clone()));

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.used));
        assert_eq!(warnings.borrow().len(), 1);
        assert!(warnings.borrow()[0].contains("Probable corruption in header"));
    }

    #[test]
    fn test_corrupt_free_list_stops_the_walk() {
        // Free list points outside the pool's block range.
        let (map, layout) = build_map(vec![PoolImage {
            ref_count: 1,
            block_size: 0x40,
            next_offset: 0x30 + 0xc0,
            free_list_head: 0xdead_0000,
            words: vec![],
        }]);
        let warnings: WarningSink = Rc::new(RefCell::new(Vec::new()));
        let records = drain(PythonBlockFinder::new(map, layout, warnings.clone()));

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.used));
        assert!(warnings.borrow()[0].contains("corrupt free list"));
    }

    #[test]
    fn test_min_request_size_allows_word_rounding() {
        let (map, layout) = build_map(vec![]);
        let warnings: WarningSink = Rc::new(RefCell::new(Vec::new()));
        let finder = PythonBlockFinder::new(map, layout, warnings);
        assert_eq!(finder.min_request_size(0x40), 0x39);
        assert_eq!(finder.min_request_size(4), 1);
    }
}
