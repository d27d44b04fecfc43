//! Managed-runtime (Python) allocation support.
//!
//! The runtime keeps small objects in arenas of pools of fixed-size
//! blocks. The block finder walks that structure and reports every block
//! as an allocation; the describers render the pattern-tagged
//! infrastructure allocations. Locating the arena table itself is the
//! host's job; its layout arrives through `ArenaTableLayout`.

mod block_finder;
mod describers;

pub use block_finder::{ArenaTableLayout, PythonBlockFinder, WarningSink};
pub use describers::{
    ArenaStructArrayDescriber, DequeBlockDescriber, MallocedArenaDescriber,
    PATTERN_ARENA_STRUCT_ARRAY, PATTERN_DEQUE_BLOCK, PATTERN_MALLOCED_ARENA,
};
