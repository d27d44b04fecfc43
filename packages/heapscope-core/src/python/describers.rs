//! Pattern describers for Python allocator infrastructure.

use std::io::Write;
use std::sync::Arc;

use crate::patterns::PatternDescriber;
use crate::shared::models::{Allocation, AllocationIndex};

use super::ArenaTableLayout;

pub const PATTERN_ARENA_STRUCT_ARRAY: &str = "PythonArenaStructArray";
pub const PATTERN_MALLOCED_ARENA: &str = "PythonMallocedArena";
pub const PATTERN_DEQUE_BLOCK: &str = "PythonDequeBlock";

/// The array of arena structs itself, when it lives in an allocation.
pub struct ArenaStructArrayDescriber {
    layout: Arc<ArenaTableLayout>,
}

impl ArenaStructArrayDescriber {
    pub fn new(layout: Arc<ArenaTableLayout>) -> Self {
        Self { layout }
    }
}

impl PatternDescriber for ArenaStructArrayDescriber {
    fn name(&self) -> &str {
        PATTERN_ARENA_STRUCT_ARRAY
    }

    fn describe(
        &self,
        out: &mut dyn Write,
        _index: AllocationIndex,
        _allocation: &Allocation,
        _explain: bool,
    ) -> std::io::Result<()> {
        writeln!(
            out,
            "This allocation matches pattern {}.",
            PATTERN_ARENA_STRUCT_ARRAY
        )?;
        writeln!(
            out,
            "There are {} entries of size 0x{:x} in the array.",
            self.layout.arena_struct_count, self.layout.arena_struct_size
        )?;
        writeln!(
            out,
            "{} entries in the array have corresponding python arenas.",
            self.layout.active_indices.len()
        )
    }
}

/// An arena that was carved out of a single malloc'd allocation.
pub struct MallocedArenaDescriber {
    layout: Arc<ArenaTableLayout>,
}

impl MallocedArenaDescriber {
    pub fn new(layout: Arc<ArenaTableLayout>) -> Self {
        Self { layout }
    }
}

impl PatternDescriber for MallocedArenaDescriber {
    fn name(&self) -> &str {
        PATTERN_MALLOCED_ARENA
    }

    fn describe(
        &self,
        out: &mut dyn Write,
        _index: AllocationIndex,
        _allocation: &Allocation,
        _explain: bool,
    ) -> std::io::Result<()> {
        writeln!(
            out,
            "This allocation matches pattern {}.",
            PATTERN_MALLOCED_ARENA
        )?;
        writeln!(
            out,
            "Only the first 0x{:x} bytes contain the arena.",
            self.layout.arena_size
        )
    }
}

/// A block of a deque, recognized by its link structure.
#[derive(Default)]
pub struct DequeBlockDescriber;

impl DequeBlockDescriber {
    pub fn new() -> Self {
        Self
    }
}

impl PatternDescriber for DequeBlockDescriber {
    fn name(&self) -> &str {
        PATTERN_DEQUE_BLOCK
    }

    fn describe(
        &self,
        out: &mut dyn Write,
        _index: AllocationIndex,
        _allocation: &Allocation,
        _explain: bool,
    ) -> std::io::Result<()> {
        writeln!(
            out,
            "This allocation matches pattern {}.",
            PATTERN_DEQUE_BLOCK
        )
    }
}
