//! Pattern Registry
//!
//! Structural recognizers for allocations participating in known runtime
//! data structures. A pattern has a name, a describer that renders
//! human-readable text for a matching allocation, and a set of tagged
//! allocations assigned by the runtime-specific layer during load.

use std::io::Write;

use rustc_hash::FxHashMap;

use crate::shared::models::{Allocation, AllocationIndex};

/// Per-allocation description hook for one pattern.
pub trait PatternDescriber {
    /// The pattern name, e.g. `PythonArenaStructArray`.
    fn name(&self) -> &str;

    /// Write a description of an allocation already tagged as matching
    /// this pattern. `explain` requests reasoning beyond the summary.
    fn describe(
        &self,
        out: &mut dyn Write,
        index: AllocationIndex,
        allocation: &Allocation,
        explain: bool,
    ) -> std::io::Result<()>;

    /// Whether allocations tagged with this pattern distinguish favored
    /// incoming references from incidental ones.
    fn favors_references(&self) -> bool {
        false
    }
}

type PatternSlot = u16;

/// Registry of pattern describers plus the allocation tags that bind
/// patterns to allocations. Tags are assigned during load and read-only
/// afterward.
#[derive(Default)]
pub struct PatternRegistry {
    describers: Vec<Box<dyn PatternDescriber>>,
    slot_by_name: FxHashMap<String, PatternSlot>,
    tags: FxHashMap<AllocationIndex, Vec<PatternSlot>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, describer: Box<dyn PatternDescriber>) {
        let slot = self.describers.len() as PatternSlot;
        self.slot_by_name.insert(describer.name().to_string(), slot);
        self.describers.push(describer);
    }

    pub fn is_known_name(&self, name: &str) -> bool {
        self.slot_by_name.contains_key(name)
    }

    /// Tag an allocation as matching a registered pattern.
    pub fn tag(&mut self, index: AllocationIndex, pattern_name: &str) -> bool {
        match self.slot_by_name.get(pattern_name) {
            Some(&slot) => {
                let slots = self.tags.entry(index).or_default();
                if !slots.contains(&slot) {
                    slots.push(slot);
                }
                true
            }
            None => false,
        }
    }

    pub fn has_pattern(&self, index: AllocationIndex, pattern_name: &str) -> bool {
        match self.slot_by_name.get(pattern_name) {
            Some(slot) => self
                .tags
                .get(&index)
                .map(|slots| slots.contains(slot))
                .unwrap_or(false),
            None => false,
        }
    }

    pub fn has_any_pattern(&self, index: AllocationIndex) -> bool {
        self.tags.contains_key(&index)
    }

    /// The first pattern tagged on the allocation, in registration order.
    pub fn first_pattern_name(&self, index: AllocationIndex) -> Option<&str> {
        self.tags
            .get(&index)
            .and_then(|slots| slots.first())
            .map(|&slot| self.describers[slot as usize].name())
    }

    /// Whether any pattern tagged on the allocation distinguishes favored
    /// references.
    pub fn supports_favored_references(&self, index: AllocationIndex) -> bool {
        self.tags
            .get(&index)
            .map(|slots| {
                slots
                    .iter()
                    .any(|&slot| self.describers[slot as usize].favors_references())
            })
            .unwrap_or(false)
    }

    /// Run every tagged describer for the allocation. Returns whether any
    /// description was written.
    pub fn describe(
        &self,
        out: &mut dyn Write,
        index: AllocationIndex,
        allocation: &Allocation,
        explain: bool,
    ) -> std::io::Result<bool> {
        let Some(slots) = self.tags.get(&index) else {
            return Ok(false);
        };
        for &slot in slots {
            self.describers[slot as usize].describe(out, index, allocation, explain)?;
        }
        Ok(!slots.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub {
        name: &'static str,
        favors: bool,
    }

    impl PatternDescriber for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn describe(
            &self,
            out: &mut dyn Write,
            _index: AllocationIndex,
            _allocation: &Allocation,
            _explain: bool,
        ) -> std::io::Result<()> {
            writeln!(out, "This allocation matches pattern {}.", self.name)
        }

        fn favors_references(&self) -> bool {
            self.favors
        }
    }

    #[test]
    fn test_tagging_and_lookup() {
        let mut registry = PatternRegistry::new();
        registry.register(Box::new(Stub {
            name: "ArenaTable",
            favors: false,
        }));
        assert!(registry.tag(3, "ArenaTable"));
        assert!(!registry.tag(3, "Unknown"));
        assert!(registry.has_pattern(3, "ArenaTable"));
        assert!(!registry.has_pattern(4, "ArenaTable"));
        assert!(registry.is_known_name("ArenaTable"));
        assert!(!registry.is_known_name("Unknown"));
    }

    #[test]
    fn test_favored_reference_support_follows_tags() {
        let mut registry = PatternRegistry::new();
        registry.register(Box::new(Stub {
            name: "Favoring",
            favors: true,
        }));
        registry.register(Box::new(Stub {
            name: "Plain",
            favors: false,
        }));
        registry.tag(1, "Plain");
        registry.tag(2, "Favoring");
        assert!(!registry.supports_favored_references(1));
        assert!(registry.supports_favored_references(2));
        assert!(!registry.supports_favored_references(9));
    }

    #[test]
    fn test_describe_writes_for_each_tag() {
        let mut registry = PatternRegistry::new();
        registry.register(Box::new(Stub {
            name: "ArenaTable",
            favors: false,
        }));
        registry.tag(0, "ArenaTable");
        let allocation = Allocation::new(0x1000, 0x40, true);
        let mut out = Vec::new();
        let wrote = registry.describe(&mut out, 0, &allocation, false).unwrap();
        assert!(wrote);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "This allocation matches pattern ArenaTable.\n"
        );
    }
}
