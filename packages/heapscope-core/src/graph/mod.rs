//! Allocation Reference Graph
//!
//! Directed graph over allocation indices: an edge `s -> d` means the byte
//! image of `s` contains at least one aligned machine word holding an
//! address inside `d`. Root edges record references from outside the
//! allocation space: static data, per-thread stacks, per-thread register
//! files, and pattern-recognized external owners.
//!
//! Both adjacency directions are stored as compacted CSR arrays
//! (`begin[i]..begin[i+1]` slices into a target array), which keeps
//! traversal cache-friendly and makes the sorted/deduplicated invariant
//! cheap to verify. Anchor classification is computed once at build time
//! and queried through per-index flags.

mod anchor_names;
mod builder;
mod chains;

pub use anchor_names::AnchorNameDirectory;
pub use builder::{build_graph, RootProvider, ThreadRegister, ThreadStack};
pub use chains::AnchorChainVisitor;

use serde::{Deserialize, Serialize};

use crate::shared::models::{AllocationIndex, Offset};

/// The ways a root reference can keep an allocation reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnchorKind {
    Static,
    Stack,
    Register,
    External,
}

impl AnchorKind {
    pub const ALL: [AnchorKind; 4] = [
        AnchorKind::Static,
        AnchorKind::Stack,
        AnchorKind::Register,
        AnchorKind::External,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorKind::Static => "static",
            AnchorKind::Stack => "stack",
            AnchorKind::Register => "register",
            AnchorKind::External => "external",
        }
    }
}

/// Domain-specific judgment about one edge, supplied by the runtime layer.
pub trait EdgePredicate {
    fn holds(&self, src: AllocationIndex, dst: AllocationIndex) -> bool;
}

/// A static address referencing an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticRoot {
    pub address: Offset,
    pub target: AllocationIndex,
}

/// A stack slot of one thread referencing an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRoot {
    pub thread: u32,
    pub address: Offset,
    pub target: AllocationIndex,
}

/// A register of one thread referencing an allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRoot {
    pub thread: u32,
    pub register: String,
    pub target: AllocationIndex,
}

/// A pattern-recognized reference from outside the process image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRoot {
    pub label: String,
    pub target: AllocationIndex,
}

// Per-index classification bits.
const ANCHORED_STATIC: u16 = 1 << 0;
const ANCHORED_STACK: u16 = 1 << 1;
const ANCHORED_REGISTER: u16 = 1 << 2;
const ANCHORED_EXTERNAL: u16 = 1 << 3;
const DIRECT_STATIC: u16 = 1 << 4;
const DIRECT_STACK: u16 = 1 << 5;
const DIRECT_REGISTER: u16 = 1 << 6;
const DIRECT_EXTERNAL: u16 = 1 << 7;
const LEAKED: u16 = 1 << 8;
const THREAD_ONLY: u16 = 1 << 9;

const ANCHORED_ANY: u16 =
    ANCHORED_STATIC | ANCHORED_STACK | ANCHORED_REGISTER | ANCHORED_EXTERNAL;
const DIRECT_ANY: u16 = DIRECT_STATIC | DIRECT_STACK | DIRECT_REGISTER | DIRECT_EXTERNAL;

fn anchored_bit(kind: AnchorKind) -> u16 {
    match kind {
        AnchorKind::Static => ANCHORED_STATIC,
        AnchorKind::Stack => ANCHORED_STACK,
        AnchorKind::Register => ANCHORED_REGISTER,
        AnchorKind::External => ANCHORED_EXTERNAL,
    }
}

fn direct_bit(kind: AnchorKind) -> u16 {
    match kind {
        AnchorKind::Static => DIRECT_STATIC,
        AnchorKind::Stack => DIRECT_STACK,
        AnchorKind::Register => DIRECT_REGISTER,
        AnchorKind::External => DIRECT_EXTERNAL,
    }
}

/// The immutable reference graph plus anchor classification.
pub struct Graph {
    num_allocations: AllocationIndex,

    out_begin: Vec<u32>,
    out_targets: Vec<AllocationIndex>,
    in_begin: Vec<u32>,
    in_targets: Vec<AllocationIndex>,

    flags: Vec<u16>,

    static_roots: Vec<StaticRoot>,
    stack_roots: Vec<StackRoot>,
    register_roots: Vec<RegisterRoot>,
    external_roots: Vec<ExternalRoot>,

    edge_is_tainted: Option<Box<dyn EdgePredicate>>,
    edge_is_favored: Option<Box<dyn EdgePredicate>>,
}

impl Graph {
    /// Allocations whose images `i` references.
    #[inline]
    pub fn outgoing(&self, i: AllocationIndex) -> &[AllocationIndex] {
        let begin = self.out_begin[i as usize] as usize;
        let end = self.out_begin[i as usize + 1] as usize;
        &self.out_targets[begin..end]
    }

    /// Allocations whose images reference `i`.
    #[inline]
    pub fn incoming(&self, i: AllocationIndex) -> &[AllocationIndex] {
        let begin = self.in_begin[i as usize] as usize;
        let end = self.in_begin[i as usize + 1] as usize;
        &self.in_targets[begin..end]
    }

    pub fn num_edges(&self) -> usize {
        self.out_targets.len()
    }

    /// Used but unreachable from every root.
    #[inline]
    pub fn is_leaked(&self, i: AllocationIndex) -> bool {
        self.flags[i as usize] & LEAKED != 0
    }

    /// Reachable from at least one root of any kind.
    #[inline]
    pub fn is_anchored(&self, i: AllocationIndex) -> bool {
        self.flags[i as usize] & ANCHORED_ANY != 0
    }

    /// Reachable from a root of the given kind, directly or indirectly.
    #[inline]
    pub fn is_anchored_by(&self, i: AllocationIndex, kind: AnchorKind) -> bool {
        self.flags[i as usize] & anchored_bit(kind) != 0
    }

    /// Directly referenced by a root of the given kind.
    #[inline]
    pub fn is_anchor_point(&self, i: AllocationIndex, kind: AnchorKind) -> bool {
        self.flags[i as usize] & direct_bit(kind) != 0
    }

    /// Directly referenced by any root.
    #[inline]
    pub fn is_any_anchor_point(&self, i: AllocationIndex) -> bool {
        self.flags[i as usize] & DIRECT_ANY != 0
    }

    /// Directly referenced from outside the process image, per a
    /// recognized pattern rather than an incoming edge.
    #[inline]
    pub fn is_external_anchor_point(&self, i: AllocationIndex) -> bool {
        self.is_anchor_point(i, AnchorKind::External)
    }

    /// Referenced by registers or stack for at least one thread but not
    /// anchored in any other way.
    #[inline]
    pub fn is_thread_only_anchor_point(&self, i: AllocationIndex) -> bool {
        self.flags[i as usize] & THREAD_ONLY != 0
    }

    pub fn static_roots(&self) -> &[StaticRoot] {
        &self.static_roots
    }

    pub fn stack_roots(&self) -> &[StackRoot] {
        &self.stack_roots
    }

    pub fn register_roots(&self) -> &[RegisterRoot] {
        &self.register_roots
    }

    pub fn external_roots(&self) -> &[ExternalRoot] {
        &self.external_roots
    }

    /// Whether the domain layer considers the inference behind `s -> d`
    /// unreliable. Always false when no predicate was injected.
    pub fn edge_is_tainted(&self, src: AllocationIndex, dst: AllocationIndex) -> bool {
        self.edge_is_tainted
            .as_ref()
            .map(|p| p.holds(src, dst))
            .unwrap_or(false)
    }

    /// Whether `s -> d` is the canonical edge among several candidates.
    pub fn edge_is_favored(&self, src: AllocationIndex, dst: AllocationIndex) -> bool {
        self.edge_is_favored
            .as_ref()
            .map(|p| p.holds(src, dst))
            .unwrap_or(true)
    }

    pub fn has_tainted_predicate(&self) -> bool {
        self.edge_is_tainted.is_some()
    }

    pub fn has_favored_predicate(&self) -> bool {
        self.edge_is_favored.is_some()
    }

    #[inline]
    pub fn num_allocations(&self) -> AllocationIndex {
        self.num_allocations
    }
}
