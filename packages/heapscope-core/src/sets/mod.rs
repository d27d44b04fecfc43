//! Named allocation set sources.
//!
//! A set source yields allocation indices in ascending order; commands
//! compose one source with zero or more filters and feed the result to a
//! visitor. Duplicate suppression across a command (which matters once
//! extension rules run) is the visited set's job, not the source's.

pub mod filters;

pub use filters::{PatternFilter, SignatureFilter, SizeFilter};

use crate::session::Session;
use crate::shared::models::AllocationIndex;

/// One operation: the next member index, ascending, or `None`.
pub trait SetSource {
    fn next(&mut self) -> Option<AllocationIndex>;
}

/// Membership predicates over the whole directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    All,
    Used,
    Free,
    Leaked,
    Anchored,
    StaticAnchorPoints,
    StackAnchorPoints,
    RegisterAnchorPoints,
    ExternalAnchorPoints,
    ThreadOnlyAnchorPoints,
}

/// Ascending scan of the directory, filtered by a `SetKind` predicate.
pub struct DirectoryScan<'a> {
    session: &'a Session,
    kind: SetKind,
    next: AllocationIndex,
}

impl<'a> DirectoryScan<'a> {
    pub fn new(session: &'a Session, kind: SetKind) -> Self {
        Self {
            session,
            kind,
            next: 0,
        }
    }

    fn matches(&self, i: AllocationIndex) -> bool {
        use crate::graph::AnchorKind;
        let used = self.session.directory().at(i).used;
        let graph = self.session.graph();
        match self.kind {
            SetKind::All => true,
            SetKind::Used => used,
            SetKind::Free => !used,
            SetKind::Leaked => graph.is_leaked(i),
            SetKind::Anchored => graph.is_anchored(i),
            SetKind::StaticAnchorPoints => graph.is_anchor_point(i, AnchorKind::Static),
            SetKind::StackAnchorPoints => graph.is_anchor_point(i, AnchorKind::Stack),
            SetKind::RegisterAnchorPoints => graph.is_anchor_point(i, AnchorKind::Register),
            SetKind::ExternalAnchorPoints => graph.is_external_anchor_point(i),
            SetKind::ThreadOnlyAnchorPoints => graph.is_thread_only_anchor_point(i),
        }
    }
}

impl SetSource for DirectoryScan<'_> {
    fn next(&mut self) -> Option<AllocationIndex> {
        let n = self.session.directory().len();
        while self.next < n {
            let i = self.next;
            self.next += 1;
            if self.matches(i) {
                return Some(i);
            }
        }
        None
    }
}

/// The used allocations on one adjacency list (incoming or outgoing of a
/// given allocation). Adjacency slices are already sorted ascending.
pub struct EdgeListScan<'a> {
    session: &'a Session,
    targets: &'a [AllocationIndex],
    pos: usize,
}

impl<'a> EdgeListScan<'a> {
    pub fn incoming(session: &'a Session, of: AllocationIndex) -> Self {
        Self {
            session,
            targets: session.graph().incoming(of),
            pos: 0,
        }
    }

    pub fn outgoing(session: &'a Session, of: AllocationIndex) -> Self {
        Self {
            session,
            targets: session.graph().outgoing(of),
            pos: 0,
        }
    }
}

impl SetSource for EdgeListScan<'_> {
    fn next(&mut self) -> Option<AllocationIndex> {
        while self.pos < self.targets.len() {
            let i = self.targets[self.pos];
            self.pos += 1;
            if self.session.directory().at(i).used {
                return Some(i);
            }
        }
        None
    }
}

/// The used allocations whose images hold an aligned word equal to the
/// given address, whether or not that address is inside an allocation.
pub struct ReferencingScan<'a> {
    session: &'a Session,
    address: crate::shared::models::Offset,
    next: AllocationIndex,
}

impl<'a> ReferencingScan<'a> {
    pub fn new(session: &'a Session, address: crate::shared::models::Offset) -> Self {
        Self {
            session,
            address,
            next: 0,
        }
    }

    fn references(&self, i: AllocationIndex) -> bool {
        use crate::shared::models::WORD_BYTES;
        let allocation = self.session.directory().at(i);
        if !allocation.used {
            return false;
        }
        let image = self.session.address_map().find_mapped(allocation.address);
        let scannable = image.len().min(allocation.size as usize);
        image[..scannable].chunks_exact(WORD_BYTES).any(|chunk| {
            let mut word = [0u8; WORD_BYTES];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word) == self.address
        })
    }
}

impl SetSource for ReferencingScan<'_> {
    fn next(&mut self) -> Option<AllocationIndex> {
        let n = self.session.directory().len();
        while self.next < n {
            let i = self.next;
            self.next += 1;
            if self.references(i) {
                return Some(i);
            }
        }
        None
    }
}

/// A single allocation.
pub struct Singleton {
    index: Option<AllocationIndex>,
}

impl Singleton {
    pub fn new(index: AllocationIndex) -> Self {
        Self { index: Some(index) }
    }
}

impl SetSource for Singleton {
    fn next(&mut self) -> Option<AllocationIndex> {
        self.index.take()
    }
}

/// Dense membership set used to suppress duplicate visits across a
/// command, including the allocations reached through extension rules.
#[derive(Debug)]
pub struct VisitedSet {
    bits: Vec<bool>,
}

impl VisitedSet {
    pub fn new(num_allocations: AllocationIndex) -> Self {
        Self {
            bits: vec![false; num_allocations as usize],
        }
    }

    #[inline]
    pub fn has(&self, i: AllocationIndex) -> bool {
        self.bits[i as usize]
    }

    #[inline]
    pub fn add(&mut self, i: AllocationIndex) {
        self.bits[i as usize] = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::small_session;

    fn drain(mut source: impl SetSource) -> Vec<AllocationIndex> {
        let mut indices = Vec::new();
        while let Some(i) = source.next() {
            indices.push(i);
        }
        indices
    }

    #[test]
    fn test_scan_order_is_ascending() {
        let session = small_session();
        let all = drain(DirectoryScan::new(&session, SetKind::All));
        let mut sorted = all.clone();
        sorted.sort_unstable();
        assert_eq!(all, sorted);
        assert_eq!(all.len() as AllocationIndex, session.directory().len());
    }

    #[test]
    fn test_used_and_free_partition_the_directory() {
        let session = small_session();
        let used = drain(DirectoryScan::new(&session, SetKind::Used));
        let free = drain(DirectoryScan::new(&session, SetKind::Free));
        assert_eq!(
            used.len() + free.len(),
            session.directory().len() as usize
        );
        assert!(used.iter().all(|&i| session.directory().at(i).used));
        assert!(free.iter().all(|&i| !session.directory().at(i).used));
    }

    #[test]
    fn test_edge_list_scan_skips_free_targets() {
        let session = small_session();
        // Allocation 0 references 1 (used) in the fixture.
        let outgoing = drain(EdgeListScan::outgoing(&session, 0));
        assert!(outgoing.iter().all(|&i| session.directory().at(i).used));
    }
}
