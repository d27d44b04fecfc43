//! Reference-graph construction.
//!
//! Batch pass over the immutable directory: every used allocation's image
//! is scanned at machine-word alignment, and each word that lands inside
//! another used allocation becomes an edge. Root edges are harvested the
//! same way from static ranges, thread stacks, and register files supplied
//! by the host environment.
//!
//! The per-source scan runs under rayon; sources are merged back in index
//! order, so the resulting adjacency is identical to a serial build.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::addr_map::VirtualAddressMap;
use crate::directory::Directory;
use crate::errors::Result;
use crate::shared::models::{AllocationIndex, Offset, WORD_BYTES};

use super::{
    anchored_bit, direct_bit, AnchorKind, EdgePredicate, ExternalRoot, Graph, RegisterRoot,
    StackRoot, StaticRoot, ANCHORED_ANY, DIRECT_REGISTER, DIRECT_STACK, LEAKED, THREAD_ONLY,
};

/// One thread's stack range.
#[derive(Debug, Clone, Copy)]
pub struct ThreadStack {
    pub thread: u32,
    pub base: Offset,
    pub limit: Offset,
}

/// One register of one thread.
#[derive(Debug, Clone)]
pub struct ThreadRegister {
    pub thread: u32,
    pub name: String,
    pub value: Offset,
}

/// Root references supplied by the host environment.
#[derive(Debug, Default)]
pub struct RootProvider {
    /// `[base, limit)` ranges of static writable data.
    pub static_ranges: Vec<(Offset, Offset)>,

    /// Live stack ranges, one per thread.
    pub stack_ranges: Vec<ThreadStack>,

    /// Register files, flattened to one entry per register per thread.
    pub registers: Vec<ThreadRegister>,

    /// Pattern-recognized external owners: `(label, referenced address)`.
    pub external_references: Vec<(String, Offset)>,
}

/// Build the reference graph and anchor classification.
pub fn build_graph(
    directory: &Directory,
    addr_map: &VirtualAddressMap,
    roots: RootProvider,
    edge_is_tainted: Option<Box<dyn EdgePredicate>>,
    edge_is_favored: Option<Box<dyn EdgePredicate>>,
) -> Result<Graph> {
    let n = directory.len() as usize;

    let per_source: Vec<Vec<AllocationIndex>> = (0..n as AllocationIndex)
        .into_par_iter()
        .map(|s| scan_source(directory, addr_map, s))
        .collect();

    let mut out_begin = Vec::with_capacity(n + 1);
    out_begin.push(0u32);
    let mut out_targets = Vec::new();
    for targets in &per_source {
        out_targets.extend_from_slice(targets);
        out_begin.push(out_targets.len() as u32);
    }

    // Invert: sources are appended in ascending order, so each incoming
    // list comes out sorted without a second sort.
    let mut in_degree = vec![0u32; n];
    for targets in &per_source {
        for &d in targets {
            in_degree[d as usize] += 1;
        }
    }
    let mut in_begin = Vec::with_capacity(n + 1);
    in_begin.push(0u32);
    for degree in &in_degree {
        let last = *in_begin.last().unwrap_or(&0);
        in_begin.push(last + degree);
    }
    let mut cursor: Vec<u32> = in_begin[..n].to_vec();
    let mut in_targets = vec![0 as AllocationIndex; out_targets.len()];
    for (s, targets) in per_source.iter().enumerate() {
        for &d in targets {
            in_targets[cursor[d as usize] as usize] = s as AllocationIndex;
            cursor[d as usize] += 1;
        }
    }

    let mut graph = Graph {
        num_allocations: directory.len(),
        out_begin,
        out_targets,
        in_begin,
        in_targets,
        flags: vec![0u16; n],
        static_roots: Vec::new(),
        stack_roots: Vec::new(),
        register_roots: Vec::new(),
        external_roots: Vec::new(),
        edge_is_tainted,
        edge_is_favored,
    };

    collect_roots(&mut graph, directory, addr_map, roots);
    classify(&mut graph, directory);

    debug!(
        allocations = n,
        edges = graph.num_edges(),
        static_roots = graph.static_roots.len(),
        stack_roots = graph.stack_roots.len(),
        register_roots = graph.register_roots.len(),
        external_roots = graph.external_roots.len(),
        "reference graph built"
    );
    Ok(graph)
}

/// Outgoing edges of one source: sorted, deduplicated target indices.
///
/// A word landing anywhere in the same destination counts once no matter
/// how many words point there. Self references never form edges.
fn scan_source(
    directory: &Directory,
    addr_map: &VirtualAddressMap,
    s: AllocationIndex,
) -> Vec<AllocationIndex> {
    let allocation = directory.at(s);
    if !allocation.used {
        return Vec::new();
    }
    let image = addr_map.find_mapped(allocation.address);
    let scannable = image.len().min(allocation.size as usize);
    let mut targets = Vec::new();
    for chunk in image[..scannable].chunks_exact(WORD_BYTES) {
        let mut word = [0u8; WORD_BYTES];
        word.copy_from_slice(chunk);
        let w = Offset::from_le_bytes(word);
        let d = directory.index_of(w);
        if d != directory.none() && d != s && directory.at(d).used {
            targets.push(d);
        }
    }
    targets.sort_unstable();
    targets.dedup();
    targets
}

fn collect_roots(
    graph: &mut Graph,
    directory: &Directory,
    addr_map: &VirtualAddressMap,
    roots: RootProvider,
) {
    for (base, limit) in roots.static_ranges {
        scan_root_range(directory, addr_map, base, limit, |address, target| {
            graph.static_roots.push(StaticRoot { address, target });
        });
    }
    graph.static_roots.sort_by_key(|r| r.address);

    for stack in roots.stack_ranges {
        scan_root_range(directory, addr_map, stack.base, stack.limit, |address, target| {
            graph.stack_roots.push(StackRoot {
                thread: stack.thread,
                address,
                target,
            });
        });
    }
    graph.stack_roots.sort_by_key(|r| r.address);

    for register in roots.registers {
        let target = directory.index_of(register.value);
        if target != directory.none() && directory.at(target).used {
            graph.register_roots.push(RegisterRoot {
                thread: register.thread,
                register: register.name,
                target,
            });
        }
    }
    graph
        .register_roots
        .sort_by(|a, b| (a.thread, &a.register).cmp(&(b.thread, &b.register)));

    for (label, address) in roots.external_references {
        let target = directory.index_of(address);
        if target == directory.none() || !directory.at(target).used {
            warn!(label = %label, address, "external reference misses every used allocation");
            continue;
        }
        graph.external_roots.push(ExternalRoot { label, target });
    }
    graph.external_roots.sort_by(|a, b| a.label.cmp(&b.label));
}

/// Scan the mapped, word-aligned slots of `[base, limit)` for addresses
/// inside used allocations.
fn scan_root_range<F: FnMut(Offset, AllocationIndex)>(
    directory: &Directory,
    addr_map: &VirtualAddressMap,
    base: Offset,
    limit: Offset,
    mut record: F,
) {
    let word = WORD_BYTES as Offset;
    let mut addr = (base + word - 1) & !(word - 1);
    while addr + word <= limit {
        if let Some(value) = addr_map.read_word(addr) {
            let target = directory.index_of(value);
            if target != directory.none() && directory.at(target).used {
                record(addr, target);
            }
        }
        addr += word;
    }
}

/// Seed direct anchor points, propagate reachability per kind to a
/// fixpoint, then classify leaks.
fn classify(graph: &mut Graph, directory: &Directory) {
    let n = graph.num_allocations as usize;

    let seeds_of = |graph: &Graph, kind: AnchorKind| -> Vec<AllocationIndex> {
        match kind {
            AnchorKind::Static => graph.static_roots.iter().map(|r| r.target).collect(),
            AnchorKind::Stack => graph.stack_roots.iter().map(|r| r.target).collect(),
            AnchorKind::Register => graph.register_roots.iter().map(|r| r.target).collect(),
            AnchorKind::External => graph.external_roots.iter().map(|r| r.target).collect(),
        }
    };

    for kind in AnchorKind::ALL {
        let seeds = seeds_of(graph, kind);
        let direct = direct_bit(kind);
        let anchored = anchored_bit(kind);
        let mut worklist: Vec<AllocationIndex> = Vec::new();
        for seed in seeds {
            graph.flags[seed as usize] |= direct;
            if graph.flags[seed as usize] & anchored == 0 {
                graph.flags[seed as usize] |= anchored;
                worklist.push(seed);
            }
        }
        while let Some(i) = worklist.pop() {
            let begin = graph.out_begin[i as usize] as usize;
            let end = graph.out_begin[i as usize + 1] as usize;
            for slot in begin..end {
                let d = graph.out_targets[slot];
                if graph.flags[d as usize] & anchored == 0 {
                    graph.flags[d as usize] |= anchored;
                    worklist.push(d);
                }
            }
        }
    }

    for i in 0..n {
        let allocation = directory.at(i as AllocationIndex);
        if !allocation.used {
            continue;
        }
        let flags = graph.flags[i];
        if flags & ANCHORED_ANY == 0 {
            graph.flags[i] |= LEAKED;
        } else if flags & (DIRECT_STACK | DIRECT_REGISTER) != 0
            && flags & (anchored_bit(AnchorKind::Static) | anchored_bit(AnchorKind::External)) == 0
        {
            graph.flags[i] |= THREAD_ONLY;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::small_session;

    #[test]
    fn test_adjacency_is_sorted_and_deduplicated() {
        let session = small_session();
        let graph = session.graph();
        for i in 0..graph.num_allocations() {
            for list in [graph.outgoing(i), graph.incoming(i)] {
                for pair in list.windows(2) {
                    assert!(pair[0] < pair[1]);
                }
            }
        }
    }

    #[test]
    fn test_every_edge_is_backed_by_a_word_in_the_source() {
        let session = small_session();
        let graph = session.graph();
        let directory = session.directory();
        for s in 0..graph.num_allocations() {
            let source = directory.at(s);
            let image = session.address_map().find_mapped(source.address);
            let scannable = image.len().min(source.size as usize);
            for &d in graph.outgoing(s) {
                let destination = directory.at(d);
                let backed = image[..scannable].chunks_exact(WORD_BYTES).any(|chunk| {
                    let mut word = [0u8; WORD_BYTES];
                    word.copy_from_slice(chunk);
                    destination.contains(Offset::from_le_bytes(word))
                });
                assert!(backed, "edge {} -> {} has no backing word", s, d);
            }
        }
    }

    #[test]
    fn test_leaked_means_used_and_unreached() {
        let session = small_session();
        let graph = session.graph();
        let directory = session.directory();
        // Fixture: 0 is directly static anchored, 1 through it, 2 is
        // free, 3 is unreferenced.
        assert!(graph.is_anchor_point(0, AnchorKind::Static));
        assert!(graph.is_anchored_by(1, AnchorKind::Static));
        assert!(!graph.is_anchor_point(1, AnchorKind::Static));
        assert!(!graph.is_leaked(2));
        assert!(!graph.is_anchored(2));
        assert!(graph.is_leaked(3));
        for i in 0..graph.num_allocations() {
            if graph.is_leaked(i) {
                assert!(directory.at(i).used);
                assert!(!graph.is_anchored(i));
            }
        }
    }

    #[test]
    fn test_register_roots_anchor_their_targets() {
        let session = crate::session::testing::session_with_register_root();
        let graph = session.graph();
        assert!(graph.is_anchor_point(3, AnchorKind::Register));
        assert!(!graph.is_leaked(3));
        assert!(graph.is_thread_only_anchor_point(3));
    }
}
