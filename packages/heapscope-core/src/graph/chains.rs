//! Anchor chain enumeration.
//!
//! For a given anchoree, walks the shortest chains of references leading
//! from each kind of root back to it. Distances come from one BFS per
//! request over incoming edges starting at the anchoree, so every reported
//! chain is a shortest path for its head; ties between equally short next
//! hops break toward the lowest allocation index, keeping output
//! deterministic.
//!
//! At most `CHAIN_BUDGET` root references are reported per kind, and once
//! a direct chain of a kind is reported no indirect chain of that kind
//! follows.

use rustc_hash::FxHashMap;

use crate::directory::Directory;
use crate::shared::models::{Allocation, AllocationIndex, Offset};

use super::{AnchorKind, Graph};

/// Most root references reported per anchor kind.
const CHAIN_BUDGET: usize = 10;

/// Receives anchor chains for one anchoree, kind by kind.
///
/// Header callbacks return `true` to stop enumeration of that kind;
/// `visit_chain_link` returns `true` to stop the whole walk.
pub trait AnchorChainVisitor {
    fn visit_static_chain_header(
        &mut self,
        roots: &[Offset],
        head: AllocationIndex,
        is_direct: bool,
    ) -> bool;

    fn visit_stack_chain_header(
        &mut self,
        roots: &[(u32, Offset)],
        head: AllocationIndex,
        is_direct: bool,
    ) -> bool;

    fn visit_register_chain_header(
        &mut self,
        roots: &[(u32, &str)],
        head: AllocationIndex,
        is_direct: bool,
    ) -> bool;

    fn visit_external_chain_header(
        &mut self,
        roots: &[&str],
        head: AllocationIndex,
        is_direct: bool,
    ) -> bool;

    fn visit_chain_link(&mut self, index: AllocationIndex, allocation: &Allocation) -> bool;
}

struct KindRoots<'g> {
    static_roots: Vec<(Offset, AllocationIndex)>,
    stack_roots: Vec<((u32, Offset), AllocationIndex)>,
    register_roots: Vec<((u32, &'g str), AllocationIndex)>,
    external_roots: Vec<(&'g str, AllocationIndex)>,
}

impl Graph {
    /// Enumerate anchor chains ending at `anchoree`.
    pub fn visit_anchor_chains(
        &self,
        directory: &Directory,
        anchoree: AllocationIndex,
        visitor: &mut dyn AnchorChainVisitor,
    ) {
        if anchoree >= self.num_allocations || !directory.at(anchoree).used {
            return;
        }
        let distances = self.distances_to(anchoree);
        let roots = KindRoots {
            static_roots: self
                .static_roots
                .iter()
                .map(|r| (r.address, r.target))
                .collect(),
            stack_roots: self
                .stack_roots
                .iter()
                .map(|r| ((r.thread, r.address), r.target))
                .collect(),
            register_roots: self
                .register_roots
                .iter()
                .map(|r| ((r.thread, r.register.as_str()), r.target))
                .collect(),
            external_roots: self
                .external_roots
                .iter()
                .map(|r| (r.label.as_str(), r.target))
                .collect(),
        };

        for kind in AnchorKind::ALL {
            match kind {
                AnchorKind::Static => self.visit_kind(
                    directory,
                    anchoree,
                    &distances,
                    &roots.static_roots,
                    visitor,
                    |v, roots, head, direct| v.visit_static_chain_header(roots, head, direct),
                ),
                AnchorKind::Stack => self.visit_kind(
                    directory,
                    anchoree,
                    &distances,
                    &roots.stack_roots,
                    visitor,
                    |v, roots, head, direct| v.visit_stack_chain_header(roots, head, direct),
                ),
                AnchorKind::Register => self.visit_kind(
                    directory,
                    anchoree,
                    &distances,
                    &roots.register_roots,
                    visitor,
                    |v, roots, head, direct| v.visit_register_chain_header(roots, head, direct),
                ),
                AnchorKind::External => self.visit_kind(
                    directory,
                    anchoree,
                    &distances,
                    &roots.external_roots,
                    visitor,
                    |v, roots, head, direct| v.visit_external_chain_header(roots, head, direct),
                ),
            }
        }
    }

    /// Hop counts from every allocation to `anchoree` along outgoing
    /// references, computed by BFS over incoming edges from the anchoree.
    fn distances_to(&self, anchoree: AllocationIndex) -> Vec<u32> {
        let unreached = u32::MAX;
        let mut distances = vec![unreached; self.num_allocations as usize];
        distances[anchoree as usize] = 0;
        let mut frontier = vec![anchoree];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for &node in &frontier {
                let hop = distances[node as usize] + 1;
                for &src in self.incoming(node) {
                    if distances[src as usize] == unreached {
                        distances[src as usize] = hop;
                        next.push(src);
                    }
                }
            }
            frontier = next;
        }
        distances
    }

    fn visit_kind<R: Clone>(
        &self,
        directory: &Directory,
        anchoree: AllocationIndex,
        distances: &[u32],
        roots: &[(R, AllocationIndex)],
        visitor: &mut dyn AnchorChainVisitor,
        mut header: impl FnMut(&mut dyn AnchorChainVisitor, &[R], AllocationIndex, bool) -> bool,
    ) {
        let mut budget = CHAIN_BUDGET;

        let direct: Vec<R> = roots
            .iter()
            .filter(|(_, target)| *target == anchoree)
            .map(|(root, _)| root.clone())
            .take(budget)
            .collect();
        if !direct.is_empty() {
            header(visitor, &direct, anchoree, true);
            return;
        }

        // Indirect chains: group roots by chain head, keeping the heads in
        // first-seen order, which is ascending root order because the root
        // tables are sorted.
        let mut grouped: FxHashMap<AllocationIndex, Vec<R>> = FxHashMap::default();
        let mut head_order: Vec<AllocationIndex> = Vec::new();
        for (root, target) in roots {
            if distances[*target as usize] == u32::MAX {
                continue;
            }
            let bucket = grouped.entry(*target).or_default();
            if bucket.is_empty() {
                head_order.push(*target);
            }
            bucket.push(root.clone());
        }

        for head in head_order {
            if budget == 0 {
                return;
            }
            let bucket = &grouped[&head];
            let shown = &bucket[..bucket.len().min(budget)];
            budget -= shown.len();
            if header(visitor, shown, head, false) {
                return;
            }
            if self.visit_links(directory, head, anchoree, distances, visitor) {
                return;
            }
        }
    }

    /// Walk one shortest path from `head` to `anchoree`, visiting every
    /// link after the head, the anchoree included.
    fn visit_links(
        &self,
        directory: &Directory,
        head: AllocationIndex,
        anchoree: AllocationIndex,
        distances: &[u32],
        visitor: &mut dyn AnchorChainVisitor,
    ) -> bool {
        let mut current = head;
        while current != anchoree {
            let hop = distances[current as usize];
            let next = self
                .outgoing(current)
                .iter()
                .copied()
                .find(|&d| distances[d as usize] != u32::MAX && distances[d as usize] + 1 == hop);
            let Some(next) = next else {
                // The distance table guarantees a next hop; losing it
                // means the adjacency arrays are inconsistent.
                return true;
            };
            if visitor.visit_chain_link(next, directory.at(next)) {
                return true;
            }
            current = next;
        }
        false
    }
}
