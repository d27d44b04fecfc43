/*
 * Heapscope Core - Post-Mortem Process Image Analysis Engine
 *
 * Pipeline over a frozen snapshot of a process's virtual address space:
 * - addr_map/   : read-only random access over the snapshot
 * - directory/  : dense, ordered catalog of every allocation
 * - graph/      : allocation-to-allocation reference graph (CSR both ways)
 *                 plus root edges and anchor/leak classification
 * - sets/       : named, filterable allocation set sources
 * - extension   : rule-driven traversal that grows a seed set along refs
 * - visitors    : per-allocation actions (describe, count, list, ...)
 * - python/     : managed-runtime block allocation finder and describers
 *
 * Everything except visitors and set iterators is built once per session
 * and immutable afterward; concurrent readers are safe.
 */

pub mod addr_map;
pub mod describe;
pub mod directory;
pub mod errors;
pub mod extension;
pub mod graph;
pub mod patterns;
pub mod python;
pub mod session;
pub mod sets;
pub mod shared;
pub mod signatures;
pub mod visitors;

pub use addr_map::{VirtualAddressMap, VirtualAddressMapBuilder};
pub use directory::{AllocationFinder, AllocationRecord, Directory};
pub use errors::{Result, SessionError};
pub use graph::{AnchorChainVisitor, AnchorKind, Graph, RootProvider};
pub use session::{Session, SessionBuilder, SessionOptions};
pub use shared::models::{Allocation, AllocationIndex, WORD_BYTES};
pub use signatures::SignatureDirectory;
