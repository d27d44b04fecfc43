//! Declarative snapshot host.
//!
//! Loads a JSON description of a frozen process image — mapped ranges,
//! allocations (explicit or via the Python arena walker), roots,
//! signatures, pattern tags — and builds an analysis session from it.
//! This is a development and test harness, not a core-file parser; real
//! hosts plug their own services into the session builder.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use serde::Deserialize;

use heapscope_core::directory::{AllocationFinder, AllocationRecord};
use heapscope_core::graph::{AnchorNameDirectory, RootProvider, ThreadRegister, ThreadStack};
use heapscope_core::patterns::PatternRegistry;
use heapscope_core::python::{
    ArenaStructArrayDescriber, ArenaTableLayout, DequeBlockDescriber, MallocedArenaDescriber,
    PythonBlockFinder, WarningSink,
};
use heapscope_core::{
    Session, SessionOptions, SignatureDirectory, VirtualAddressMapBuilder,
};

#[derive(Debug, Deserialize)]
pub struct SnapshotSpec {
    #[serde(default)]
    pub ranges: Vec<RangeSpec>,

    #[serde(default)]
    pub allocations: Vec<AllocationSpec>,

    #[serde(default)]
    pub python: Option<PythonSpec>,

    #[serde(default)]
    pub static_ranges: Vec<[String; 2]>,

    #[serde(default)]
    pub stacks: Vec<StackSpec>,

    #[serde(default)]
    pub registers: Vec<RegisterSpec>,

    #[serde(default)]
    pub external_references: Vec<ExternalSpec>,

    #[serde(default)]
    pub signatures: Vec<SignatureSpec>,

    #[serde(default)]
    pub anchor_names: Vec<AnchorNameSpec>,

    #[serde(default)]
    pub patterns: Vec<PatternTagSpec>,

    #[serde(default)]
    pub redirect_prefix: Option<String>,

    #[serde(default)]
    pub allow_missing_signatures: bool,
}

/// One mapped range: either raw hex bytes or a list of 64-bit words.
#[derive(Debug, Deserialize)]
pub struct RangeSpec {
    pub base: String,
    #[serde(default)]
    pub bytes_hex: Option<String>,
    #[serde(default)]
    pub words: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AllocationSpec {
    pub address: String,
    pub size: String,
    pub used: bool,
}

#[derive(Debug, Deserialize)]
pub struct PythonSpec {
    pub arena_struct_array: String,
    pub arena_struct_count: u64,
    pub arena_struct_size: String,
    pub arena_size: String,
    pub pool_size: String,
    pub active_indices: Vec<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StackSpec {
    pub thread: u32,
    pub base: String,
    pub limit: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterSpec {
    pub thread: u32,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct ExternalSpec {
    pub label: String,
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct SignatureSpec {
    pub value: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AnchorNameSpec {
    pub address: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PatternTagSpec {
    pub address: String,
    pub pattern: String,
}

fn hex(text: &str) -> anyhow::Result<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16)
        .with_context(|| format!("\"{}\" is not a hexadecimal value", text))
}

struct ListedFinder {
    records: std::vec::IntoIter<AllocationRecord>,
}

impl AllocationFinder for ListedFinder {
    fn next_allocation(&mut self) -> Option<AllocationRecord> {
        self.records.next()
    }
}

/// Build a session from a parsed snapshot description. Load-time
/// data-integrity warnings are returned for the host to print.
pub fn build_session(spec: SnapshotSpec) -> anyhow::Result<(Session, Vec<String>)> {
    let mut map = VirtualAddressMapBuilder::new();
    for range in &spec.ranges {
        let base = hex(&range.base)?;
        let bytes = match (&range.bytes_hex, &range.words) {
            (Some(text), None) => decode_hex_bytes(text)?,
            (None, Some(words)) => {
                let mut bytes = Vec::with_capacity(words.len() * 8);
                for word in words {
                    bytes.extend_from_slice(&hex(word)?.to_le_bytes());
                }
                bytes
            }
            _ => bail!(
                "range at {} must have exactly one of \"bytes_hex\" or \"words\"",
                range.base
            ),
        };
        map.add_range(base, bytes);
    }
    let address_map = Arc::new(map.build());

    let mut records = Vec::with_capacity(spec.allocations.len());
    for allocation in &spec.allocations {
        records.push(AllocationRecord {
            address: hex(&allocation.address)?,
            size: hex(&allocation.size)?,
            used: allocation.used,
        });
    }
    records.sort_by_key(|record| record.address);

    let mut signatures = SignatureDirectory::new();
    for signature in &spec.signatures {
        signatures.register(hex(&signature.value)?, signature.name.clone());
    }

    let mut anchor_names = AnchorNameDirectory::new();
    for anchor in &spec.anchor_names {
        anchor_names.register(hex(&anchor.address)?, anchor.name.clone());
    }

    let mut roots = RootProvider::default();
    for range in &spec.static_ranges {
        roots.static_ranges.push((hex(&range[0])?, hex(&range[1])?));
    }
    for stack in &spec.stacks {
        roots.stack_ranges.push(ThreadStack {
            thread: stack.thread,
            base: hex(&stack.base)?,
            limit: hex(&stack.limit)?,
        });
    }
    for register in &spec.registers {
        roots.registers.push(ThreadRegister {
            thread: register.thread,
            name: register.name.clone(),
            value: hex(&register.value)?,
        });
    }
    for external in &spec.external_references {
        roots
            .external_references
            .push((external.label.clone(), hex(&external.address)?));
    }

    let warnings: WarningSink = Rc::new(RefCell::new(Vec::new()));
    let mut patterns = PatternRegistry::new();
    let mut builder = Session::builder()
        .address_map(Arc::clone(&address_map))
        .add_finder(Box::new(ListedFinder {
            records: records.into_iter(),
        }));

    if let Some(python) = &spec.python {
        let layout = Arc::new(ArenaTableLayout {
            arena_struct_array: hex(&python.arena_struct_array)?,
            arena_struct_count: python.arena_struct_count,
            arena_struct_size: hex(&python.arena_struct_size)?,
            arena_size: hex(&python.arena_size)?,
            pool_size: hex(&python.pool_size)?,
            active_indices: python.active_indices.clone(),
        });
        patterns.register(Box::new(ArenaStructArrayDescriber::new(Arc::clone(&layout))));
        patterns.register(Box::new(MallocedArenaDescriber::new(Arc::clone(&layout))));
        patterns.register(Box::new(DequeBlockDescriber::new()));
        builder = builder.add_finder(Box::new(PythonBlockFinder::new(
            Arc::clone(&address_map),
            (*layout).clone(),
            Rc::clone(&warnings),
        )));
    }

    builder = builder
        .signatures(signatures)
        .patterns(patterns)
        .anchor_names(anchor_names)
        .roots(roots)
        .options(SessionOptions {
            redirect_prefix: spec.redirect_prefix.clone().unwrap_or_else(|| "core".to_string()),
            allow_missing_signatures: spec.allow_missing_signatures,
        });
    for tag in &spec.patterns {
        builder = builder.tag_pattern(hex(&tag.address)?, tag.pattern.clone());
    }

    let session = builder.build()?;
    tracing::debug!(
        allocations = session.directory().len(),
        edges = session.graph().num_edges(),
        "snapshot session loaded"
    );
    let warnings = warnings.borrow().clone();
    Ok((session, warnings))
}

/// Load a snapshot description from a JSON file.
pub fn load_snapshot_file(path: &Path) -> anyhow::Result<(Session, Vec<String>)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot \"{}\"", path.display()))?;
    let spec: SnapshotSpec = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse snapshot \"{}\"", path.display()))?;
    build_session(spec)
}

fn decode_hex_bytes(text: &str) -> anyhow::Result<Vec<u8>> {
    let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() % 2 != 0 {
        bail!("odd number of hex digits in byte image");
    }
    let mut bytes = Vec::with_capacity(cleaned.len() / 2);
    for pair in cleaned.as_bytes().chunks_exact(2) {
        let text = std::str::from_utf8(pair).context("non-UTF8 hex digits")?;
        bytes.push(
            u8::from_str_radix(text, 16)
                .with_context(|| format!("\"{}\" is not a hexadecimal byte", text))?,
        );
    }
    Ok(bytes)
}
