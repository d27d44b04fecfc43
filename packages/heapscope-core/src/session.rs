//! Analysis session: the immutable product of loading one snapshot.
//!
//! Built once from the injected services (address map, allocation finders,
//! root providers, signature and pattern registration), then shared
//! read-only by every command until the process exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::addr_map::VirtualAddressMap;
use crate::directory::{AllocationFinder, Directory};
use crate::errors::{Result, SessionError};
use crate::graph::{build_graph, AnchorNameDirectory, EdgePredicate, Graph, RootProvider};
use crate::patterns::PatternRegistry;
use crate::signatures::SignatureDirectory;

/// Host-tunable knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Prefix for redirected output file names, typically derived from
    /// the snapshot path.
    pub redirect_prefix: String,

    /// Accept extension rules naming signatures the directory has never
    /// seen instead of rejecting the command.
    pub allow_missing_signatures: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            redirect_prefix: "core".to_string(),
            allow_missing_signatures: false,
        }
    }
}

pub struct Session {
    address_map: Arc<VirtualAddressMap>,
    directory: Directory,
    signatures: SignatureDirectory,
    patterns: PatternRegistry,
    anchor_names: AnchorNameDirectory,
    graph: Graph,
    options: SessionOptions,
    interrupt: Arc<AtomicBool>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn address_map(&self) -> &VirtualAddressMap {
        &self.address_map
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn signatures(&self) -> &SignatureDirectory {
        &self.signatures
    }

    pub fn patterns(&self) -> &PatternRegistry {
        &self.patterns
    }

    pub fn anchor_names(&self) -> &AnchorNameDirectory {
        &self.anchor_names
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Flag polled by long passes; setting it aborts the running command
    /// at its next poll.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Err(`Interrupted`) once the flag is raised.
    pub fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.load(Ordering::Relaxed) {
            Err(SessionError::Interrupted)
        } else {
            Ok(())
        }
    }

    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct SessionBuilder {
    address_map: Option<Arc<VirtualAddressMap>>,
    finders: Vec<Box<dyn AllocationFinder>>,
    signatures: SignatureDirectory,
    patterns: PatternRegistry,
    pattern_tags: Vec<(crate::shared::models::Offset, String)>,
    anchor_names: AnchorNameDirectory,
    roots: RootProvider,
    edge_is_tainted: Option<Box<dyn EdgePredicate>>,
    edge_is_favored: Option<Box<dyn EdgePredicate>>,
    options: SessionOptions,
}

impl SessionBuilder {
    pub fn address_map(mut self, map: Arc<VirtualAddressMap>) -> Self {
        self.address_map = Some(map);
        self
    }

    pub fn add_finder(mut self, finder: Box<dyn AllocationFinder>) -> Self {
        self.finders.push(finder);
        self
    }

    pub fn signatures(mut self, signatures: SignatureDirectory) -> Self {
        self.signatures = signatures;
        self
    }

    pub fn patterns(mut self, patterns: PatternRegistry) -> Self {
        self.patterns = patterns;
        self
    }

    /// Tag the allocation owning `address` with a registered pattern once
    /// the directory exists.
    pub fn tag_pattern(mut self, address: crate::shared::models::Offset, name: impl Into<String>) -> Self {
        self.pattern_tags.push((address, name.into()));
        self
    }

    pub fn anchor_names(mut self, names: AnchorNameDirectory) -> Self {
        self.anchor_names = names;
        self
    }

    pub fn roots(mut self, roots: RootProvider) -> Self {
        self.roots = roots;
        self
    }

    pub fn edge_is_tainted(mut self, predicate: Box<dyn EdgePredicate>) -> Self {
        self.edge_is_tainted = Some(predicate);
        self
    }

    pub fn edge_is_favored(mut self, predicate: Box<dyn EdgePredicate>) -> Self {
        self.edge_is_favored = Some(predicate);
        self
    }

    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the load passes: directory merge, graph construction, anchor
    /// classification. Tag passes for patterns must happen before this,
    /// via the registry handed in.
    pub fn build(self) -> Result<Session> {
        let address_map = self.address_map.unwrap_or_else(|| Arc::new(VirtualAddressMap::default()));
        let directory = Directory::build(self.finders)?;
        let mut patterns = self.patterns;
        for (address, name) in self.pattern_tags {
            let index = directory.index_of(address);
            if index == directory.none() || !patterns.tag(index, &name) {
                tracing::warn!(address, pattern = %name, "pattern tag did not land on an allocation");
            }
        }
        let graph = build_graph(
            &directory,
            &address_map,
            self.roots,
            self.edge_is_tainted,
            self.edge_is_favored,
        )?;
        Ok(Session {
            address_map,
            directory,
            signatures: self.signatures,
            patterns,
            anchor_names: self.anchor_names,
            graph,
            options: self.options,
            interrupt: Arc::new(AtomicBool::new(false)),
        })
    }
}
