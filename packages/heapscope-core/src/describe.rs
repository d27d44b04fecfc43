//! Allocation description.
//!
//! Picks the most specific description available for an allocation:
//! anchored/leaked/free status, recognized signature, any tagged pattern
//! describers, and for used allocations the anchor chains that keep it
//! reachable.

use std::io::{self, Write};

use crate::graph::AnchorChainVisitor;
use crate::session::Session;
use crate::shared::models::{Allocation, AllocationIndex, Offset};

pub struct Describer<'a> {
    session: &'a Session,
}

impl<'a> Describer<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub fn describe(
        &self,
        out: &mut dyn Write,
        index: AllocationIndex,
        allocation: &Allocation,
        explain: bool,
    ) -> io::Result<()> {
        let status = if !allocation.used {
            "Free"
        } else if self.session.graph().is_leaked(index) {
            "Leaked"
        } else if self.session.graph().is_anchored(index) {
            "Anchored"
        } else {
            "Used"
        };
        writeln!(
            out,
            "{} allocation at 0x{:x} of size 0x{:x}.",
            status, allocation.address, allocation.size
        )?;

        if let Some(signature) = self.session.signatures().signature_of(
            self.session.directory(),
            self.session.address_map(),
            index,
        ) {
            match self.session.signatures().name(signature) {
                Some(name) => writeln!(
                    out,
                    "This allocation has signature 0x{:x} ({}).",
                    signature, name
                )?,
                None => writeln!(out, "This allocation has signature 0x{:x}.", signature)?,
            }
        }

        self.session
            .patterns()
            .describe(out, index, allocation, explain)?;

        if allocation.used && self.session.graph().is_anchored(index) {
            let mut lister = AnchorChainLister::new(self.session, &mut *out, allocation.address);
            self.session
                .graph()
                .visit_anchor_chains(self.session.directory(), index, &mut lister);
        }
        writeln!(out)?;
        Ok(())
    }
}

/// Renders anchor chains as human-readable text.
///
/// One header per chain head: which roots reference the head, whether the
/// anchoring is direct, then the links leading from the head to the
/// anchoree.
pub struct AnchorChainLister<'a, 'w> {
    session: &'a Session,
    out: &'w mut dyn Write,
    anchoree: Offset,
}

impl<'a, 'w> AnchorChainLister<'a, 'w> {
    pub fn new(session: &'a Session, out: &'w mut dyn Write, anchoree: Offset) -> Self {
        Self {
            session,
            out,
            anchoree,
        }
    }

    fn head_suffix(&self, head: AllocationIndex) -> String {
        let directory = self.session.directory();
        let signature = self.session.signatures().signature_of(
            directory,
            self.session.address_map(),
            head,
        );
        match signature {
            Some(signature) => match self.session.signatures().name(signature) {
                Some(name) => format!(" with signature 0x{:x} ({})", signature, name),
                None => format!(" with signature 0x{:x}", signature),
            },
            None => String::new(),
        }
    }

    fn preamble(&mut self, kind_phrase: &str, head: AllocationIndex, is_direct: bool) {
        if is_direct {
            writeln!(
                self.out,
                "The allocation at 0x{:x} appears to be directly {}.",
                self.anchoree, kind_phrase
            )
            .ok();
        } else {
            let head_address = self.session.directory().at(head).address;
            writeln!(
                self.out,
                "The allocation at 0x{:x} appears to be indirectly {} via anchor point 0x{:x}{}.",
                self.anchoree,
                kind_phrase,
                head_address,
                self.head_suffix(head)
            )
            .ok();
        }
    }

    fn reference_target(&self, head: AllocationIndex, is_direct: bool) -> String {
        if is_direct {
            format!("0x{:x}.", self.anchoree)
        } else {
            format!(
                "anchor point 0x{:x}.",
                self.session.directory().at(head).address
            )
        }
    }
}

impl AnchorChainVisitor for AnchorChainLister<'_, '_> {
    fn visit_static_chain_header(
        &mut self,
        roots: &[Offset],
        head: AllocationIndex,
        is_direct: bool,
    ) -> bool {
        self.preamble("statically anchored", head, is_direct);
        let target = self.reference_target(head, is_direct);
        for &address in roots {
            match self.session.anchor_names().name(address) {
                Some(name) => writeln!(
                    self.out,
                    "Static address 0x{:x} ({}) references {}",
                    address, name, target
                )
                .ok(),
                None => writeln!(
                    self.out,
                    "Static address 0x{:x} references {}",
                    address, target
                )
                .ok(),
            };
        }
        false
    }

    fn visit_stack_chain_header(
        &mut self,
        roots: &[(u32, Offset)],
        head: AllocationIndex,
        is_direct: bool,
    ) -> bool {
        self.preamble("anchored from at least one stack", head, is_direct);
        let target = self.reference_target(head, is_direct);
        for &(thread, address) in roots {
            writeln!(
                self.out,
                "Stack address 0x{:x} for thread {} references {}",
                address, thread, target
            )
            .ok();
        }
        false
    }

    fn visit_register_chain_header(
        &mut self,
        roots: &[(u32, &str)],
        head: AllocationIndex,
        is_direct: bool,
    ) -> bool {
        self.preamble("anchored from at least one register", head, is_direct);
        let target = self.reference_target(head, is_direct);
        for &(thread, register) in roots {
            writeln!(
                self.out,
                "Register {} for thread {} references {}",
                register, thread, target
            )
            .ok();
        }
        false
    }

    fn visit_external_chain_header(
        &mut self,
        roots: &[&str],
        head: AllocationIndex,
        is_direct: bool,
    ) -> bool {
        self.preamble("externally anchored", head, is_direct);
        let target = self.reference_target(head, is_direct);
        for &label in roots {
            writeln!(self.out, "{} references {}", label, target).ok();
        }
        false
    }

    fn visit_chain_link(&mut self, index: AllocationIndex, allocation: &Allocation) -> bool {
        let suffix = if allocation.address != self.anchoree {
            self.head_suffix(index)
        } else {
            String::new()
        };
        writeln!(
            self.out,
            "which references 0x{:x}{}",
            allocation.address, suffix
        )
        .ok();
        false
    }
}
