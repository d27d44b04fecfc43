//! Set-visitor commands: count, summarize, list, enumerate, describe,
//! show.
//!
//! Each command resolves a named allocation set (with optional address
//! argument), applies the common filter switches, optionally wraps the
//! traversal in the extension engine, and feeds every member to the
//! verb's visitor.
//!
//! Common switches: `/size`, `/minsize`, `/maxsize`, `/signed`,
//! `/pattern`, `/extend` (repeatable), `/commentExtensions`,
//! `/skipTaintedReferences`, `/skipUnfavoredReferences`,
//! `/redirectSuffix`.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use heapscope_core::extension::{ExtendedVisitor, ExtensionOptions, ExtensionSpec};
use heapscope_core::sets::{
    DirectoryScan, EdgeListScan, PatternFilter, ReferencingScan, SetKind, SetSource, Singleton,
    SizeFilter, SignatureFilter, VisitedSet,
};
use heapscope_core::visitors::{
    AllocationVisitor, CountVisitor, DescribeVisitor, EnumerateVisitor, ListVisitor, SharedOutput,
    SizedTally, SummarizeVisitor,
};
use heapscope_core::{Allocation, AllocationIndex, Session};

use crate::context::Context;
use crate::errors::{CommandError, Result};
use crate::io::{hex_dump, ErrorSink, OutputStack};
use crate::runner::{CommandHandler, Runner};

/// The set names every set command understands.
const SET_NAMES: [&str; 14] = [
    "allocation",
    "allocations",
    "anchored",
    "externalanchorpoints",
    "free",
    "incoming",
    "leaked",
    "outgoing",
    "referencing",
    "registeranchorpoints",
    "stackanchorpoints",
    "staticanchorpoints",
    "threadonlyanchorpoints",
    "used",
];

fn set_takes_address(name: &str) -> bool {
    matches!(name, "incoming" | "outgoing" | "allocation" | "referencing")
}

/// Resolve positional 1 (and an optional address at positional 2) to a
/// set source, reporting any problem to the error sink.
fn resolve_set<'a>(
    session: &'a Session,
    context: &Context,
    error: &mut ErrorSink,
) -> Result<Box<dyn SetSource + 'a>> {
    let name = context.positional(1);
    if name.is_empty() {
        error.emit("No allocation set was specified.\n");
        return Err(CommandError::Aborted);
    }
    let kind = match name {
        "allocations" => Some(SetKind::All),
        "used" => Some(SetKind::Used),
        "free" => Some(SetKind::Free),
        "leaked" => Some(SetKind::Leaked),
        "anchored" => Some(SetKind::Anchored),
        "staticanchorpoints" => Some(SetKind::StaticAnchorPoints),
        "stackanchorpoints" => Some(SetKind::StackAnchorPoints),
        "registeranchorpoints" => Some(SetKind::RegisterAnchorPoints),
        "externalanchorpoints" => Some(SetKind::ExternalAnchorPoints),
        "threadonlyanchorpoints" => Some(SetKind::ThreadOnlyAnchorPoints),
        _ => None,
    };
    if let Some(kind) = kind {
        return Ok(Box::new(DirectoryScan::new(session, kind)));
    }
    if set_takes_address(name) {
        if context.num_positionals() < 3 {
            error.emit("No address was specified for the target allocation.\n");
            return Err(CommandError::Aborted);
        }
        let token = context.positional(2);
        let Some(address) = context.parse_positional_hex(2) else {
            error.emit(&format!("{} is not a valid address.\n", token));
            return Err(CommandError::Aborted);
        };
        if name == "referencing" {
            // Any address qualifies, inside an allocation or not.
            return Ok(Box::new(ReferencingScan::new(session, address)));
        }
        let index = session.directory().index_of(address);
        if index == session.directory().none() {
            error.emit(&format!("{} is not part of an allocation.\n", token));
            return Err(CommandError::Aborted);
        }
        return Ok(match name {
            "incoming" => Box::new(EdgeListScan::incoming(session, index)),
            "outgoing" => Box::new(EdgeListScan::outgoing(session, index)),
            _ => Box::new(Singleton::new(index)),
        });
    }
    error.emit(&format!("Set name \"{}\" is not recognized.\n", name));
    Err(CommandError::Aborted)
}

/// Wrap the resolved set in the filters requested by switches.
fn apply_filters<'a>(
    session: &'a Session,
    context: &Context,
    error: &mut ErrorSink,
    mut source: Box<dyn SetSource + 'a>,
) -> Result<Box<dyn SetSource + 'a>> {
    let mut min_size = None;
    let mut max_size = None;
    if context.num_arguments("size") > 0 {
        let Some(size) = context.parse_argument_hex("size", 0, error) else {
            return Err(CommandError::Aborted);
        };
        min_size = Some(size);
        max_size = Some(size);
    }
    if context.num_arguments("minsize") > 0 {
        let Some(size) = context.parse_argument_hex("minsize", 0, error) else {
            return Err(CommandError::Aborted);
        };
        min_size = Some(size);
    }
    if context.num_arguments("maxsize") > 0 {
        let Some(size) = context.parse_argument_hex("maxsize", 0, error) else {
            return Err(CommandError::Aborted);
        };
        max_size = Some(size);
    }
    if min_size.is_some() || max_size.is_some() {
        source = Box::new(SizeFilter::new(session, source, min_size, max_size));
    }

    if context.num_arguments("signed") > 0 {
        let name = context.argument("signed", 0);
        let signatures = if session.signatures().is_known_name(name) {
            session.signatures().signatures_for(name).to_vec()
        } else if let Some(value) = parse_signature_value(name) {
            vec![value]
        } else if session.options().allow_missing_signatures {
            Vec::new()
        } else {
            error.emit(&format!("Signature \"{}\" is not recognized.\n", name));
            return Err(CommandError::Aborted);
        };
        source = Box::new(SignatureFilter::new(session, source, signatures));
    }

    if context.num_arguments("pattern") > 0 {
        let name = context.argument("pattern", 0);
        if !session.patterns().is_known_name(name) {
            error.emit(&format!("Pattern \"{}\" is not recognized.\n", name));
            return Err(CommandError::Aborted);
        }
        source = Box::new(PatternFilter::new(session, source, name.to_string()));
    }
    Ok(source)
}

fn parse_signature_value(text: &str) -> Option<u64> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Compile `/extend` rules plus the traversal booleans.
fn build_extension<'a>(
    session: &'a Session,
    context: &Context,
    error: &mut ErrorSink,
    output: SharedOutput,
) -> Result<ExtendedVisitor<'a>> {
    let mut options = ExtensionOptions::default();
    let mut ok = true;
    ok &= context.parse_boolean_switch(
        "commentExtensions",
        &mut options.comment_extensions,
        error,
    );
    if session.graph().has_tainted_predicate() {
        ok &= context.parse_boolean_switch(
            "skipTaintedReferences",
            &mut options.skip_tainted_references,
            error,
        );
    }
    if session.graph().has_favored_predicate() {
        ok &= context.parse_boolean_switch(
            "skipUnfavoredReferences",
            &mut options.skip_unfavored_references,
            error,
        );
    }
    if !ok {
        return Err(CommandError::Aborted);
    }

    let spec = match ExtensionSpec::compile(
        session,
        context.arguments("extend"),
        session.options().allow_missing_signatures,
    ) {
        Ok(spec) => spec,
        Err(messages) => {
            for message in messages {
                error.emit(&format!("{}\n", message));
            }
            return Err(CommandError::Aborted);
        }
    };
    Ok(ExtendedVisitor::new(session, spec, options, output))
}

/// Switches every set command accepts; `/explain` additionally for
/// describe.
const COMMON_SWITCHES: [&str; 10] = [
    "commentExtensions",
    "extend",
    "maxsize",
    "minsize",
    "pattern",
    "redirectSuffix",
    "signed",
    "size",
    "skipTaintedReferences",
    "skipUnfavoredReferences",
];

fn check_switch_names(
    verb: Verb,
    context: &Context,
    error: &mut ErrorSink,
) -> Result<()> {
    let mut ok = true;
    for name in context.switch_names() {
        let known = COMMON_SWITCHES.contains(&name) || (verb == Verb::Describe && name == "explain");
        if !known {
            error.emit(&format!("Unknown switch /{}.\n", name));
            ok = false;
        }
    }
    if ok {
        Ok(())
    } else {
        Err(CommandError::Aborted)
    }
}

/// The per-allocation action a set command performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Count,
    Summarize,
    List,
    Enumerate,
    Describe,
    Show,
}

impl Verb {
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Count => "count",
            Verb::Summarize => "summarize",
            Verb::List => "list",
            Verb::Enumerate => "enumerate",
            Verb::Describe => "describe",
            Verb::Show => "show",
        }
    }

    fn help_text(&self) -> &'static str {
        match self {
            Verb::Count => {
                "Use \"count <set>\" to see how many allocations are in the set and how many\nbytes they use.\n"
            }
            Verb::Summarize => {
                "Use \"summarize <set>\" to see the allocations of the set tallied by signature\nor pattern.\n"
            }
            Verb::List => {
                "Use \"list <set>\" to see the address, size and use status of each allocation\nin the set.\n"
            }
            Verb::Enumerate => {
                "Use \"enumerate <set>\" to see the address of each allocation in the set.\n"
            }
            Verb::Describe => {
                "In this case \"describe\" means show the address, size, anchored/leaked/free\nstatus and type if known.\n"
            }
            Verb::Show => {
                "Use \"show <set>\" to see the contents of each allocation in the set.\n"
            }
        }
    }
}

/// Handler shared by every set command; the verb picks the visitor.
pub struct SetCommand {
    verb: Verb,
}

impl SetCommand {
    pub fn new(verb: Verb) -> Self {
        Self { verb }
    }
}

impl CommandHandler for SetCommand {
    fn accepts(&self, _session: &Session, context: &Context) -> usize {
        let name = context.positional(1);
        if name.is_empty() {
            return 1;
        }
        if !SET_NAMES.contains(&name) {
            return 1;
        }
        if set_takes_address(name) {
            3
        } else {
            2
        }
    }

    fn run(
        &self,
        session: &Session,
        output: Rc<RefCell<OutputStack>>,
        error: &mut ErrorSink,
        context: &Context,
    ) -> Result<()> {
        let shared: SharedOutput = output;
        check_switch_names(self.verb, context, error)?;
        let mut source = resolve_set(session, context, error)?;
        source = apply_filters(session, context, error, source)?;
        let extended = build_extension(session, context, error, Rc::clone(&shared))?;

        let mut explain = false;
        if self.verb == Verb::Describe
            && !context.parse_boolean_switch("explain", &mut explain, error)
        {
            return Err(CommandError::Aborted);
        }

        let mut visitor: Box<dyn AllocationVisitor + '_> = match self.verb {
            Verb::Count => Box::new(CountVisitor::new(Rc::clone(&shared))),
            Verb::Summarize => Box::new(SummarizeVisitor::new(session, Rc::clone(&shared))),
            Verb::List => Box::new(ListVisitor::new(Rc::clone(&shared))),
            Verb::Enumerate => Box::new(EnumerateVisitor::new(Rc::clone(&shared))),
            Verb::Describe => Box::new(DescribeVisitor::new(session, Rc::clone(&shared), explain)),
            Verb::Show => Box::new(ShowVisitor::new(session, Rc::clone(&shared))),
        };

        let mut visited = VisitedSet::new(session.directory().len());
        while let Some(index) = source.next() {
            session.check_interrupt()?;
            let allocation = session.directory().at(index);
            extended.visit(index, allocation, &mut visited, &mut *visitor)?;
        }
        Ok(())
    }

    fn help(&self, out: &mut dyn Write) {
        write!(out, "{}", self.verb.help_text()).ok();
    }

    fn second_token_candidates(&self) -> Vec<String> {
        SET_NAMES.iter().map(|name| name.to_string()).collect()
    }
}

/// `show`: status line plus a hex dump of the allocation image.
struct ShowVisitor<'a> {
    session: &'a Session,
    output: SharedOutput,
    tally: SizedTally,
}

impl<'a> ShowVisitor<'a> {
    fn new(session: &'a Session, output: SharedOutput) -> Self {
        Self {
            session,
            tally: SizedTally::new(Rc::clone(&output), "allocations"),
            output,
        }
    }
}

impl AllocationVisitor for ShowVisitor<'_> {
    fn visit(
        &mut self,
        _index: AllocationIndex,
        allocation: &Allocation,
    ) -> heapscope_core::Result<()> {
        self.tally.adjust_tally(allocation.size);
        let image = self.session.address_map().find_mapped(allocation.address);
        let shown = &image[..image.len().min(allocation.size as usize)];
        let mut out = self.output.borrow_mut();
        writeln!(
            out,
            "{} allocation at 0x{:x} of size 0x{:x}:",
            if allocation.used { "Used" } else { "Free" },
            allocation.address,
            allocation.size
        )?;
        hex_dump(&mut *out, shown, true)?;
        writeln!(out)?;
        Ok(())
    }
}

/// Register the standard set commands on a runner.
pub fn register_set_commands(runner: &mut Runner<'_>) {
    for verb in [
        Verb::Count,
        Verb::Summarize,
        Verb::List,
        Verb::Enumerate,
        Verb::Describe,
        Verb::Show,
    ] {
        runner.add_command(verb.name(), Rc::new(SetCommand::new(verb)));
    }
}
