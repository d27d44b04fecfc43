//! Extension engine.
//!
//! Expands a seed set of allocations along typed references under
//! operator-supplied rules. A rule string has the shape
//!
//! ```text
//! [memberSpec][@hexOffset] (-> | ~> | <-) [extSpec][@hexOffset] [=>stateLabel]
//! ```
//!
//! where the member spec is a signature, a pattern name, or a state
//! label, resolved in that order; `->` extends along outgoing references,
//! `~>` along outgoing references to leaked allocations only, and `<-`
//! along incoming references. Offsets pin where the reference must live
//! in the member or where it must land in the extension. `=>label`
//! switches the traversal state; rules are partitioned by the state they
//! apply to and state 0 (the unlabeled state) must have at least one rule
//! or the engine refuses to run.
//!
//! Traversal is depth-first with an explicit frame stack. A frame is
//! pushed only when the current member still has candidates or rules left,
//! so a linear chain of extensions runs in constant stack space; cycles
//! are broken by the shared visited set.

use std::io::Write;

use regex::Regex;
use rustc_hash::FxHashMap;

use crate::errors::Result;
use crate::session::Session;
use crate::sets::VisitedSet;
use crate::shared::models::{Allocation, AllocationIndex, Offset, WORD_BYTES};
use crate::visitors::{AllocationVisitor, SharedOutput};

/// Switch-controlled traversal options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionOptions {
    /// Emit `#` comment lines narrating each traversal step.
    pub comment_extensions: bool,

    /// Skip edges the domain layer marked unreliable.
    pub skip_tainted_references: bool,

    /// Skip edges that are not the canonical ones, for extensions whose
    /// patterns distinguish favored references.
    pub skip_unfavored_references: bool,
}

#[derive(Debug)]
enum CheckerKind {
    AnyAllocation,
    Signature(Vec<Offset>),
    Pattern(String),
    Unrecognized,
}

/// Matches allocations against the signature/pattern half of a rule.
#[derive(Debug)]
struct SignatureChecker {
    kind: CheckerKind,
    spec: String,
}

impl SignatureChecker {
    /// A spec names a signature, a pattern, or a raw hex signature value,
    /// tried in that order. State labels were already resolved out of the
    /// member spec before checkers are built.
    fn new(session: &Session, spec: &str) -> Self {
        let kind = if spec.is_empty() {
            CheckerKind::AnyAllocation
        } else if session.signatures().is_known_name(spec) {
            CheckerKind::Signature(session.signatures().signatures_for(spec).to_vec())
        } else if session.patterns().is_known_name(spec) {
            CheckerKind::Pattern(spec.to_string())
        } else if let Ok(value) = Offset::from_str_radix(spec.trim_start_matches("0x"), 16) {
            CheckerKind::Signature(vec![value])
        } else {
            CheckerKind::Unrecognized
        };
        Self {
            kind,
            spec: spec.to_string(),
        }
    }

    fn unrecognized(&self) -> bool {
        matches!(self.kind, CheckerKind::Unrecognized)
    }

    fn check(&self, session: &Session, index: AllocationIndex, allocation: &Allocation) -> bool {
        match &self.kind {
            CheckerKind::AnyAllocation => true,
            CheckerKind::Signature(values) => {
                if allocation.size < WORD_BYTES as Offset {
                    return false;
                }
                session
                    .address_map()
                    .read_word(allocation.address)
                    .map(|word| values.contains(&word))
                    .unwrap_or(false)
            }
            CheckerKind::Pattern(name) => session.patterns().has_pattern(index, name),
            CheckerKind::Unrecognized => false,
        }
    }
}

#[derive(Debug)]
struct Rule {
    offset_in_member: Offset,
    offset_in_extension: Offset,
    use_offset_in_member: bool,
    use_offset_in_extension: bool,
    reference_is_outgoing: bool,
    extension_must_be_leaked: bool,
    member_checker: SignatureChecker,
    extension_checker: SignatureChecker,
    base_state: usize,
    new_state: usize,
}

/// Compiled extension rules, bucketed by the state they apply to.
#[derive(Debug)]
pub struct ExtensionSpec {
    rules: Vec<Rule>,
    state_to_base: Vec<usize>,
    state_labels: Vec<String>,
}

struct ParsedRule {
    member_spec: String,
    offset_in_member: Option<Offset>,
    reference_is_outgoing: bool,
    extension_must_be_leaked: bool,
    extension_spec: String,
    offset_in_extension: Option<Offset>,
    new_state: usize,
    base_state: usize,
}

impl ExtensionSpec {
    /// Compile rule strings. All errors are collected before giving up so
    /// the operator sees every problem at once; `Ok(None)` means no rules
    /// were supplied and extension stays disabled.
    pub fn compile(
        session: &Session,
        rule_strings: &[String],
        allow_missing_signatures: bool,
    ) -> std::result::Result<Option<ExtensionSpec>, Vec<String>> {
        if rule_strings.is_empty() {
            return Ok(None);
        }
        let mut errors: Vec<String> = Vec::new();

        let rule_regex = Regex::new(
            "^([^@]*)(?:@([0-9a-fA-F]+))?(->|~>|<-)([^@=]*)(?:@([0-9a-fA-F]+))?(?:=>(\\w+))?$",
        )
        .expect("extension rule grammar is valid");

        let mut state_labels: Vec<String> = vec![String::new()];
        let mut label_to_state: FxHashMap<String, usize> = FxHashMap::default();
        label_to_state.insert(String::new(), 0);

        let mut parsed: Vec<ParsedRule> = Vec::new();
        for rule_string in rule_strings {
            let Some(captures) = rule_regex.captures(rule_string) else {
                errors.push(format!(
                    "Extension specification \"{}\" is ill formed.",
                    rule_string
                ));
                continue;
            };
            let offset_in_member = match captures.get(2) {
                Some(text) => match Offset::from_str_radix(text.as_str(), 16) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        errors.push(format!(
                            "Offset in member \"{}\" is not well formed as hexadecimal.",
                            text.as_str()
                        ));
                        None
                    }
                },
                None => None,
            };
            let offset_in_extension = match captures.get(5) {
                Some(text) => match Offset::from_str_radix(text.as_str(), 16) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        errors.push(format!(
                            "Offset in extension \"{}\" is not well formed as hexadecimal.",
                            text.as_str()
                        ));
                        None
                    }
                },
                None => None,
            };
            let arrow = captures.get(3).map(|m| m.as_str()).unwrap_or("->");
            let new_state = match captures.get(6) {
                Some(label) => match label_to_state.get(label.as_str()) {
                    Some(&state) => state,
                    None => {
                        let state = state_labels.len();
                        state_labels.push(label.as_str().to_string());
                        label_to_state.insert(label.as_str().to_string(), state);
                        state
                    }
                },
                None => 0,
            };
            parsed.push(ParsedRule {
                member_spec: captures
                    .get(1)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
                offset_in_member,
                reference_is_outgoing: arrow != "<-",
                extension_must_be_leaked: arrow == "~>",
                extension_spec: captures
                    .get(4)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
                offset_in_extension,
                new_state,
                base_state: 0,
            });
        }

        // A member spec naming a state label selects the rule's base state
        // instead of constraining the member type. Labels are only known
        // once every rule has been read.
        for rule in &mut parsed {
            if !rule.member_spec.is_empty() {
                if let Some(&state) = label_to_state.get(&rule.member_spec) {
                    rule.base_state = state;
                    rule.member_spec.clear();
                }
            }
        }

        // Bucket rules per base state, keeping declaration order inside
        // each bucket so traversal tries rules in the order given.
        parsed.sort_by_key(|rule| rule.base_state);
        let num_states = state_labels.len();
        let mut state_to_base = vec![0usize; num_states + 1];
        for rule in &parsed {
            state_to_base[rule.base_state + 1] += 1;
        }
        for state in 0..num_states {
            state_to_base[state + 1] += state_to_base[state];
        }

        let mut rules: Vec<Rule> = Vec::with_capacity(parsed.len());
        for spec in parsed {
            let member_checker = SignatureChecker::new(session, &spec.member_spec);
            let extension_checker = SignatureChecker::new(session, &spec.extension_spec);
            if member_checker.unrecognized() && !allow_missing_signatures {
                errors.push(format!(
                    "Member signature \"{}\" is not recognized.",
                    member_checker.spec
                ));
            }
            if extension_checker.unrecognized() && !allow_missing_signatures {
                errors.push(format!(
                    "Extension signature \"{}\" is not recognized.",
                    extension_checker.spec
                ));
            }
            rules.push(Rule {
                offset_in_member: spec.offset_in_member.unwrap_or(0),
                offset_in_extension: spec.offset_in_extension.unwrap_or(0),
                use_offset_in_member: spec.offset_in_member.is_some(),
                use_offset_in_extension: spec.offset_in_extension.is_some(),
                reference_is_outgoing: spec.reference_is_outgoing,
                extension_must_be_leaked: spec.extension_must_be_leaked,
                member_checker,
                extension_checker,
                base_state: spec.base_state,
                new_state: spec.new_state,
            });
        }

        if errors.is_empty() && (rules.is_empty() || rules[0].base_state != 0) {
            // Every rule applies to some non-base state, so no extension
            // could ever leave the base state.
            errors.push(
                "None of the extension rules can be applied to the set to be extended."
                    .to_string(),
            );
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Some(ExtensionSpec {
            rules,
            state_to_base,
            state_labels,
        }))
    }

    pub fn state_labels(&self) -> &[String] {
        &self.state_labels
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleCheckProgress {
    NewRule,
    NoEdgesChecked,
    InProgress,
    RuleDone,
}

struct ExtensionFrame {
    member: AllocationIndex,
    rule_index: usize,
    cursor: usize,
    candidates_left: usize,
    progress: RuleCheckProgress,
}

/// Wraps a visitor, growing each visited set member along the compiled
/// rules before the next member of the base set is considered.
pub struct ExtendedVisitor<'a> {
    session: &'a Session,
    spec: Option<ExtensionSpec>,
    options: ExtensionOptions,
    output: SharedOutput,
}

impl<'a> ExtendedVisitor<'a> {
    pub fn new(
        session: &'a Session,
        spec: Option<ExtensionSpec>,
        options: ExtensionOptions,
        output: SharedOutput,
    ) -> Self {
        Self {
            session,
            spec,
            options,
            output,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.spec.is_some()
    }

    /// Visit one member of the base set and everything the rules extend
    /// it to, skipping allocations already visited by this command.
    pub fn visit(
        &self,
        member: AllocationIndex,
        allocation: &Allocation,
        visited: &mut VisitedSet,
        visitor: &mut dyn AllocationVisitor,
    ) -> Result<()> {
        let Some(spec) = &self.spec else {
            visitor.visit(member, allocation)?;
            return Ok(());
        };

        if visited.has(member) {
            if self.options.comment_extensions {
                writeln!(
                    self.output.borrow_mut(),
                    "# Base set member at 0x{:x} was already visited via an extension rule.\n",
                    allocation.address
                )
                .map_err(crate::errors::SessionError::Io)?;
            }
            return Ok(());
        }

        visited.add(member);
        visitor.visit(member, allocation)?;
        self.extend(spec, member, visited, visitor)
    }

    fn extend(
        &self,
        spec: &ExtensionSpec,
        seed: AllocationIndex,
        visited: &mut VisitedSet,
        visitor: &mut dyn AllocationVisitor,
    ) -> Result<()> {
        use RuleCheckProgress::*;

        let directory = self.session.directory();
        let graph = self.session.graph();
        let none = directory.none();

        let mut stack: Vec<ExtensionFrame> = Vec::new();
        let mut member = seed;
        let mut member_allocation = directory.at(member);
        let mut state = 0usize;
        let mut rule_index = spec.state_to_base[state];
        let mut rule_limit = spec.state_to_base[state + 1];
        let mut progress = NewRule;
        let mut cursor = 0usize;
        let mut candidates_left = 0usize;

        loop {
            self.session.check_interrupt()?;
            if progress == RuleDone {
                rule_index += 1;
                if rule_index == rule_limit {
                    let Some(frame) = stack.pop() else {
                        return Ok(());
                    };
                    member = frame.member;
                    rule_index = frame.rule_index;
                    cursor = frame.cursor;
                    candidates_left = frame.candidates_left;
                    progress = frame.progress;
                    member_allocation = directory.at(member);
                    state = spec.rules[rule_index].base_state;
                    rule_limit = spec.state_to_base[state + 1];
                    continue;
                }
                progress = NewRule;
            }

            let rule = &spec.rules[rule_index];
            let mut candidate = none;

            if progress == NewRule {
                let needed = if rule.reference_is_outgoing {
                    WORD_BYTES as Offset
                } else {
                    1
                };
                if !rule
                    .member_checker
                    .check(self.session, member, member_allocation)
                    || (rule.use_offset_in_member
                        && rule.offset_in_member.saturating_add(needed) > member_allocation.size)
                {
                    progress = RuleDone;
                    continue;
                }
                if rule.reference_is_outgoing && rule.use_offset_in_member {
                    // One pinned slot: a single candidate, no edge list.
                    progress = RuleDone;
                    let Some(target) = self
                        .session
                        .address_map()
                        .read_word(member_allocation.address + rule.offset_in_member)
                    else {
                        continue;
                    };
                    candidate = directory.index_of(target);
                    if candidate == none {
                        continue;
                    }
                    if rule.use_offset_in_extension
                        && target != directory.at(candidate).address + rule.offset_in_extension
                    {
                        continue;
                    }
                } else {
                    cursor = 0;
                    progress = NoEdgesChecked;
                }
            }

            if progress == NoEdgesChecked || progress == InProgress {
                let edges = if rule.reference_is_outgoing {
                    graph.outgoing(member)
                } else {
                    graph.incoming(member)
                };
                if progress == NoEdgesChecked {
                    candidates_left = edges.len();
                    if candidates_left == 0 {
                        progress = RuleDone;
                        continue;
                    }
                    progress = InProgress;
                }
                candidates_left -= 1;
                candidate = edges[cursor];
                cursor += 1;
                if candidates_left == 0 {
                    progress = RuleDone;
                }
            }

            let candidate_allocation = directory.at(candidate);
            let already_visited = visited.has(candidate);
            if !self.options.comment_extensions && already_visited {
                continue;
            }
            if rule.extension_must_be_leaked && !graph.is_leaked(candidate) {
                continue;
            }
            if !candidate_allocation.used
                || !rule
                    .extension_checker
                    .check(self.session, candidate, candidate_allocation)
            {
                continue;
            }
            if rule.use_offset_in_extension {
                if rule.offset_in_extension.saturating_add(WORD_BYTES as Offset)
                    > candidate_allocation.size
                {
                    continue;
                }
                if rule.reference_is_outgoing {
                    // The pinned member slot already proved the exact
                    // offset; otherwise some word in the member must point
                    // at that exact spot in the extension.
                    if !rule.use_offset_in_member
                        && !self.has_aligned_pointer(
                            member_allocation,
                            candidate_allocation.address + rule.offset_in_extension,
                        )
                    {
                        continue;
                    }
                } else {
                    let Some(pointer) = self
                        .session
                        .address_map()
                        .read_word(candidate_allocation.address + rule.offset_in_extension)
                    else {
                        continue;
                    };
                    if rule.use_offset_in_member {
                        if pointer != member_allocation.address + rule.offset_in_member {
                            continue;
                        }
                    } else if pointer < member_allocation.address
                        || pointer >= member_allocation.limit()
                    {
                        continue;
                    }
                }
            } else if rule.use_offset_in_member
                && !rule.reference_is_outgoing
                && !self.has_aligned_pointer(
                    candidate_allocation,
                    member_allocation.address + rule.offset_in_member,
                )
            {
                continue;
            }

            if self.options.skip_tainted_references {
                let tainted = if rule.reference_is_outgoing {
                    graph.edge_is_tainted(member, candidate)
                } else {
                    graph.edge_is_tainted(candidate, member)
                };
                if tainted {
                    continue;
                }
            }
            if self.options.skip_unfavored_references {
                let patterns = self.session.patterns();
                let unfavored = if rule.reference_is_outgoing {
                    patterns.supports_favored_references(candidate)
                        && !graph.edge_is_favored(member, candidate)
                } else {
                    patterns.supports_favored_references(member)
                        && !graph.edge_is_favored(candidate, member)
                };
                if unfavored {
                    continue;
                }
            }

            if self.options.comment_extensions {
                let mut out = self.output.borrow_mut();
                if rule.reference_is_outgoing {
                    writeln!(
                        out,
                        "# Allocation at 0x{:x} references allocation at 0x{:x}.",
                        member_allocation.address, candidate_allocation.address
                    )
                    .map_err(crate::errors::SessionError::Io)?;
                } else {
                    writeln!(
                        out,
                        "# Allocation at 0x{:x} is referenced by allocation at 0x{:x}.",
                        member_allocation.address, candidate_allocation.address
                    )
                    .map_err(crate::errors::SessionError::Io)?;
                }
                if already_visited {
                    writeln!(
                        out,
                        "# Allocation at 0x{:x} was already visited.",
                        candidate_allocation.address
                    )
                    .map_err(crate::errors::SessionError::Io)?;
                    if rule.new_state != 0 {
                        writeln!(
                            out,
                            "# Allocation at 0x{:x} would have been extended in state {}.",
                            candidate_allocation.address, spec.state_labels[rule.new_state]
                        )
                        .map_err(crate::errors::SessionError::Io)?;
                    }
                    writeln!(out).map_err(crate::errors::SessionError::Io)?;
                    continue;
                }
                if rule.new_state != 0 {
                    writeln!(
                        out,
                        "# Allocation at 0x{:x} will be extended in state {}.",
                        candidate_allocation.address, spec.state_labels[rule.new_state]
                    )
                    .map_err(crate::errors::SessionError::Io)?;
                }
            }

            // Only push a resume frame when the current member still has
            // candidates or rules left; a linear chain of extensions must
            // not grow the stack.
            if progress != RuleDone || rule_index + 1 != rule_limit {
                stack.push(ExtensionFrame {
                    member,
                    rule_index,
                    cursor,
                    candidates_left,
                    progress,
                });
            }

            let new_state = rule.new_state;
            member = candidate;
            member_allocation = candidate_allocation;
            visited.add(member);
            visitor.visit(member, member_allocation)?;
            state = new_state;
            rule_index = spec.state_to_base[state];
            rule_limit = spec.state_to_base[state + 1];
            if rule_index != rule_limit {
                progress = NewRule;
            } else {
                // A state with no rules of its own: step back one so the
                // RuleDone handling advances into the frame stack.
                rule_index -= 1;
                progress = RuleDone;
            }
        }
    }

    /// Whether any aligned word of the allocation's mapped image equals
    /// `address`.
    fn has_aligned_pointer(&self, allocation: &Allocation, address: Offset) -> bool {
        let image = self.session.address_map().find_mapped(allocation.address);
        let scannable = image.len().min(allocation.size as usize);
        image[..scannable]
            .chunks_exact(WORD_BYTES)
            .any(|chunk| {
                let mut word = [0u8; WORD_BYTES];
                word.copy_from_slice(chunk);
                Offset::from_le_bytes(word) == address
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::small_session;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn rules(strings: &[&str]) -> Vec<String> {
        strings.iter().map(|s| s.to_string()).collect()
    }

    struct Collector {
        seen: Vec<AllocationIndex>,
    }

    impl AllocationVisitor for Collector {
        fn visit(&mut self, index: AllocationIndex, _allocation: &Allocation) -> Result<()> {
            self.seen.push(index);
            Ok(())
        }
    }

    fn sink() -> SharedOutput {
        Rc::new(RefCell::new(Vec::<u8>::new()))
    }

    struct StubPattern {
        name: &'static str,
    }

    impl crate::patterns::PatternDescriber for StubPattern {
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
    }

    /// Allocation 0 references 1 and 2. Patterns: 0 and 1 are tagged
    /// `ListNode`, 1 is also tagged `Header`. The name `Header` doubles
    /// as a signature name whose value is the first word of allocation 2.
    fn session_with_patterns() -> Session {
        use crate::addr_map::VirtualAddressMapBuilder;
        use crate::directory::AllocationRecord;
        use crate::graph::RootProvider;
        use crate::patterns::PatternRegistry;
        use crate::session::testing::{word_bytes, FixedFinder};
        use crate::signatures::SignatureDirectory;
        use std::sync::Arc;

        let mut map = VirtualAddressMapBuilder::new();
        map.add_range(0x1000, word_bytes(&[0x2000, 0x3000]));
        map.add_range(0x2000, word_bytes(&[0, 0]));
        map.add_range(0x3000, word_bytes(&[0xabcd, 0]));

        let records = vec![
            AllocationRecord {
                address: 0x1000,
                size: 0x10,
                used: true,
            },
            AllocationRecord {
                address: 0x2000,
                size: 0x10,
                used: true,
            },
            AllocationRecord {
                address: 0x3000,
                size: 0x10,
                used: true,
            },
        ];

        let mut patterns = PatternRegistry::new();
        patterns.register(Box::new(StubPattern { name: "ListNode" }));
        patterns.register(Box::new(StubPattern { name: "Header" }));
        let mut signatures = SignatureDirectory::new();
        signatures.register(0xabcd, "Header");

        Session::builder()
            .address_map(Arc::new(map.build()))
            .add_finder(Box::new(FixedFinder(records.into_iter())))
            .signatures(signatures)
            .patterns(patterns)
            .tag_pattern(0x1000, "ListNode")
            .tag_pattern(0x2000, "ListNode")
            .tag_pattern(0x2000, "Header")
            .roots(RootProvider::default())
            .build()
            .expect("fixture session builds")
    }

    fn extend_from(
        session: &Session,
        rule_strings: &[&str],
        seed: AllocationIndex,
    ) -> Vec<AllocationIndex> {
        let spec = ExtensionSpec::compile(session, &rules(rule_strings), false)
            .unwrap()
            .unwrap();
        let extended =
            ExtendedVisitor::new(session, Some(spec), ExtensionOptions::default(), sink());
        let mut visited = VisitedSet::new(session.directory().len());
        let mut collector = Collector { seen: Vec::new() };
        extended
            .visit(seed, session.directory().at(seed), &mut visited, &mut collector)
            .unwrap();
        collector.seen
    }

    #[test]
    fn test_bare_pattern_name_constrains_the_extension() {
        let session = session_with_patterns();
        // Only allocation 1 carries the ListNode tag, so allocation 2 is
        // not taken even though 0 references both.
        assert_eq!(extend_from(&session, &["->ListNode"], 0), vec![0, 1]);
    }

    #[test]
    fn test_bare_pattern_name_constrains_the_member() {
        let session = session_with_patterns();
        // The seed is tagged, so the rule extends it to everything it
        // references; allocation 2 is untagged and extends no further.
        assert_eq!(extend_from(&session, &["ListNode->"], 0), vec![0, 1, 2]);
    }

    #[test]
    fn test_signature_name_wins_over_pattern_name() {
        let session = session_with_patterns();
        // `Header` is both a signature name and a pattern name; the
        // signature reading applies, selecting allocation 2 by its first
        // word rather than allocation 1 by its tag.
        assert_eq!(extend_from(&session, &["->Header"], 0), vec![0, 2]);
    }

    #[test]
    fn test_ill_formed_rule_collects_error() {
        let session = small_session();
        let errors = ExtensionSpec::compile(&session, &rules(&["foo@bar->baz"]), false)
            .expect_err("rule must be rejected");
        assert_eq!(
            errors,
            vec!["Extension specification \"foo@bar->baz\" is ill formed.".to_string()]
        );
    }

    #[test]
    fn test_unknown_member_signature_is_reported() {
        let session = small_session();
        let errors = ExtensionSpec::compile(&session, &rules(&["Widget->"]), false)
            .expect_err("unknown signature must be rejected");
        assert_eq!(
            errors,
            vec!["Member signature \"Widget\" is not recognized.".to_string()]
        );
        // The same rule passes when missing signatures are allowed.
        assert!(
            ExtensionSpec::compile(&session, &rules(&["Widget->"]), true)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_rules_only_for_other_states_are_rejected() {
        let session = small_session();
        let errors = ExtensionSpec::compile(&session, &rules(&["x->=>x"]), true)
            .expect_err("no base-state rule");
        assert_eq!(
            errors,
            vec![
                "None of the extension rules can be applied to the set to be extended."
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_empty_rule_list_disables_extension() {
        let session = small_session();
        assert!(ExtensionSpec::compile(&session, &[], false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_outgoing_extension_follows_references() {
        // Fixture: allocation 0 references allocation 1.
        let session = small_session();
        let spec = ExtensionSpec::compile(&session, &rules(&["->"]), false)
            .unwrap()
            .unwrap();
        let extended =
            ExtendedVisitor::new(&session, Some(spec), ExtensionOptions::default(), sink());
        let mut visited = VisitedSet::new(session.directory().len());
        let mut collector = Collector { seen: Vec::new() };
        extended
            .visit(0, session.directory().at(0), &mut visited, &mut collector)
            .unwrap();
        assert_eq!(collector.seen, vec![0, 1]);
    }

    #[test]
    fn test_extension_is_deterministic() {
        let session = small_session();
        let mut runs: Vec<Vec<AllocationIndex>> = Vec::new();
        for _ in 0..2 {
            let spec = ExtensionSpec::compile(&session, &rules(&["->", "<-"]), false)
                .unwrap()
                .unwrap();
            let extended =
                ExtendedVisitor::new(&session, Some(spec), ExtensionOptions::default(), sink());
            let mut visited = VisitedSet::new(session.directory().len());
            let mut collector = Collector { seen: Vec::new() };
            for i in 0..session.directory().len() {
                if session.directory().at(i).used {
                    extended
                        .visit(i, session.directory().at(i), &mut visited, &mut collector)
                        .unwrap();
                }
            }
            runs.push(collector.seen);
        }
        assert_eq!(runs[0], runs[1]);
    }
}
