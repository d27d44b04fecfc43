//! Visitor framework.
//!
//! A visitor is one operation, `visit(index, allocation)`. Commands build
//! a visitor, pump it from a set source (possibly wrapped by the extension
//! engine), and drop it; summary output such as the sized tally is emitted
//! on drop so it lands after every per-allocation line.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::describe::Describer;
use crate::errors::Result;
use crate::session::Session;
use crate::shared::models::{Allocation, AllocationIndex, Offset};

/// Shared handle to the command's current output sink. Commands are
/// single-threaded, so interior mutability is enough.
pub type SharedOutput = Rc<RefCell<dyn Write>>;

/// One operation per allocation.
pub trait AllocationVisitor {
    fn visit(&mut self, index: AllocationIndex, allocation: &Allocation) -> Result<()>;
}

/// Running count and byte total, reported as
/// `N allocations use 0xH (D) bytes.` when the tally is dropped.
pub struct SizedTally {
    output: SharedOutput,
    descriptor: &'static str,
    count: u64,
    total_bytes: Offset,
}

impl SizedTally {
    pub fn new(output: SharedOutput, descriptor: &'static str) -> Self {
        Self {
            output,
            descriptor,
            count: 0,
            total_bytes: 0,
        }
    }

    pub fn adjust_tally(&mut self, size: Offset) {
        self.count += 1;
        self.total_bytes += size;
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Drop for SizedTally {
    fn drop(&mut self) {
        let mut out = self.output.borrow_mut();
        writeln!(
            out,
            "{} {} use 0x{:x} ({}) bytes.",
            self.count, self.descriptor, self.total_bytes, self.total_bytes
        )
        .ok();
    }
}

/// `count`: tally only, no per-allocation output.
pub struct CountVisitor {
    tally: SizedTally,
}

impl CountVisitor {
    pub fn new(output: SharedOutput) -> Self {
        Self {
            tally: SizedTally::new(output, "allocations"),
        }
    }
}

impl AllocationVisitor for CountVisitor {
    fn visit(&mut self, _index: AllocationIndex, allocation: &Allocation) -> Result<()> {
        self.tally.adjust_tally(allocation.size);
        Ok(())
    }
}

/// `list`: one status line per allocation, then the tally.
pub struct ListVisitor {
    output: SharedOutput,
    tally: SizedTally,
}

impl ListVisitor {
    pub fn new(output: SharedOutput) -> Self {
        Self {
            tally: SizedTally::new(Rc::clone(&output), "allocations"),
            output,
        }
    }
}

impl AllocationVisitor for ListVisitor {
    fn visit(&mut self, _index: AllocationIndex, allocation: &Allocation) -> Result<()> {
        self.tally.adjust_tally(allocation.size);
        let mut out = self.output.borrow_mut();
        writeln!(
            out,
            "{} allocation at 0x{:x} of size 0x{:x}.",
            if allocation.used { "Used" } else { "Free" },
            allocation.address,
            allocation.size
        )?;
        Ok(())
    }
}

/// `enumerate`: bare addresses, one per line.
pub struct EnumerateVisitor {
    output: SharedOutput,
}

impl EnumerateVisitor {
    pub fn new(output: SharedOutput) -> Self {
        Self { output }
    }
}

impl AllocationVisitor for EnumerateVisitor {
    fn visit(&mut self, _index: AllocationIndex, allocation: &Allocation) -> Result<()> {
        let mut out = self.output.borrow_mut();
        writeln!(out, "0x{:x}", allocation.address)?;
        Ok(())
    }
}

/// `describe`: full description per allocation, then the tally.
pub struct DescribeVisitor<'a> {
    describer: Describer<'a>,
    output: SharedOutput,
    explain: bool,
    tally: SizedTally,
}

impl<'a> DescribeVisitor<'a> {
    pub fn new(session: &'a Session, output: SharedOutput, explain: bool) -> Self {
        Self {
            describer: Describer::new(session),
            tally: SizedTally::new(Rc::clone(&output), "allocations"),
            output,
            explain,
        }
    }
}

impl AllocationVisitor for DescribeVisitor<'_> {
    fn visit(&mut self, index: AllocationIndex, allocation: &Allocation) -> Result<()> {
        self.tally.adjust_tally(allocation.size);
        let mut out = self.output.borrow_mut();
        self.describer
            .describe(&mut *out, index, allocation, self.explain)?;
        Ok(())
    }
}

#[derive(Default)]
struct TallyBucket {
    count: u64,
    bytes: Offset,
}

impl TallyBucket {
    fn add(&mut self, size: Offset) {
        self.count += 1;
        self.bytes += size;
    }
}

/// `summarize`: per-signature and per-pattern byte tallies with an
/// unrecognized remainder, then the total. The breakdown prints on drop,
/// largest byte total first, ties by label.
pub struct SummarizeVisitor<'a> {
    session: &'a Session,
    output: SharedOutput,
    by_signature: FxHashMap<Offset, TallyBucket>,
    by_pattern: FxHashMap<String, TallyBucket>,
    unrecognized: TallyBucket,
    total: TallyBucket,
}

impl<'a> SummarizeVisitor<'a> {
    pub fn new(session: &'a Session, output: SharedOutput) -> Self {
        Self {
            session,
            output,
            by_signature: FxHashMap::default(),
            by_pattern: FxHashMap::default(),
            unrecognized: TallyBucket::default(),
            total: TallyBucket::default(),
        }
    }
}

impl AllocationVisitor for SummarizeVisitor<'_> {
    fn visit(&mut self, index: AllocationIndex, allocation: &Allocation) -> Result<()> {
        self.total.add(allocation.size);
        let signatures = self.session.signatures();
        if let Some(signature) =
            signatures.signature_of(self.session.directory(), self.session.address_map(), index)
        {
            self.by_signature
                .entry(signature)
                .or_default()
                .add(allocation.size);
        } else if let Some(pattern) = self.session.patterns().first_pattern_name(index) {
            self.by_pattern
                .entry(pattern.to_string())
                .or_default()
                .add(allocation.size);
        } else {
            self.unrecognized.add(allocation.size);
        }
        Ok(())
    }
}

impl Drop for SummarizeVisitor<'_> {
    fn drop(&mut self) {
        let mut lines: Vec<(Offset, String)> = Vec::new();
        for (signature, bucket) in &self.by_signature {
            let label = match self.session.signatures().name(*signature) {
                Some(name) => format!("Signature 0x{:x} ({})", signature, name),
                None => format!("Signature 0x{:x}", signature),
            };
            lines.push((
                bucket.bytes,
                format!(
                    "{} has {} instances taking 0x{:x} ({}) bytes.",
                    label, bucket.count, bucket.bytes, bucket.bytes
                ),
            ));
        }
        for (pattern, bucket) in &self.by_pattern {
            lines.push((
                bucket.bytes,
                format!(
                    "Pattern {} has {} instances taking 0x{:x} ({}) bytes.",
                    pattern, bucket.count, bucket.bytes, bucket.bytes
                ),
            ));
        }
        lines.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut out = self.output.borrow_mut();
        for (_, line) in lines {
            writeln!(out, "{}", line).ok();
        }
        if self.unrecognized.count > 0 {
            writeln!(
                out,
                "{} unrecognized allocations use 0x{:x} ({}) bytes.",
                self.unrecognized.count, self.unrecognized.bytes, self.unrecognized.bytes
            )
            .ok();
        }
        writeln!(
            out,
            "{} allocations use 0x{:x} ({}) bytes.",
            self.total.count, self.total.bytes, self.total.bytes
        )
        .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::small_session;

    fn shared_buffer() -> (SharedOutput, Rc<RefCell<Vec<u8>>>) {
        let buffer: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let shared: SharedOutput = buffer.clone();
        (shared, buffer)
    }

    #[test]
    fn test_tally_line_format() {
        let (output, buffer) = shared_buffer();
        {
            let mut tally = SizedTally::new(output, "allocations");
            tally.adjust_tally(0x10);
            tally.adjust_tally(0x20);
            tally.adjust_tally(0x20);
        }
        let text = String::from_utf8(buffer.borrow().clone()).unwrap();
        assert_eq!(text, "3 allocations use 0x50 (80) bytes.\n");
    }

    #[test]
    fn test_list_visitor_reports_status_and_tally() {
        let session = small_session();
        let (output, buffer) = shared_buffer();
        {
            let mut visitor = ListVisitor::new(output);
            for i in 0..session.directory().len() {
                visitor.visit(i, session.directory().at(i)).unwrap();
            }
        }
        let text = String::from_utf8(buffer.borrow().clone()).unwrap();
        assert!(text.contains("Used allocation at 0x1000 of size 0x20."));
        assert!(text.contains("Free allocation at 0x3000 of size 0x10."));
        assert!(text.ends_with("4 allocations use 0x80 (128) bytes.\n"));
    }

    #[test]
    fn test_enumerate_prints_bare_addresses() {
        let session = small_session();
        let (output, buffer) = shared_buffer();
        let mut visitor = EnumerateVisitor::new(output);
        visitor.visit(0, session.directory().at(0)).unwrap();
        let text = String::from_utf8(buffer.borrow().clone()).unwrap();
        assert_eq!(text, "0x1000\n");
    }
}
