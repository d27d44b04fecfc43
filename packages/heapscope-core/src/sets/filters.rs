//! Composable filters over a set source.
//!
//! Filters wrap another source and drop non-matching indices; composing
//! them left-to-right preserves ascending order because no filter reorders
//! anything.

use crate::session::Session;
use crate::shared::models::{AllocationIndex, Offset};

use super::SetSource;

/// Keep allocations whose size falls in an inclusive range. An exact size
/// match is the degenerate range `min == max`.
pub struct SizeFilter<'a> {
    session: &'a Session,
    inner: Box<dyn SetSource + 'a>,
    min: Option<Offset>,
    max: Option<Offset>,
}

impl<'a> SizeFilter<'a> {
    pub fn new(
        session: &'a Session,
        inner: Box<dyn SetSource + 'a>,
        min: Option<Offset>,
        max: Option<Offset>,
    ) -> Self {
        Self {
            session,
            inner,
            min,
            max,
        }
    }
}

impl SetSource for SizeFilter<'_> {
    fn next(&mut self) -> Option<AllocationIndex> {
        while let Some(i) = self.inner.next() {
            let size = self.session.directory().at(i).size;
            if self.min.map(|m| size >= m).unwrap_or(true)
                && self.max.map(|m| size <= m).unwrap_or(true)
            {
                return Some(i);
            }
        }
        None
    }
}

/// Keep allocations whose first word equals one of the given signature
/// values. The caller resolves a signature name to its value list.
pub struct SignatureFilter<'a> {
    session: &'a Session,
    inner: Box<dyn SetSource + 'a>,
    signatures: Vec<Offset>,
}

impl<'a> SignatureFilter<'a> {
    pub fn new(
        session: &'a Session,
        inner: Box<dyn SetSource + 'a>,
        signatures: Vec<Offset>,
    ) -> Self {
        Self {
            session,
            inner,
            signatures,
        }
    }
}

impl SetSource for SignatureFilter<'_> {
    fn next(&mut self) -> Option<AllocationIndex> {
        while let Some(i) = self.inner.next() {
            let allocation = self.session.directory().at(i);
            if let Some(word) = self.session.address_map().read_word(allocation.address) {
                if self.signatures.contains(&word) {
                    return Some(i);
                }
            }
        }
        None
    }
}

/// Keep allocations tagged with a named pattern.
pub struct PatternFilter<'a> {
    session: &'a Session,
    inner: Box<dyn SetSource + 'a>,
    pattern: String,
}

impl<'a> PatternFilter<'a> {
    pub fn new(session: &'a Session, inner: Box<dyn SetSource + 'a>, pattern: String) -> Self {
        Self {
            session,
            inner,
            pattern,
        }
    }
}

impl SetSource for PatternFilter<'_> {
    fn next(&mut self) -> Option<AllocationIndex> {
        while let Some(i) = self.inner.next() {
            if self.session.patterns().has_pattern(i, &self.pattern) {
                return Some(i);
            }
        }
        None
    }
}
