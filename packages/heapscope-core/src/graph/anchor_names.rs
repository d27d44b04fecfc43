//! Optional symbol names for static anchor addresses.
//!
//! The host may resolve static addresses against load-module symbol
//! tables; chain listings show the name next to the raw address when one
//! is known.

use rustc_hash::FxHashMap;

use crate::shared::models::Offset;

#[derive(Debug, Default)]
pub struct AnchorNameDirectory {
    names: FxHashMap<Offset, String>,
}

impl AnchorNameDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, address: Offset, name: impl Into<String>) {
        self.names.insert(address, name.into());
    }

    pub fn name(&self, address: Offset) -> Option<&str> {
        self.names.get(&address).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
