//! Signature Directory
//!
//! Maps the first machine word of an allocation, when that word is the
//! address of a recognized vtable or type descriptor in a known load
//! module, to a human-readable type name. A name may be backed by several
//! signature values because the same type may be instantiated in multiple
//! load modules.

use rustc_hash::FxHashMap;

use crate::addr_map::VirtualAddressMap;
use crate::directory::Directory;
use crate::shared::models::{AllocationIndex, Offset};

#[derive(Debug, Default)]
pub struct SignatureDirectory {
    name_by_signature: FxHashMap<Offset, String>,
    signatures_by_name: FxHashMap<String, Vec<Offset>>,
}

impl SignatureDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one signature value under a type name.
    pub fn register(&mut self, signature: Offset, name: impl Into<String>) {
        let name = name.into();
        self.name_by_signature.insert(signature, name.clone());
        let signatures = self.signatures_by_name.entry(name).or_default();
        if !signatures.contains(&signature) {
            signatures.push(signature);
        }
    }

    /// Whether the value is a recognized type descriptor address.
    #[inline]
    pub fn is_mapped(&self, signature: Offset) -> bool {
        self.name_by_signature.contains_key(&signature)
    }

    /// The type name for a signature value, if recognized.
    pub fn name(&self, signature: Offset) -> Option<&str> {
        self.name_by_signature.get(&signature).map(String::as_str)
    }

    /// All signature values registered under a name.
    pub fn signatures_for(&self, name: &str) -> &[Offset] {
        self.signatures_by_name
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_known_name(&self, name: &str) -> bool {
        self.signatures_by_name.contains_key(name)
    }

    /// The signature of an allocation: its first word, when recognized.
    pub fn signature_of(
        &self,
        directory: &Directory,
        addr_map: &VirtualAddressMap,
        index: AllocationIndex,
    ) -> Option<Offset> {
        let allocation = directory.get(index)?;
        if allocation.size < crate::shared::models::WORD_BYTES as Offset {
            return None;
        }
        let word = addr_map.read_word(allocation.address)?;
        if self.is_mapped(word) {
            Some(word)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_has_multiple_signatures() {
        let mut directory = SignatureDirectory::new();
        directory.register(0x7f00_1000, "Container");
        directory.register(0x7f00_2000, "Container");
        directory.register(0x7f00_3000, "Leaf");

        assert!(directory.is_mapped(0x7f00_1000));
        assert_eq!(directory.name(0x7f00_2000), Some("Container"));
        assert_eq!(directory.signatures_for("Container").len(), 2);
        assert_eq!(directory.signatures_for("Leaf"), &[0x7f00_3000]);
        assert!(directory.signatures_for("Missing").is_empty());
    }

    #[test]
    fn test_duplicate_registration_is_idempotent() {
        let mut directory = SignatureDirectory::new();
        directory.register(0x10, "T");
        directory.register(0x10, "T");
        assert_eq!(directory.signatures_for("T").len(), 1);
    }
}
