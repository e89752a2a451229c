use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};

use super::Attributes;

/// Builds the stable hashes used to deduplicate limits and counters.
///
/// Every part is length-prefixed so `("ab", "c")` and `("a", "bc")` never collide.
pub(crate) struct Fingerprint(Sha256);

impl Fingerprint {
    pub(crate) fn new() -> Self {
        Self(Sha256::new())
    }

    pub(crate) fn part(mut self, part: &str) -> Self {
        self.0.update((part.len() as u64).to_be_bytes());
        self.0.update(part.as_bytes());
        self
    }

    pub(crate) fn attributes(self, attributes: &Attributes) -> Self {
        attributes
            .iter()
            .fold(self, |fingerprint, attribute| {
                fingerprint.part(&attribute.name).part(&attribute.value)
            })
    }

    pub(crate) fn finish(self) -> String {
        STANDARD.encode(self.0.finalize())
    }
}
