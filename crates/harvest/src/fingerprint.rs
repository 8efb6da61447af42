//! Stable request fingerprints used for cache lookup and single-flight grouping.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use fnv::FnvHasher;

use crate::types::Target;

/// FNV-1a hash of a target's canonical form.
///
/// The canonical form already sorts parameters and normalizes host case,
/// default ports and fragments, so logically identical targets collide here.
/// Equality also compares the canonical form itself, so two targets whose
/// hashes collide stay distinct keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    hash: u64,
    canonical: Arc<str>,
}

impl Fingerprint {
    pub fn of(target: &Target) -> Self {
        let canonical = target.canonical();
        let mut hasher = FnvHasher::default();
        hasher.write(canonical.as_bytes());
        Self {
            hash: hasher.finish(),
            canonical: canonical.into(),
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.hash
    }

    /// The canonical target this fingerprint identifies.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    #[cfg(test)]
    pub(crate) fn with_hash(hash: u64, canonical: &str) -> Self {
        Self {
            hash,
            canonical: canonical.into(),
        }
    }
}

impl Hash for Fingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.hash)
    }
}
