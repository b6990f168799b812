//! SHA-1 based series fingerprints
//!
//! A fingerprint is the first 8 bytes of the SHA-1 digest of the canonical
//! label string, read little-endian. Changing either the hash or the byte
//! order re-keys every stored series, so both are fixed.
//!
//! Truncating to 64 bits means two label sets can collide. By the birthday
//! bound the probability is roughly `n^2 / 2^65`: about 2.7e-8 at one million
//! series and 2.7e-4 at 100 million. A collision merges two series under one
//! fingerprint; it is not detected here.

use sha1::{Digest, Sha1};
use std::fmt;

/// 64-bit series identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint of a canonical label string
    pub fn of(canonical: &str) -> Self {
        Self::from_bytes(canonical.as_bytes())
    }

    /// Fingerprint of raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let digest = Sha1::digest(bytes);
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Self(u64::from_le_bytes(head))
    }

    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<Fingerprint> for u64 {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
