//! Stable fingerprints for allocation outcomes.
//!
//! Two cycles over identical inputs must produce the same decisions; hashing
//! the serialized decision list gives a cheap way to log and assert that.

use blake3::Hasher;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }

    /// First 12 hex chars, enough to eyeball in logs.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    let mut h = Hasher::new();
    h.update(bytes);
    Fingerprint(h.finalize().into())
}

/// Fingerprint any serde-serializable value deterministically (via JSON).
/// Callers must only pass ordered containers (`BTreeMap`, `Vec`).
pub fn fingerprint_serde<T: Serialize>(v: &T) -> Result<Fingerprint, crate::error::Error> {
    let bytes = serde_json::to_vec(v)?;
    Ok(fingerprint_bytes(&bytes))
}
