//! 32-byte hash primitive.

use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Errors from hex parsing.
#[derive(Debug, Error, PartialEq)]
pub enum HexError {
    #[error("invalid hex length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid hex string: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// A 32-byte hash value.
///
/// Ordering is lexicographic over the raw bytes, which is what fork-choice
/// tie-breaking relies on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash([u8; 32]);

impl Hash {
    /// The all-zero hash. Used for genesis and absent roots.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Wrap raw bytes as a hash.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// SHA-256 of arbitrary input.
    pub fn digest(data: &[u8]) -> Self {
        Hash(Sha256::digest(data).into())
    }

    /// Raw byte access.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Consume into raw bytes.
    pub fn into_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Check for the all-zero value.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let bytes = hex::decode(s)?;
        let got = bytes.len();
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HexError::InvalidLength { expected: 32, got })?;
        Ok(Hash(arr))
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form for logs; full value available via Display.
        write!(f, "Hash({}..)", &self.to_hex()[..8])
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let h = Hash::digest(b"bedrock");
        let parsed = Hash::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(matches!(
            Hash::from_hex("aabb"),
            Err(HexError::InvalidLength { expected: 32, got: 2 })
        ));
        assert!(Hash::from_hex("zz").is_err());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 1;
        b[0] = 2;
        assert!(Hash::new(a) < Hash::new(b));

        let mut c = [0u8; 32];
        c[31] = 1;
        assert!(Hash::ZERO < Hash::new(c));
        assert!(Hash::new(c) < Hash::new(a));
    }

    #[test]
    fn digest_is_sha256() {
        // SHA-256 of the empty string is a well-known constant.
        assert_eq!(
            Hash::digest(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
