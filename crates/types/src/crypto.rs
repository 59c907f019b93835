//! Ed25519 keys, signatures, and validator addresses.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of an encoded signature in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Length of a validator address in bytes.
pub const ADDRESS_LENGTH: usize = 32;

/// A validator identifier, derived as SHA-256 of the Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// The all-zero address (placeholder in unsigned test fixtures).
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    /// Wrap raw bytes as an address.
    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Address(bytes)
    }

    /// Derive the address for a public key.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Address(Sha256::digest(public_key.as_bytes()).into())
    }

    /// Raw byte access.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}..)", &hex::encode(self.0)[..8])
    }
}

impl From<[u8; ADDRESS_LENGTH]> for Address {
    fn from(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Address(bytes)
    }
}

/// An Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Parse a public key from its 32-byte encoding.
    ///
    /// Rejects byte strings that are not valid curve points.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, ed25519_dalek::SignatureError> {
        Ok(PublicKey(VerifyingKey::from_bytes(bytes)?))
    }

    /// Raw byte access.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// The address derived from this key.
    pub fn address(&self) -> Address {
        Address::from_public_key(self)
    }

    /// Verify a signature over a message.
    ///
    /// A zero or otherwise malformed signature simply fails verification.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        self.0.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}..)", &hex::encode(self.as_bytes())[..8])
    }
}

/// An Ed25519 signature, stored as raw bytes.
///
/// Raw storage keeps the codec total: any 64-byte string decodes, and
/// verification decides validity.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl Signature {
    /// The all-zero signature. Always fails verification.
    pub const fn zero() -> Self {
        Signature([0u8; SIGNATURE_LENGTH])
    }

    /// Wrap raw bytes as a signature.
    pub const fn new(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Signature(bytes)
    }

    /// Raw byte access.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Signature::zero()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", &hex::encode(self.0)[..8])
    }
}

impl From<ed25519_dalek::Signature> for Signature {
    fn from(sig: ed25519_dalek::Signature) -> Self {
        Signature(sig.to_bytes())
    }
}

/// An Ed25519 signing keypair.
///
/// Implements [`Clone`] because the keypair is shared between the proposal
/// and voting paths of the engine.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        KeyPair {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Test fixtures only need
    /// stable identities, not secrecy.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        KeyPair {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// The public half of this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key())
    }

    /// The validator address for this keypair.
    pub fn address(&self) -> Address {
        self.public_key().address()
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({:?})", self.address())
    }
}
