//! Content digests and header signatures
//!
//! - SHA-256 for content addressing (field hashes, header hashes)
//! - Ed25519 for entry header signatures
//!
//! Both sit behind small seams (`DigestContext`, `SignatureScheme`) so the
//! algorithms can be swapped without touching the protocol readers.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::common::{Error, Result};

/// Width of a content digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Wire length of a signature blob: verifying key (32) + signature (64).
pub const SIGNATURE_LEN: usize = 96;

/// A 256-bit content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest([u8; DIGEST_LEN]);

impl ContentDigest {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| Error::MalformedElement(format!("digest length {}", bytes.len())))?;
        Ok(Self(arr))
    }

    pub fn of(data: &[u8]) -> Self {
        let mut ctx = DigestContext::new();
        ctx.update(data);
        ctx.finalize()
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Short hex form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentDigest({})", self.short())
    }
}

/// Incremental digest over a parse or write session.
///
/// Each session owns its own context; digest state is never shared across
/// concurrent sessions.
pub struct DigestContext {
    hasher: Sha256,
}

impl DigestContext {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> ContentDigest {
        let out = self.hasher.finalize();
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&out);
        ContentDigest(bytes)
    }
}

impl Default for DigestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A signer identity: the digest of the signer's verifying key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; DIGEST_LEN]);

impl Address {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| Error::MalformedElement(format!("address length {}", bytes.len())))?;
        Ok(Self(arr))
    }

    pub fn of_verifying_key(key: &VerifyingKey) -> Self {
        Self(*ContentDigest::of(key.as_bytes()).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", hex::encode(&self.0[..6]))
    }
}

/// Recovers a signer identity from a digest and a signature blob.
pub trait SignatureScheme: Send + Sync {
    /// Verify `signature` over `digest` and return the signer's address.
    /// Fails if the signature does not verify or is malformed.
    fn recover(&self, digest: &ContentDigest, signature: &[u8]) -> Result<Address>;
}

/// Default scheme: Ed25519 with the verifying key embedded in the blob
/// (`key || signature`), address derived from the key.
pub struct Ed25519Scheme;

impl SignatureScheme for Ed25519Scheme {
    fn recover(&self, digest: &ContentDigest, signature: &[u8]) -> Result<Address> {
        if signature.len() != SIGNATURE_LEN {
            return Err(Error::InvalidSignature(format!(
                "expected {} bytes, got {}",
                SIGNATURE_LEN,
                signature.len()
            )));
        }
        let key_bytes: [u8; 32] = signature[..32].try_into().unwrap();
        let sig_bytes: [u8; 64] = signature[32..].try_into().unwrap();
        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| Error::InvalidSignature(e.to_string()))?;
        let sig = Signature::from_bytes(&sig_bytes);
        let address = Address::of_verifying_key(&key);
        key.verify(digest.as_bytes(), &sig)
            .map_err(|_| Error::SignatureCheckFailed(address.to_string()))?;
        Ok(address)
    }
}

/// A signing identity used when building entries.
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing: SigningKey::generate(&mut rng),
        }
    }

    pub fn address(&self) -> Address {
        Address::of_verifying_key(&self.signing.verifying_key())
    }

    /// Produce the wire signature blob over a digest: `key || signature`.
    pub fn sign(&self, digest: &ContentDigest) -> Vec<u8> {
        let sig = self.signing.sign(digest.as_bytes());
        let mut blob = Vec::with_capacity(SIGNATURE_LEN);
        blob.extend_from_slice(self.signing.verifying_key().as_bytes());
        blob.extend_from_slice(&sig.to_bytes());
        blob
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        let a = ContentDigest::of(b"hello world");
        let b = ContentDigest::of(b"hello world");
        assert_eq!(a, b);
        assert_ne!(a, ContentDigest::of(b"hello worlds"));
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut ctx = DigestContext::new();
        ctx.update(b"hello ");
        ctx.update(b"world");
        assert_eq!(ctx.finalize(), ContentDigest::of(b"hello world"));
    }

    #[test]
    fn test_sign_and_recover() {
        let keypair = Keypair::generate();
        let digest = ContentDigest::of(b"payload");
        let blob = keypair.sign(&digest);

        let recovered = Ed25519Scheme.recover(&digest, &blob).unwrap();
        assert_eq!(recovered, keypair.address());
    }

    #[test]
    fn test_recover_rejects_tampered_digest() {
        let keypair = Keypair::generate();
        let blob = keypair.sign(&ContentDigest::of(b"payload"));

        let other = ContentDigest::of(b"tampered");
        assert!(Ed25519Scheme.recover(&other, &blob).is_err());
    }

    #[test]
    fn test_recover_rejects_short_blob() {
        let digest = ContentDigest::of(b"payload");
        assert!(Ed25519Scheme.recover(&digest, &[0u8; 12]).is_err());
    }
}
