//! Chain links and the digest primitive
//!
//! A link's digest is `Digest(nonce || salt)`, and the next link's nonce is
//! the lowercase hex encoding of that digest. Links are immutable once built
//! and are shared between the generator and readers as `Arc<Link>`.

use std::fmt;
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::error::HashletResult;

/// Digest width in bytes (SHA-256)
pub const DIGEST_LEN: usize = 32;

/// Width of a hex-encoded digest, and so of every nonce after genesis
pub const HEX_DIGEST_LEN: usize = DIGEST_LEN * 2;

/// Raw digest bytes
pub type FixedDigest = [u8; DIGEST_LEN];

/// One-way function the chain is built from
///
/// Implementations must be deterministic and side-effect free. An `Err` is
/// treated as fatal by the generator.
pub trait DigestPrimitive: Send + Sync + 'static {
    fn digest(&self, input: &[u8]) -> HashletResult<FixedDigest>;
}

/// SHA-256 via the `sha2` crate
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Digest;

impl DigestPrimitive for Sha256Digest {
    #[inline]
    fn digest(&self, input: &[u8]) -> HashletResult<FixedDigest> {
        Ok(Sha256::digest(input).into())
    }
}

/// Process-wide salt, fixed when the generator starts
#[derive(Clone, PartialEq, Eq)]
pub struct Salt(Box<[u8]>);

impl Salt {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Salt(bytes.into().into_boxed_slice())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// Lowercase, zero-padded hex encoding of a digest
#[inline]
pub fn encode_digest(digest: &FixedDigest) -> String {
    hex::encode(digest)
}

/// Compute `Digest(nonce || salt)`
pub fn link_digest<D: DigestPrimitive + ?Sized>(
    digest: &D,
    nonce: &[u8],
    salt: &Salt,
) -> HashletResult<FixedDigest> {
    let mut input = Vec::with_capacity(nonce.len() + salt.as_bytes().len());
    input.extend_from_slice(nonce);
    input.extend_from_slice(salt.as_bytes());
    digest.digest(&input)
}

/// One element of the chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    /// Position in the chain; genesis is 0
    pub sequence: u64,
    /// Bytes hashed (with the salt) to produce `digest`
    pub nonce: Vec<u8>,
    /// `Digest(nonce || salt)`
    pub digest: FixedDigest,
    /// When the generator built this link
    pub published_at: SystemTime,
}

impl Link {
    /// Build the genesis link from the configured seed nonce
    pub fn genesis<D: DigestPrimitive + ?Sized>(
        digest: &D,
        initial_nonce: &[u8],
        salt: &Salt,
    ) -> HashletResult<Link> {
        Ok(Link {
            sequence: 0,
            nonce: initial_nonce.to_vec(),
            digest: link_digest(digest, initial_nonce, salt)?,
            published_at: SystemTime::now(),
        })
    }

    /// Build the link that follows `self`
    pub fn successor<D: DigestPrimitive + ?Sized>(
        &self,
        digest: &D,
        salt: &Salt,
    ) -> HashletResult<Link> {
        let nonce = self.digest_hex().into_bytes();
        let next = link_digest(digest, &nonce, salt)?;
        Ok(Link {
            sequence: self.sequence + 1,
            nonce,
            digest: next,
            published_at: SystemTime::now(),
        })
    }

    /// The digest as the text served from `/current`
    #[inline]
    pub fn digest_hex(&self) -> String {
        encode_digest(&self.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS_0_BLOSSOM: &str =
        "e0cfd84c1d54f93e5fa0661a039428398ebb46212f618fda7f1be15846a36379";
    const LINK_1_BLOSSOM: &str =
        "387b0ab6652587f37f886da904fb2145bdffe59860251d0347dcf978b36dea22";

    #[test]
    fn test_sha256_known_vectors() {
        let empty = Sha256Digest.digest(b"").unwrap();
        assert_eq!(
            encode_digest(&empty),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        let abc = Sha256Digest.digest(b"abc").unwrap();
        assert_eq!(
            encode_digest(&abc),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_genesis_hashes_nonce_then_salt() {
        let salt = Salt::new("blossom");
        let genesis = Link::genesis(&Sha256Digest, b"0", &salt).unwrap();
        assert_eq!(genesis.sequence, 0);
        assert_eq!(genesis.nonce, b"0");
        assert_eq!(genesis.digest_hex(), GENESIS_0_BLOSSOM);
        assert_eq!(
            genesis.digest,
            Sha256Digest.digest(b"0blossom").unwrap()
        );
    }

    #[test]
    fn test_successor_uses_hex_of_previous_digest() {
        let salt = Salt::new("blossom");
        let genesis = Link::genesis(&Sha256Digest, b"0", &salt).unwrap();
        let first = genesis.successor(&Sha256Digest, &salt).unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(first.nonce, GENESIS_0_BLOSSOM.as_bytes());
        assert_eq!(first.digest_hex(), LINK_1_BLOSSOM);
    }

    #[test]
    fn test_hex_is_fixed_width_lowercase() {
        let mut digest = [0u8; DIGEST_LEN];
        digest[0] = 0x0a;
        digest[31] = 0xff;
        let hex = encode_digest(&digest);
        assert_eq!(hex.len(), HEX_DIGEST_LEN);
        assert!(hex.starts_with("0a00"));
        assert!(hex.ends_with("00ff"));
        assert!(!hex.chars().any(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn test_salt_changes_digest() {
        let a = Link::genesis(&Sha256Digest, b"0", &Salt::new("blossom")).unwrap();
        let b = Link::genesis(&Sha256Digest, b"0", &Salt::new("thorn")).unwrap();
        assert_ne!(a.digest, b.digest);
    }
}
