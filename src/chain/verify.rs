//! Read-only chain verification
//!
//! None of this runs on the publish path. Verification works from a snapshot
//! (or a single link) plus the salt and digest primitive the chain was built
//! with.

use super::link::{encode_digest, link_digest, DigestPrimitive, Link, Salt};
use super::snapshot::ChainSnapshot;
use crate::error::{HashletError, HashletResult};

/// Check that `link.digest == Digest(link.nonce || salt)`
pub fn verify_link<D: DigestPrimitive + ?Sized>(
    link: &Link,
    salt: &Salt,
    digest: &D,
) -> HashletResult<()> {
    let expected = link_digest(digest, &link.nonce, salt)?;
    if expected != link.digest {
        return Err(HashletError::ChainBroken {
            sequence: link.sequence,
            reason: format!(
                "digest {} does not match nonce (expected {})",
                link.digest_hex(),
                encode_digest(&expected)
            ),
        });
    }
    Ok(())
}

/// Check every retained link and the linkage between neighbours
pub fn verify_snapshot<D: DigestPrimitive + ?Sized>(
    snapshot: &ChainSnapshot,
    salt: &Salt,
    digest: &D,
) -> HashletResult<()> {
    let mut prev: Option<&Link> = None;
    for link in snapshot.history() {
        verify_link(link, salt, digest)?;
        if let Some(prev) = prev {
            if link.sequence != prev.sequence + 1 {
                return Err(HashletError::ChainBroken {
                    sequence: link.sequence,
                    reason: format!("follows sequence {}", prev.sequence),
                });
            }
            if link.nonce != prev.digest_hex().as_bytes() {
                return Err(HashletError::ChainBroken {
                    sequence: link.sequence,
                    reason: "nonce is not the previous digest".into(),
                });
            }
        }
        prev = Some(link);
    }
    Ok(())
}

/// Recompute the link at `sequence` starting from the genesis nonce
///
/// Cost is linear in `sequence`.
pub fn replay_from_genesis<D: DigestPrimitive + ?Sized>(
    initial_nonce: &[u8],
    salt: &Salt,
    digest: &D,
    sequence: u64,
) -> HashletResult<Link> {
    let mut link = Link::genesis(digest, initial_nonce, salt)?;
    while link.sequence < sequence {
        link = link.successor(digest, salt)?;
    }
    Ok(link)
}

/// Check that `link` is the link the chain produces at its sequence
pub fn verify_from_genesis<D: DigestPrimitive + ?Sized>(
    link: &Link,
    initial_nonce: &[u8],
    salt: &Salt,
    digest: &D,
) -> HashletResult<()> {
    let expected = replay_from_genesis(initial_nonce, salt, digest, link.sequence)?;
    if expected.nonce != link.nonce || expected.digest != link.digest {
        return Err(HashletError::ChainBroken {
            sequence: link.sequence,
            reason: format!(
                "expected digest {}, found {}",
                expected.digest_hex(),
                link.digest_hex()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::link::Sha256Digest;
    use crate::chain::snapshot::SnapshotStore;

    fn salt() -> Salt {
        Salt::new("blossom")
    }

    #[test]
    fn test_replay_matches_known_values() {
        let first = replay_from_genesis(b"0", &salt(), &Sha256Digest, 1).unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(
            first.nonce,
            b"e0cfd84c1d54f93e5fa0661a039428398ebb46212f618fda7f1be15846a36379"
        );
        assert_eq!(
            first.digest_hex(),
            "387b0ab6652587f37f886da904fb2145bdffe59860251d0347dcf978b36dea22"
        );

        let second = replay_from_genesis(b"0", &salt(), &Sha256Digest, 2).unwrap();
        assert_eq!(
            second.digest_hex(),
            "2378ab6bd155ae6df6ed5e45db76943cc1c6f4080b927212e3c27a8caf9595d1"
        );
    }

    #[test]
    fn test_verify_link_detects_tampering() {
        let mut link = replay_from_genesis(b"0", &salt(), &Sha256Digest, 3).unwrap();
        assert!(verify_link(&link, &salt(), &Sha256Digest).is_ok());

        link.digest[0] ^= 0x01;
        let err = verify_link(&link, &salt(), &Sha256Digest).unwrap_err();
        assert!(matches!(err, HashletError::ChainBroken { sequence: 3, .. }));
    }

    #[test]
    fn test_verify_link_wrong_salt() {
        let link = replay_from_genesis(b"0", &salt(), &Sha256Digest, 1).unwrap();
        assert!(verify_link(&link, &Salt::new("thorn"), &Sha256Digest).is_err());
    }

    #[test]
    fn test_verify_snapshot_after_eviction() {
        let genesis = Link::genesis(&Sha256Digest, b"0", &salt()).unwrap();
        let (store, mut publisher) = SnapshotStore::open(genesis, 4);
        for _ in 0..9 {
            let next = store.read().current().successor(&Sha256Digest, &salt()).unwrap();
            publisher.publish(next).unwrap();
        }
        let snap = store.read();
        assert!(verify_snapshot(&snap, &salt(), &Sha256Digest).is_ok());
        assert!(verify_from_genesis(snap.current(), b"0", &salt(), &Sha256Digest).is_ok());
    }

    #[test]
    fn test_verify_from_genesis_rejects_other_seed() {
        let link = replay_from_genesis(b"1", &salt(), &Sha256Digest, 4).unwrap();
        let err = verify_from_genesis(&link, b"0", &salt(), &Sha256Digest).unwrap_err();
        assert!(matches!(err, HashletError::ChainBroken { sequence: 4, .. }));
    }
}
