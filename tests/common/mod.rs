//! Shared helpers for chain integration tests

#![allow(dead_code)] // Not every test binary uses every helper

use std::time::{Duration, Instant};

use hashlet_fs::chain::{encode_digest, Link};
use hashlet_fs::ChainConfig;
use sha2::{Digest, Sha256};

pub const SALT: &str = "blossom";

/// Config with a short interval so spawned generators move quickly
pub fn fast_config(history_capacity: usize) -> ChainConfig {
    ChainConfig {
        interval_ms: 1,
        history_capacity,
        ..Default::default()
    }
}

/// Lowercase hex SHA-256 of `nonce || salt`, computed independently of the crate
pub fn expected_hex(nonce: &[u8], salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Panic unless `link.digest == SHA-256(link.nonce || salt)`
pub fn assert_link_valid(link: &Link, salt: &str) {
    assert_eq!(
        encode_digest(&link.digest),
        expected_hex(&link.nonce, salt),
        "link {} digest does not match its nonce",
        link.sequence
    );
}

/// Panic unless `next` directly follows `prev`
pub fn assert_linked(prev: &Link, next: &Link) {
    assert_eq!(next.sequence, prev.sequence + 1, "sequence must advance by one");
    assert_eq!(
        next.nonce,
        prev.digest_hex().into_bytes(),
        "link {} nonce is not the digest of link {}",
        next.sequence,
        prev.sequence
    );
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
