//! The hash chain: links, the generator, and the snapshot store readers use

pub mod generator;
pub mod link;
pub mod snapshot;
pub mod verify;

pub use generator::{ChainGenerator, ChainHandle};
pub use link::{
    encode_digest, DigestPrimitive, FixedDigest, Link, Salt, Sha256Digest, DIGEST_LEN,
    HEX_DIGEST_LEN,
};
pub use snapshot::{ChainSnapshot, Publisher, SnapshotStore};
pub use verify::{replay_from_genesis, verify_from_genesis, verify_link, verify_snapshot};
