//! Chain generator and its owned background thread
//!
//! [`ChainGenerator`] holds all mutable chain state: the head link, the salt,
//! the digest primitive and the single [`Publisher`]. [`ChainHandle::spawn`]
//! moves it onto a named thread and keeps the `JoinHandle`, so shutdown can
//! join the thread and know the last publish finished.

use std::any::Any;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info, trace, warn};

use super::link::{DigestPrimitive, Link, Salt, Sha256Digest};
use super::snapshot::{Publisher, SnapshotStore};
use crate::config::ChainConfig;
use crate::error::{HashletError, HashletResult};
use crate::signal::ShutdownSignal;

/// Owns the chain and extends it one link at a time
pub struct ChainGenerator<D: DigestPrimitive = Sha256Digest> {
    digest: D,
    salt: Salt,
    head: Arc<Link>,
    publisher: Publisher,
    interval: Duration,
}

impl ChainGenerator<Sha256Digest> {
    /// Build a SHA-256 generator and publish its genesis link
    pub fn new(config: &ChainConfig) -> HashletResult<(Self, Arc<SnapshotStore>)> {
        Self::with_digest(config, Sha256Digest)
    }
}

impl<D: DigestPrimitive> ChainGenerator<D> {
    /// Build a generator over an arbitrary digest primitive
    ///
    /// The genesis link (`sequence = 0`) is computed here, so readers of the
    /// returned store see a valid chain before the first iteration runs.
    pub fn with_digest(
        config: &ChainConfig,
        digest: D,
    ) -> HashletResult<(Self, Arc<SnapshotStore>)> {
        config.validate()?;
        let salt = Salt::new(config.salt.as_bytes());
        let genesis = Link::genesis(&digest, config.initial_nonce.as_bytes(), &salt)?;
        let (store, publisher) = SnapshotStore::open(genesis, config.history_capacity);
        let head = store.read().current_arc();

        let generator = ChainGenerator {
            digest,
            salt,
            head,
            publisher,
            interval: config.interval(),
        };
        Ok((generator, store))
    }

    /// Current head link
    pub fn head(&self) -> &Link {
        &self.head
    }

    /// Store readers should query
    pub fn store(&self) -> &Arc<SnapshotStore> {
        self.publisher.store()
    }

    /// Compute and publish the next link
    ///
    /// On error nothing is published and the head is unchanged.
    pub fn step(&mut self) -> HashletResult<u64> {
        let next = self.head.successor(&self.digest, &self.salt)?;
        let generation = self.publisher.publish(next)?;
        self.head = self.publisher.store().read().current_arc();
        trace!(
            sequence = self.head.sequence,
            generation,
            digest = %self.head.digest_hex(),
            "published link"
        );
        Ok(generation)
    }

    /// Extend the chain every `interval` until `shutdown` fires
    ///
    /// Returns the sequence of the last published link. Only a fatal fault
    /// ends the loop early; the store keeps serving the last good snapshot.
    pub fn run(mut self, shutdown: &ShutdownSignal) -> HashletResult<u64> {
        info!(
            salt = ?self.salt,
            interval_ms = self.interval.as_millis() as u64,
            genesis = %self.head.digest_hex(),
            "chain generator started"
        );

        let mut last_publish = Instant::now();
        while !shutdown.wait_timeout(self.interval) {
            let lag = last_publish.elapsed();
            if lag > self.interval.saturating_mul(2) {
                warn!(lag_ms = lag.as_millis() as u64, "generator iteration ran late");
            }

            match self.step() {
                Ok(_) => last_publish = Instant::now(),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, sequence = self.head.sequence, "chain generator halted");
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "skipping iteration"),
            }
        }

        info!(sequence = self.head.sequence, "chain generator stopped");
        Ok(self.head.sequence)
    }
}

/// A running generator thread plus the store it publishes into
///
/// Dropping the handle shuts the generator down and joins it.
pub struct ChainHandle {
    store: Arc<SnapshotStore>,
    shutdown: Arc<ShutdownSignal>,
    thread: Option<JoinHandle<HashletResult<u64>>>,
    interval: Duration,
    stall_threshold: Duration,
}

impl ChainHandle {
    /// Start a SHA-256 generator for `config`
    pub fn spawn(config: &ChainConfig) -> HashletResult<ChainHandle> {
        Self::spawn_with_digest(config, Sha256Digest)
    }

    /// Start a generator over an arbitrary digest primitive
    pub fn spawn_with_digest<D: DigestPrimitive>(
        config: &ChainConfig,
        digest: D,
    ) -> HashletResult<ChainHandle> {
        let (generator, store) = ChainGenerator::with_digest(config, digest)?;
        let shutdown = Arc::new(ShutdownSignal::new());

        let thread = {
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("hashlet-generator".into())
                .spawn(move || generator.run(&shutdown))?
        };

        Ok(ChainHandle {
            store,
            shutdown,
            thread: Some(thread),
            interval: config.interval(),
            stall_threshold: config.stall_threshold(),
        })
    }

    /// Store the generator publishes into
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Whether the generator thread is still running
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Report a stall if nothing was published for too long
    ///
    /// Readers are unaffected either way; this only feeds logging.
    pub fn check_liveness(&self) -> HashletResult<()> {
        let elapsed = self.store.since_last_publish();
        if elapsed > self.stall_threshold {
            let err = HashletError::GeneratorStalled {
                elapsed,
                interval: self.interval,
            };
            warn!(error = %err, "generator liveness check failed");
            return Err(err);
        }
        Ok(())
    }

    /// Stop the generator and wait for it
    ///
    /// Returns the last published sequence, or the fault that stopped the
    /// generator early.
    pub fn shutdown(mut self) -> HashletResult<u64> {
        self.stop()
    }

    fn stop(&mut self) -> HashletResult<u64> {
        self.shutdown.trigger(0);
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|payload| {
                Err(HashletError::GeneratorPanicked(panic_message(&*payload)))
            }),
            None => Ok(self.store.read().current().sequence),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Drop for ChainHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(e) = self.stop() {
                error!(error = %e, "chain generator ended with a fault");
            }
        }
    }
}
