//! Copy-on-publish snapshot store
//!
//! The generator owns the only [`Publisher`]. Each publish builds a fresh,
//! immutable [`ChainSnapshot`] and swaps it into an `ArcSwap`; readers take a
//! reference with [`SnapshotStore::read`] and format from it at leisure.
//!
//! ```text
//!   Publisher (one, &mut)           SnapshotStore            readers (many)
//!   ─────────────────────   store   ┌──────────────┐   load  ───────────────
//!   build ChainSnapshot ──────────▶ │ ArcSwap<...> │ ◀────── Arc<ChainSnapshot>
//!                                   └──────────────┘
//! ```
//!
//! A reader never sees a link whose sequence, nonce, digest, and generation
//! came from different publishes: they all live in one allocation that is
//! never mutated after the swap.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;

use super::link::Link;
use crate::error::{HashletError, HashletResult};

/// Immutable, point-in-time view of the chain
#[derive(Clone, Debug)]
pub struct ChainSnapshot {
    current: Arc<Link>,
    generation: u64,
    /// Most recent links, oldest first; the last entry is `current`
    history: VecDeque<Arc<Link>>,
    /// Monotonic publish time; `Link::published_at` is only for display
    published: Instant,
}

impl ChainSnapshot {
    /// Latest published link
    #[inline]
    pub fn current(&self) -> &Link {
        &self.current
    }

    /// Shared handle to the latest link
    pub fn current_arc(&self) -> Arc<Link> {
        Arc::clone(&self.current)
    }

    /// Publish count that produced this snapshot (genesis is 0)
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Retained links, oldest first
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &Link> + ExactSizeIterator {
        self.history.iter().map(|l| l.as_ref())
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Look up a retained link by sequence number
    pub fn history_link(&self, sequence: u64) -> Option<&Link> {
        let oldest = self.history.front()?.sequence;
        let index = sequence.checked_sub(oldest)?;
        let link = self.history.get(usize::try_from(index).ok()?)?;
        debug_assert_eq!(link.sequence, sequence);
        Some(link)
    }

    /// Time since this snapshot was published, on the monotonic clock
    pub fn age(&self) -> Duration {
        self.published.elapsed()
    }

    /// Sequence range currently retained, inclusive
    pub fn history_range(&self) -> (u64, u64) {
        let oldest = self.history.front().map_or(self.current.sequence, |l| l.sequence);
        (oldest, self.current.sequence)
    }
}

/// Read side of the chain state, shared by every reader
///
/// # Concurrency Model
///
/// - `read()` is a lock-free `ArcSwap::load_full`; it never waits on the
///   generator, whatever the generator is doing.
/// - Publication is a single `ArcSwap::store` of a snapshot built off to the
///   side, so there is no window in which a half-written link is visible.
/// - History eviction happens while building the next snapshot, never in
///   place.
#[derive(Debug)]
pub struct SnapshotStore {
    published: ArcSwap<ChainSnapshot>,
    capacity: usize,
}

impl SnapshotStore {
    /// Create a store seeded with `genesis` and its single write handle
    ///
    /// `capacity` is clamped to at least 1 so the current link is always part
    /// of the history. The history grows on demand; nothing is reserved up
    /// front.
    pub fn open(genesis: Link, capacity: usize) -> (Arc<SnapshotStore>, Publisher) {
        let capacity = capacity.max(1);
        let current = Arc::new(genesis);
        let mut history = VecDeque::new();
        history.push_back(Arc::clone(&current));

        let store = Arc::new(SnapshotStore {
            published: ArcSwap::from_pointee(ChainSnapshot {
                current,
                generation: 0,
                history,
                published: Instant::now(),
            }),
            capacity,
        });
        let publisher = Publisher {
            store: Arc::clone(&store),
        };
        (store, publisher)
    }

    /// Grab the current snapshot
    #[inline]
    pub fn read(&self) -> Arc<ChainSnapshot> {
        self.published.load_full()
    }

    /// Generation of the current snapshot
    #[inline]
    pub fn generation(&self) -> u64 {
        self.published.load().generation
    }

    /// Maximum number of retained links
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Time since the last publish, on the monotonic clock
    pub fn since_last_publish(&self) -> Duration {
        self.published.load().age()
    }
}

/// The single write handle to a [`SnapshotStore`]
///
/// Not `Clone`, and `publish` takes `&mut self`: two publishes can never
/// overlap.
#[derive(Debug)]
pub struct Publisher {
    store: Arc<SnapshotStore>,
}

impl Publisher {
    /// Make `link` the current link
    ///
    /// Returns the new generation. Fails with [`HashletError::SequenceGap`],
    /// publishing nothing, unless `link` extends the current head by exactly
    /// one.
    pub fn publish(&mut self, link: Link) -> HashletResult<u64> {
        let prev = self.store.published.load_full();
        let expected = prev.current.sequence + 1;
        if link.sequence != expected {
            return Err(HashletError::SequenceGap {
                expected,
                actual: link.sequence,
            });
        }

        let current = Arc::new(link);
        let mut history = prev.history.clone();
        history.push_back(Arc::clone(&current));
        while history.len() > self.store.capacity {
            history.pop_front();
        }

        let generation = prev.generation + 1;
        self.store.published.store(Arc::new(ChainSnapshot {
            current,
            generation,
            history,
            published: Instant::now(),
        }));
        Ok(generation)
    }

    /// The store this publisher writes to
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }
}
