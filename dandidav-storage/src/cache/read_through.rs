//! Read-through listing cache with single-flight fetches.
//!
//! Each address owns one slot in a sharded map. A slot is either a stored
//! listing or a fetch in progress. The map lock is held only while a slot is
//! inspected or replaced, never across an `.await`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dandidav_core::{Entry, LogicalAddress, ProviderError};
use dashmap::mapref::entry::Entry as SlotEntry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::freshness::{CacheRead, Freshness};
use super::stats::CacheStats;

/// An ordered, shared, immutable listing.
pub type Listing = Arc<[Entry]>;

type Outcome = Option<Result<Listing, ProviderError>>;

/// Configuration for the read-through cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of listings that can change upstream.
    pub volatile_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            volatile_ttl: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the volatile listing TTL.
    pub fn with_volatile_ttl(mut self, ttl: Duration) -> Self {
        self.volatile_ttl = ttl;
        self
    }
}

enum Slot {
    Ready { listing: Listing, cached_at: Instant },
    InFlight(watch::Receiver<Outcome>),
}

enum Claim {
    Hit(Listing, Instant),
    Follow(watch::Receiver<Outcome>),
    Lead(watch::Sender<Outcome>),
}

/// Removes an in-flight slot if the leading fetch is dropped before it
/// publishes, so later callers start a new fetch.
struct InFlightGuard<'a> {
    slots: &'a DashMap<LogicalAddress, Slot>,
    address: &'a LogicalAddress,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slots
                .remove_if(self.address, |_, slot| matches!(slot, Slot::InFlight(_)));
        }
    }
}

/// Process-wide listing cache.
///
/// Construct one per provider; tests get a fresh, empty instance each time.
pub struct ReadThroughCache {
    slots: DashMap<LogicalAddress, Slot>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

impl ReadThroughCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            slots: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the listing at `address`, running `fetch` on a miss.
    ///
    /// At most one `fetch` per address is in progress at any time. Callers
    /// arriving while it runs wait for its outcome instead of fetching
    /// themselves. A failed fetch leaves the slot empty.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        address: &LogicalAddress,
        fetch: F,
    ) -> Result<CacheRead<Listing>, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Entry>, ProviderError>>,
    {
        let freshness = Freshness::for_address(address, &self.config);

        let sender = loop {
            match self.claim(address, freshness) {
                Claim::Hit(listing, cached_at) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    let read = CacheRead::from_cache(listing, cached_at);
                    debug!(%address, staleness = ?read.staleness(), "listing cache hit");
                    return Ok(read);
                }
                Claim::Follow(mut receiver) => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(%address, "joining in-flight listing fetch");
                    let outcome = match receiver.wait_for(Option::is_some).await {
                        Ok(outcome) => (*outcome).clone(),
                        Err(_) => None,
                    };
                    if let Some(result) = outcome {
                        return result.map(CacheRead::from_fetch);
                    }
                    // The leader was cancelled; try again.
                }
                Claim::Lead(sender) => break sender,
            }
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(%address, "listing cache miss");

        let mut guard = InFlightGuard {
            slots: &self.slots,
            address,
            armed: true,
        };
        let result: Result<Listing, ProviderError> = fetch().await.map(Listing::from);

        match &result {
            Ok(listing) => {
                self.slots.insert(
                    address.clone(),
                    Slot::Ready {
                        listing: Arc::clone(listing),
                        cached_at: Instant::now(),
                    },
                );
            }
            Err(_) => {
                self.slots.remove(address);
            }
        }
        guard.armed = false;
        sender.send_replace(Some(result.clone()));

        result.map(CacheRead::from_fetch)
    }

    /// Inspect the slot for `address` and decide this caller's role.
    fn claim(&self, address: &LogicalAddress, freshness: Freshness) -> Claim {
        match self.slots.entry(address.clone()) {
            SlotEntry::Occupied(mut occupied) => {
                match occupied.get() {
                    Slot::Ready { listing, cached_at }
                        if freshness.is_fresh(*cached_at, Instant::now()) =>
                    {
                        return Claim::Hit(Arc::clone(listing), *cached_at);
                    }
                    Slot::InFlight(receiver) => return Claim::Follow(receiver.clone()),
                    Slot::Ready { .. } => {}
                }
                debug!(%address, "cached listing expired");
                let (sender, receiver) = watch::channel(None);
                occupied.insert(Slot::InFlight(receiver));
                Claim::Lead(sender)
            }
            SlotEntry::Vacant(vacant) => {
                let (sender, receiver) = watch::channel(None);
                vacant.insert(Slot::InFlight(receiver));
                Claim::Lead(sender)
            }
        }
    }

    /// Number of stored listings, excluding fetches in progress.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Ready { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
        }
    }
}

impl Default for ReadThroughCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}
