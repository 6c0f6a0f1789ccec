//! Freshness contracts for cached listings.
//!
//! Every address maps to exactly one [`Freshness`]. A listing is served from
//! cache only while it satisfies that contract.

use std::time::Duration;

use dandidav_core::LogicalAddress;
use tokio::time::Instant;

use super::read_through::CacheConfig;

/// How long a cached listing may be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The listing can never change; cached for the process lifetime.
    Immutable,

    /// The listing may change upstream and is refetched once older than
    /// `ttl`.
    Volatile {
        /// Maximum age of a served listing.
        ttl: Duration,
    },
}

impl Freshness {
    /// Freshness contract for the listing at `address`.
    pub fn for_address(address: &LogicalAddress, config: &CacheConfig) -> Self {
        if address.is_volatile() {
            Self::Volatile {
                ttl: config.volatile_ttl,
            }
        } else {
            Self::Immutable
        }
    }

    /// Whether a listing cached at `cached_at` may still be served at `now`.
    pub fn is_fresh(&self, cached_at: Instant, now: Instant) -> bool {
        match self {
            Self::Immutable => true,
            Self::Volatile { ttl } => now.saturating_duration_since(cached_at) < *ttl,
        }
    }
}

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    cached_at: Instant,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// A read served from a stored slot.
    pub fn from_cache(value: T, cached_at: Instant) -> Self {
        Self {
            value,
            cached_at,
            was_cache_hit: true,
        }
    }

    /// A read that fetched from the archive, directly or by waiting on
    /// another caller's fetch.
    pub fn from_fetch(value: T) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            was_cache_hit: false,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Time elapsed since the value was fetched.
    pub fn staleness(&self) -> Duration {
        Instant::now().saturating_duration_since(self.cached_at)
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }
}
