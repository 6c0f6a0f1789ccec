//! In-memory listing cache with explicit freshness.
//!
//! Listings are keyed by [`LogicalAddress`](dandidav_core::LogicalAddress).
//! Whether a cached listing may still be served is decided by its
//! [`Freshness`]: listings inside a published version never go stale, every
//! other listing expires after the configured volatile TTL.
//!
//! Concurrent misses on the same address are coalesced into a single archive
//! fetch; every waiting caller receives the same result, success or error.
//! Errors are never stored.
//!
//! # Example
//!
//! ```ignore
//! let cache = ReadThroughCache::new(CacheConfig::new().with_volatile_ttl(ttl));
//! let read = cache.get_or_fetch(&address, || fetch_listing(&address)).await?;
//! if read.was_cache_hit() {
//!     tracing::debug!(staleness = ?read.staleness(), "served from cache");
//! }
//! ```

pub mod freshness;
pub mod read_through;
pub mod stats;

pub use freshness::{CacheRead, Freshness};
pub use read_through::{CacheConfig, Listing, ReadThroughCache};
pub use stats::CacheStats;
