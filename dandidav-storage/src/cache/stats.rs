//! Cache usage counters.

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from a fresh slot.
    pub hits: u64,
    /// Reads that started an archive fetch.
    pub misses: u64,
    /// Reads that waited on another caller's fetch.
    pub coalesced: u64,
    /// Listings currently stored.
    pub entry_count: u64,
}
