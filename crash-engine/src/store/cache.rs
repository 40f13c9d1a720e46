//! In-memory cache implementation using moka and dashmap.
//!
//! Provides fast access to hot data without database round-trips.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         MemoryCache                                  │
//! │                                                                     │
//! │   ┌─────────────────┐  ┌─────────────────┐                         │
//! │   │  Account Cache  │  │ Total Liabilities│                        │
//! │   │  (moka, 10s)    │  │ (moka, 5s)      │                         │
//! │   └─────────────────┘  └─────────────────┘                         │
//! │                                                                     │
//! │   ┌─────────────────┐                                               │
//! │   │  Rate Limiter   │                                               │
//! │   │  (dashmap)      │                                               │
//! │   └─────────────────┘                                               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # TTL Strategy
//!
//! | Cache | TTL | Max Size | Rationale |
//! |-------|-----|----------|-----------|
//! | Accounts | 10 s | 50,000 | Write-through; short TTL just bounds staleness on a missed invalidation |
//! | Total liabilities | 5 s | 1 | Solvency Gate's warning threshold only needs near-fresh data; hard-reject path always reads through the store |
//!
//! # Rate Limiting
//!
//! Uses dashmap for high-concurrency rate limiting with sliding window:
//! - Key format: `{identifier}:{window_start}`
//! - Automatic cleanup of expired windows
//!
//! # Usage
//!
//! ```ignore
//! use crash_engine::store::MemoryCache;
//! use crash_engine::ports::Cache;
//!
//! let cache = MemoryCache::new();
//!
//! cache.set_account(&address, account);
//!
//! // Allow 100 requests per minute
//! if cache.check_rate_limit("ip:192.168.1.1", 100, 60) {
//!     // Process request
//! } else {
//!     // Return 429
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use moka::sync::Cache as MokaCache;
use tracing::debug;

use crate::ports::{Cache, CacheStats};
use crate::types::entities::Account;
use crate::types::primitives::{EthAddress, Wei};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Account cache TTL.
const ACCOUNT_TTL: Duration = Duration::from_secs(10);
/// Account cache max capacity.
const ACCOUNT_MAX_CAPACITY: u64 = 50_000;

/// Total liabilities cache TTL. Kept short: the Solvency Gate's hard-reject
/// path always reads through to `LedgerStore::total_liabilities` directly,
/// this cache only backs the cheaper warning-threshold check.
const TOTAL_LIABILITIES_TTL: Duration = Duration::from_secs(5);

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// High-performance in-memory cache using moka and dashmap.
///
/// Implements the `Cache` port trait with production-ready features:
/// - TTL-based expiration
/// - LRU eviction when capacity is reached
/// - Thread-safe concurrent access
/// - Hit/miss statistics for monitoring
///
/// # Thread Safety
///
/// All operations are thread-safe. The cache can be shared across tasks
/// via `Arc<MemoryCache>`.
#[derive(Debug)]
pub struct MemoryCache {
    /// Account cache by user address.
    accounts: MokaCache<EthAddress, Account>,

    /// Total liabilities cache (singleton, keyed by unit type).
    total_liabilities: MokaCache<(), Wei>,

    /// Rate limiter: key -> (window_start, count).
    /// Key format: `{identifier}:{window_start}`.
    rate_limits: Arc<DashMap<String, (u64, u32)>>,

    /// Cache hit counter.
    hits: AtomicU64,

    /// Cache miss counter.
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create a new memory cache with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: MokaCache::builder()
                .max_capacity(ACCOUNT_MAX_CAPACITY)
                .time_to_live(ACCOUNT_TTL)
                .build(),

            total_liabilities: MokaCache::builder()
                .max_capacity(1)
                .time_to_live(TOTAL_LIABILITIES_TTL)
                .build(),

            rate_limits: Arc::new(DashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a cache with custom TTLs for testing.
    #[must_use]
    pub fn with_ttls(account_ttl: Duration, total_liabilities_ttl: Duration) -> Self {
        Self {
            accounts: MokaCache::builder()
                .max_capacity(ACCOUNT_MAX_CAPACITY)
                .time_to_live(account_ttl)
                .build(),

            total_liabilities: MokaCache::builder()
                .max_capacity(1)
                .time_to_live(total_liabilities_ttl)
                .build(),

            rate_limits: Arc::new(DashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RATE LIMITING (Extended API)
    // ═══════════════════════════════════════════════════════════════════════════

    /// Clean up old rate limit entries.
    ///
    /// Should be called periodically (e.g., every minute) to prevent memory growth.
    ///
    /// # Returns
    ///
    /// Number of entries removed.
    pub fn cleanup_rate_limits(&self, max_age_secs: u64) -> usize {
        let now = current_timestamp();
        let cutoff = now.saturating_sub(max_age_secs);

        let before = self.rate_limits.len();
        self.rate_limits
            .retain(|_, (window_start, _)| *window_start > cutoff);
        let after = self.rate_limits.len();

        let removed = before.saturating_sub(after);
        if removed > 0 {
            debug!(removed, "Cleaned up rate limit entries");
        }
        removed
    }

    /// Get the number of rate limit entries (for monitoring).
    #[must_use]
    pub fn rate_limit_entry_count(&self) -> usize {
        self.rate_limits.len()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CACHE MAINTENANCE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run pending cache maintenance tasks.
    ///
    /// Moka performs maintenance lazily; this forces it to run immediately.
    /// Useful for tests or before taking memory measurements.
    pub fn run_pending_tasks(&self) {
        self.accounts.run_pending_tasks();
        self.total_liabilities.run_pending_tasks();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE TRAIT IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

impl Cache for MemoryCache {
    fn get_account(&self, user_id: &EthAddress) -> Option<Account> {
        match self.accounts.get(user_id) {
            Some(account) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(account)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn set_account(&self, user_id: &EthAddress, account: Account) {
        self.accounts.insert(*user_id, account);
        debug!(%user_id, "Cached account");
    }

    fn invalidate_account(&self, user_id: &EthAddress) {
        self.accounts.invalidate(user_id);
        debug!(%user_id, "Invalidated account cache");
    }

    fn invalidate_all_accounts(&self) {
        self.accounts.invalidate_all();
        debug!("Invalidated all account cache");
    }

    fn get_total_liabilities(&self) -> Option<Wei> {
        let result = self.total_liabilities.get(&());
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn set_total_liabilities(&self, total: Wei) {
        self.total_liabilities.insert((), total);
        debug!("Cached total liabilities");
    }

    fn check_rate_limit(&self, key: &str, limit: u32, window_secs: u64) -> bool {
        let now = current_timestamp();
        let window_start = now - (now % window_secs);
        let cache_key = format!("{key}:{window_start}");

        let mut entry = self
            .rate_limits
            .entry(cache_key)
            .or_insert((window_start, 0));

        if entry.0 != window_start {
            // New window started
            *entry = (window_start, 1);
            true
        } else if entry.1 < limit {
            entry.1 += 1;
            true
        } else {
            false
        }
    }

    fn get_rate_limit_remaining(&self, key: &str, limit: u32, window_secs: u64) -> Option<u32> {
        let now = current_timestamp();
        let window_start = now - (now % window_secs);
        let cache_key = format!("{key}:{window_start}");

        self.rate_limits.get(&cache_key).map(|entry| {
            if entry.0 == window_start {
                limit.saturating_sub(entry.1)
            } else {
                limit // Window expired, full quota available
            }
        })
    }

    fn clear_all(&self) {
        self.accounts.invalidate_all();
        self.total_liabilities.invalidate_all();
        self.rate_limits.clear();

        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);

        debug!("Cleared all caches");
    }

    fn stats(&self) -> CacheStats {
        // entry_count() returns u64; truncation to usize is fine since the
        // cache has a max capacity of 50K entries.
        #[allow(clippy::cast_possible_truncation)]
        let account_count = self.accounts.entry_count() as usize;

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            account_count,
            has_total_liabilities: self.total_liabilities.get(&()).is_some(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Get current Unix timestamp in seconds.
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::thread::sleep;

    use super::*;

    fn sample_address() -> EthAddress {
        EthAddress::from_hex("0x1234567890123456789012345678901234567890").unwrap()
    }

    fn other_address() -> EthAddress {
        EthAddress::from_hex("0xabcdef0123456789abcdef0123456789abcdef01").unwrap()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACCOUNT CACHE TESTS
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn account_cache_hit() {
        let cache = MemoryCache::new();
        let addr = sample_address();
        let account = Account::empty(addr);

        cache.set_account(&addr, account.clone());

        let result = cache.get_account(&addr);
        assert!(result.is_some());
        assert_eq!(result.unwrap(), account);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn account_cache_miss() {
        let cache = MemoryCache::new();
        let addr = sample_address();

        let result = cache.get_account(&addr);
        assert!(result.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn account_invalidate() {
        let cache = MemoryCache::new();
        let addr = sample_address();

        cache.set_account(&addr, Account::empty(addr));
        cache.invalidate_account(&addr);

        let result = cache.get_account(&addr);
        assert!(result.is_none());
    }

    #[test]
    fn account_invalidate_all() {
        let cache = MemoryCache::new();
        let addr1 = sample_address();
        let addr2 = other_address();

        cache.set_account(&addr1, Account::empty(addr1));
        cache.set_account(&addr2, Account::empty(addr2));

        cache.run_pending_tasks();
        assert_eq!(cache.stats().account_count, 2);

        cache.invalidate_all_accounts();
        cache.run_pending_tasks();

        assert_eq!(cache.stats().account_count, 0);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TOTAL LIABILITIES CACHE TESTS
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn total_liabilities_cache_hit() {
        let cache = MemoryCache::new();
        cache.set_total_liabilities(Wei::from_u128(1_000_000));

        let result = cache.get_total_liabilities();
        assert_eq!(result, Some(Wei::from_u128(1_000_000)));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert!(stats.has_total_liabilities);
    }

    #[test]
    fn total_liabilities_cache_miss() {
        let cache = MemoryCache::new();

        let result = cache.get_total_liabilities();
        assert!(result.is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert!(!stats.has_total_liabilities);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RATE LIMITING TESTS
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn rate_limit_basic() {
        let cache = MemoryCache::new();

        assert!(cache.check_rate_limit("test_key", 3, 60));
        assert!(cache.check_rate_limit("test_key", 3, 60));
        assert!(cache.check_rate_limit("test_key", 3, 60));

        assert!(!cache.check_rate_limit("test_key", 3, 60));
    }

    #[test]
    fn rate_limit_separate_keys() {
        let cache = MemoryCache::new();

        assert!(cache.check_rate_limit("key1", 1, 60));
        assert!(!cache.check_rate_limit("key1", 1, 60));

        assert!(cache.check_rate_limit("key2", 1, 60));
    }

    #[test]
    fn rate_limit_remaining() {
        let cache = MemoryCache::new();

        assert!(cache.get_rate_limit_remaining("new_key", 5, 60).is_none());

        cache.check_rate_limit("new_key", 5, 60);
        cache.check_rate_limit("new_key", 5, 60);

        let remaining = cache.get_rate_limit_remaining("new_key", 5, 60);
        assert_eq!(remaining, Some(3));
    }

    #[test]
    fn rate_limit_cleanup() {
        let cache = MemoryCache::new();

        cache.check_rate_limit("key1", 10, 60);
        cache.check_rate_limit("key2", 10, 60);

        assert!(cache.rate_limit_entry_count() >= 2);

        let removed = cache.cleanup_rate_limits(0);
        assert!(removed >= 2);
        assert_eq!(cache.rate_limit_entry_count(), 0);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CLEAR ALL TESTS
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn clear_all() {
        let cache = MemoryCache::new();

        cache.set_account(&sample_address(), Account::empty(sample_address()));
        cache.set_total_liabilities(Wei::from_u128(42));
        cache.check_rate_limit("test", 10, 60);

        cache.get_account(&sample_address());
        cache.get_total_liabilities();

        cache.clear_all();
        cache.run_pending_tasks();

        let stats = cache.stats();
        assert_eq!(stats.account_count, 0);
        assert!(!stats.has_total_liabilities);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);

        assert_eq!(cache.rate_limit_entry_count(), 0);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TTL TESTS
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn account_ttl_expiration() {
        let cache = MemoryCache::with_ttls(Duration::from_millis(100), Duration::from_secs(60));

        let addr = sample_address();
        cache.set_account(&addr, Account::empty(addr));

        assert!(cache.get_account(&addr).is_some());

        sleep(Duration::from_millis(150));
        cache.run_pending_tasks();

        assert!(cache.get_account(&addr).is_none());
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // HIT RATE TESTS
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn hit_rate_calculation() {
        let cache = MemoryCache::new();
        let addr = sample_address();

        cache.set_account(&addr, Account::empty(addr));

        cache.get_account(&addr);
        cache.get_account(&addr);
        cache.get_account(&addr);

        cache.get_account(&other_address());

        let stats = cache.stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
    }
}
