//! Caching port for in-memory data access.
//!
//! Defines the contract for caching frequently accessed data
//! to reduce database load and improve response times.

use crate::types::entities::Account;
use crate::types::primitives::{EthAddress, Wei};

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for in-memory caching.
///
/// Provides fast access to frequently queried data:
/// - Accounts (by user address), used by the bet/cashout API's balance
///   checks so hot reads don't all go to Postgres
/// - The Solvency Gate's total-liabilities aggregate
/// - Rate limiting counters
///
/// # Cache Invalidation
///
/// The cache uses a write-through pattern:
/// 1. Writes go to the ledger store first
/// 2. On success, cache is updated (or invalidated, forcing a re-read)
/// 3. On cache miss, the store is queried
///
/// # Implementation Notes
///
/// Implementations should:
/// - Use short TTL-based expiration for the liabilities aggregate (it
///   only needs to be approximately fresh for the solvency gate's warning
///   threshold, never for the hard-reject threshold — that always reads
///   through)
/// - Use LRU eviction for accounts
/// - Be thread-safe (this trait requires `Send + Sync`)
pub trait Cache: Send + Sync {
    /// Get a cached account.
    ///
    /// Returns `None` on cache miss.
    fn get_account(&self, user_id: &EthAddress) -> Option<Account>;

    /// Cache an account.
    fn set_account(&self, user_id: &EthAddress, account: Account);

    /// Invalidate a cached account.
    ///
    /// Call after every successful `LedgerStore::apply_entry`.
    fn invalidate_account(&self, user_id: &EthAddress);

    /// Invalidate all cached accounts.
    ///
    /// Call after bulk updates or reorg rollback.
    fn invalidate_all_accounts(&self);

    /// Get the cached total-liabilities aggregate.
    ///
    /// Returns `None` on cache miss or TTL expiration.
    fn get_total_liabilities(&self) -> Option<Wei>;

    /// Cache the total-liabilities aggregate.
    fn set_total_liabilities(&self, total: Wei);

    /// Check rate limit and record attempt.
    ///
    /// Returns `true` if the request is allowed (under limit).
    /// Returns `false` if rate limited.
    ///
    /// # Arguments
    ///
    /// * `key` - Rate limit key (e.g., IP address, user ID)
    /// * `limit` - Maximum requests allowed
    /// * `window_secs` - Time window in seconds
    ///
    /// # Example
    ///
    /// ```ignore
    /// // Allow 100 requests per minute
    /// if cache.check_rate_limit("user:123", 100, 60) {
    ///     // Process request
    /// } else {
    ///     // Return 429 Too Many Requests
    /// }
    /// ```
    fn check_rate_limit(&self, key: &str, limit: u32, window_secs: u64) -> bool;

    /// Get remaining rate limit quota.
    ///
    /// Returns `None` if key hasn't been seen.
    fn get_rate_limit_remaining(&self, key: &str, limit: u32, window_secs: u64) -> Option<u32>;

    /// Clear all cached data.
    ///
    /// Use sparingly - typically after reorg rollback.
    fn clear_all(&self);

    /// Get cache statistics for monitoring.
    fn stats(&self) -> CacheStats;
}

impl<T: Cache + ?Sized> Cache for std::sync::Arc<T> {
    fn get_account(&self, user_id: &EthAddress) -> Option<Account> {
        (**self).get_account(user_id)
    }

    fn set_account(&self, user_id: &EthAddress, account: Account) {
        (**self).set_account(user_id, account);
    }

    fn invalidate_account(&self, user_id: &EthAddress) {
        (**self).invalidate_account(user_id);
    }

    fn invalidate_all_accounts(&self) {
        (**self).invalidate_all_accounts();
    }

    fn get_total_liabilities(&self) -> Option<Wei> {
        (**self).get_total_liabilities()
    }

    fn set_total_liabilities(&self, total: Wei) {
        (**self).set_total_liabilities(total);
    }

    fn check_rate_limit(&self, key: &str, limit: u32, window_secs: u64) -> bool {
        (**self).check_rate_limit(key, limit, window_secs)
    }

    fn get_rate_limit_remaining(&self, key: &str, limit: u32, window_secs: u64) -> Option<u32> {
        (**self).get_rate_limit_remaining(key, limit, window_secs)
    }

    fn clear_all(&self) {
        (**self).clear_all();
    }

    fn stats(&self) -> CacheStats {
        (**self).stats()
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of cached accounts.
    pub account_count: usize,
    /// Whether the total-liabilities aggregate is cached.
    pub has_total_liabilities: bool,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    #[must_use]
    /// Calculate the cache hit rate as a percentage.
    ///
    /// Precision loss in f64 conversion is acceptable for statistics.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[allow(
    clippy::expect_used,              // Test-only code; panicking on lock poison is acceptable
    clippy::significant_drop_tightening, // Lock patterns are clear in test code
    clippy::clone_on_copy             // Explicit clones are fine in tests
)]
pub mod mocks {
    //! Mock implementations for testing.

    use std::collections::HashMap;
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::{Account, Cache, CacheStats, EthAddress, Wei};

    /// Simple in-memory cache for testing.
    #[derive(Debug, Default)]
    pub struct MockCache {
        accounts: RwLock<HashMap<EthAddress, Account>>,
        total_liabilities: RwLock<Option<Wei>>,
        rate_limits: RwLock<HashMap<String, (u32, u64)>>, // (count, window_start)
        hits: AtomicU64,
        misses: AtomicU64,
    }

    impl MockCache {
        /// Create a new mock cache.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Cache for MockCache {
        fn get_account(&self, user_id: &EthAddress) -> Option<Account> {
            let accounts = self.accounts.read().expect("lock poisoned");
            match accounts.get(user_id) {
                Some(account) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(account.clone())
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
        }

        fn set_account(&self, user_id: &EthAddress, account: Account) {
            let mut accounts = self.accounts.write().expect("lock poisoned");
            accounts.insert(*user_id, account);
        }

        fn invalidate_account(&self, user_id: &EthAddress) {
            let mut accounts = self.accounts.write().expect("lock poisoned");
            accounts.remove(user_id);
        }

        fn invalidate_all_accounts(&self) {
            let mut accounts = self.accounts.write().expect("lock poisoned");
            accounts.clear();
        }

        fn get_total_liabilities(&self) -> Option<Wei> {
            let total = self.total_liabilities.read().expect("lock poisoned");
            if total.is_some() {
                self.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
            *total
        }

        fn set_total_liabilities(&self, total: Wei) {
            let mut cached = self.total_liabilities.write().expect("lock poisoned");
            *cached = Some(total);
        }

        fn check_rate_limit(&self, key: &str, limit: u32, window_secs: u64) -> bool {
            let mut limits = self.rate_limits.write().expect("lock poisoned");
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time went backwards")
                .as_secs();

            let (count, window_start) = limits.entry(key.to_string()).or_insert((0, now));

            // Reset if window expired
            if now - *window_start >= window_secs {
                *count = 0;
                *window_start = now;
            }

            if *count < limit {
                *count += 1;
                true
            } else {
                false
            }
        }

        fn get_rate_limit_remaining(&self, key: &str, limit: u32, window_secs: u64) -> Option<u32> {
            let limits = self.rate_limits.read().expect("lock poisoned");
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time went backwards")
                .as_secs();

            limits.get(key).map(|(count, window_start)| {
                if now - *window_start >= window_secs {
                    limit // Window expired, full quota available
                } else {
                    limit.saturating_sub(*count)
                }
            })
        }

        fn clear_all(&self) {
            self.accounts.write().expect("lock poisoned").clear();
            *self.total_liabilities.write().expect("lock poisoned") = None;
            self.rate_limits.write().expect("lock poisoned").clear();
        }

        fn stats(&self) -> CacheStats {
            CacheStats {
                hits: self.hits.load(Ordering::Relaxed),
                misses: self.misses.load(Ordering::Relaxed),
                account_count: self.accounts.read().expect("lock poisoned").len(),
                has_total_liabilities: self.total_liabilities.read().expect("lock poisoned").is_some(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockCache;
    use super::*;

    #[test]
    fn cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            account_count: 10,
            has_total_liabilities: true,
        };
        assert!((stats.hit_rate() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cache_stats_hit_rate_zero() {
        let stats = CacheStats::default();
        assert!((stats.hit_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn mock_cache_rate_limit() {
        let cache = MockCache::new();

        // Should allow up to 3 requests
        assert!(cache.check_rate_limit("test", 3, 60));
        assert!(cache.check_rate_limit("test", 3, 60));
        assert!(cache.check_rate_limit("test", 3, 60));

        // 4th should be rate limited
        assert!(!cache.check_rate_limit("test", 3, 60));
    }

    #[test]
    fn mock_cache_account_roundtrip() {
        let cache = MockCache::new();
        let user_id = EthAddress::from_hex("0x1234567890123456789012345678901234567890")
            .expect("valid address");
        assert!(cache.get_account(&user_id).is_none());

        cache.set_account(&user_id, Account::empty(user_id));
        assert!(cache.get_account(&user_id).is_some());

        cache.invalidate_account(&user_id);
        assert!(cache.get_account(&user_id).is_none());
    }
}
