//! Port definitions for dependency injection and testability.
//!
//! Ports are trait definitions that describe what the domain layer needs.
//! Following hexagonal architecture, adapters (in the infrastructure layer)
//! implement these traits to provide concrete functionality.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Domain Layer                            │
//! │                                                                 │
//! │  Uses ports (traits) to define what it needs                   │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐            │
//! │  │ LedgerStore │  │  RoundStore │  │  BetStore   │            │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘            │
//! │         │                │                │                    │
//! └─────────┼────────────────┼────────────────┼────────────────────┘
//!           │                │                │
//!           ▼                ▼                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Infrastructure Layer                        │
//! │                                                                 │
//! │  Provides adapters (implementations) for ports                 │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐            │
//! │  │PostgresStore│  │ PostgresStore│  │PostgresStore│            │
//! │  │(implements  │  │(implements  │  │(implements  │            │
//! │  │LedgerStore) │  │ RoundStore) │  │  BetStore)  │            │
//! │  └─────────────┘  └─────────────┘  └─────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Port Categories
//!
//! | Category | Ports | Purpose |
//! |----------|-------|---------|
//! | Storage | [`LedgerStore`], [`RoundStore`], [`BetStore`], [`DepositStore`] | Data persistence |
//! | Streaming | [`EventBus`] | Event fan-out to connected clients |
//! | Caching | [`Cache`] | In-memory caching |
//! | Time | [`Clock`] | Testable time operations |
//!
//! # Usage
//!
//! ```ignore
//! use crash_engine::ports::{LedgerStore, Clock, SystemClock};
//!
//! // Application code depends on traits, not implementations
//! async fn credit_deposit<S: LedgerStore, C: Clock>(
//!     store: &S,
//!     clock: &C,
//!     address: &EthAddress,
//! ) -> Result<()> {
//!     let account = store.get_or_create_account(address).await?;
//!     let now = clock.now();
//!     // ...
//!     Ok(())
//! }
//!
//! // In production, use real implementations
//! let store = PostgresStore::new(pool);
//! let clock = SystemClock;
//!
//! // In tests, use mocks
//! let store = MockLedgerStore::new();
//! let clock = FakeClock::new(fixed_time);
//! ```

mod cache;
mod chain;
mod clock;
mod store;
mod streaming;

// Re-export all port traits
pub use cache::Cache;
pub use chain::{ChainClient, ObservedTransfer};
pub use clock::{Clock, SystemClock};
pub use store::{BetStore, DepositStore, LedgerStore, RoundStore};
pub use streaming::EventBus;

#[cfg(any(test, feature = "test-utils"))]
pub use cache::mocks::MockCache;
#[cfg(any(test, feature = "test-utils"))]
pub use chain::mocks::MockChainClient;
#[cfg(any(test, feature = "test-utils"))]
pub use streaming::mocks::MockEventBus;

// Re-export test utilities for tests and downstream crates using test-utils feature
#[cfg(any(test, feature = "test-utils"))]
pub use clock::FakeClock;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ports_are_send_sync() {
        // Compile-time check that all port traits require Send + Sync
        fn assert_send_sync<T: Send + Sync>() {}

        // These would fail to compile if traits don't require Send + Sync
        fn check_ledger_store<T: LedgerStore>() {
            assert_send_sync::<T>();
        }
        fn check_round_store<T: RoundStore>() {
            assert_send_sync::<T>();
        }
        fn check_bet_store<T: BetStore>() {
            assert_send_sync::<T>();
        }
        fn check_deposit_store<T: DepositStore>() {
            assert_send_sync::<T>();
        }
        fn check_event_bus<T: EventBus>() {
            assert_send_sync::<T>();
        }
        fn check_cache<T: Cache>() {
            assert_send_sync::<T>();
        }
        fn check_clock<T: Clock>() {
            assert_send_sync::<T>();
        }
        fn check_chain_client<T: ChainClient>() {
            assert_send_sync::<T>();
        }
    }
}
