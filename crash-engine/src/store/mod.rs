//! Data persistence and caching adapters (implementations of the store
//! and cache ports).
//!
//! This module provides concrete implementations of the ports defined in
//! [`crate::ports`]. The primary persistence implementation uses
//! `PostgreSQL`; the caching layer sits in front of it using `moka` and
//! `dashmap`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Store Adapters                            │
//! │                                                                 │
//! │   ┌──────────────────────────────────────────────────────────┐  │
//! │   │                  PostgresStore                            │  │
//! │   │   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐   │  │
//! │   │   │    Ledger    │  │    Rounds    │  │     Bets     │   │  │
//! │   │   └──────────────┘  └──────────────┘  └──────────────┘   │  │
//! │   │   ┌──────────────┐  ┌──────────────────────────────┐     │  │
//! │   │   │   Deposits   │  │      IndexerCheckpoint        │     │  │
//! │   │   └──────────────┘  └──────────────────────────────┘     │  │
//! │   └──────────────────────────────────────────────────────────┘  │
//! │                               │                                  │
//! │                               ▼                                  │
//! │   ┌──────────────────────────────────────────────────────────┐  │
//! │   │              SQLx Connection Pool (PostgreSQL)            │  │
//! │   └──────────────────────────────────────────────────────────┘  │
//! │                                                                 │
//! │   ┌──────────────────────────────────────────────────────────┐  │
//! │   │                     MemoryCache                           │  │
//! │   │   accounts (moka) · total_liabilities (moka) · rate limits│  │
//! │   │                       (dashmap)                            │  │
//! │   └──────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use crash_engine::store::{PostgresStore, MemoryCache};
//! use sqlx::postgres::PgPoolOptions;
//!
//! let pool = PgPoolOptions::new()
//!     .max_connections(10)
//!     .connect("postgres://localhost/crash")
//!     .await?;
//!
//! let store = PostgresStore::new(pool);
//! store.run_migrations().await?;
//!
//! let cache = MemoryCache::new();
//! ```
//!
//! # Migrations
//!
//! Migrations live in `migrations/` at the workspace root and run via
//! `sqlx::migrate!` during `PostgresStore::run_migrations`.

mod cache;
mod postgres;

pub use cache::MemoryCache;
pub use postgres::PostgresStore;

// Re-export commonly used types for convenience
pub use sqlx::postgres::PgPool;
