//! Storage port traits for data persistence.
//!
//! These traits define the contract for persisting and retrieving
//! domain entities. Infrastructure adapters implement these traits
//! using concrete storage backends (e.g., PostgreSQL, SQLite).

use alloy::primitives::B256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::entities::{Account, Bet, DepositSeen, IndexerCheckpoint, LedgerEntry, Round};
use crate::types::enums::{BetStatus, RoundStatus};
use crate::types::primitives::{BlockNumber, EthAddress, Wei};

// ═══════════════════════════════════════════════════════════════════════════════
// LEDGER STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for ledger persistence operations.
///
/// Backs Ledger Core (C3). Every mutating method is expected to be
/// implemented as a single atomic transaction: read the account row with a
/// row lock, check the expected `version`, write the new balances, and
/// append the `LedgerEntry` fact — all or nothing. This is what makes
/// invariant I4 (no lost updates under concurrent mutation of the same
/// account) and invariant I3 (idempotent replay) hold.
///
/// # Implementation Notes
///
/// Implementations should:
/// - Enforce a unique constraint on `ledger_entries.reference->>'client_id'`
///   scoped to `user_id` (and a separate one on `(tx_hash, log_index)` for
///   deposits) so a retried request is caught by the database itself, not
///   just by a prior check-then-act read.
/// - Use `SELECT ... FOR UPDATE` (or equivalent) on the account row during
///   `apply_entry` so two concurrent mutations on the same account
///   serialize rather than race.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Get an account by user id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_account(&self, user_id: &EthAddress) -> Result<Option<Account>>;

    /// Get an account, creating an empty one if it doesn't exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_or_create_account(&self, user_id: &EthAddress) -> Result<Account>;

    /// Atomically apply a ledger mutation: write the account's new
    /// balances (conditioned on `account.version`), append `entry`, and
    /// return the account's new state with `version` incremented.
    ///
    /// Implementations must reject the write (returning
    /// `DomainError::Contention`) if the stored account's version no
    /// longer matches `account.version`, so callers can retry with a fresh
    /// read.
    ///
    /// # Errors
    ///
    /// Returns an error if the version check fails, if a unique
    /// constraint on `entry`'s reference is violated by a genuinely
    /// different entry, or if the database operation fails.
    async fn apply_entry(&self, account: &Account, entry: &LedgerEntry) -> Result<Account>;

    /// Look up a previously recorded entry by its `client_id` reference,
    /// for idempotency checks before `apply_entry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn find_entry_by_client_id(
        &self,
        user_id: &EthAddress,
        client_id: &str,
    ) -> Result<Option<LedgerEntry>>;

    /// Look up a previously recorded deposit entry by its on-chain
    /// reference, for idempotency checks before crediting a transfer.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn find_deposit_entry(
        &self,
        tx_hash: B256,
        log_index: u64,
    ) -> Result<Option<LedgerEntry>>;

    /// Sum of `available + locked` across every account. Used by the
    /// Solvency Gate (C4) to compute total user liabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn total_liabilities(&self) -> Result<Wei>;

    /// Get recent ledger entries for a user, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_entries_for_user(&self, user_id: &EthAddress, limit: u32) -> Result<Vec<LedgerEntry>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUND STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for round persistence.
///
/// Backs the Round Engine (C5). A round's `server_seed` is written once,
/// at settlement, never before: storing it earlier would defeat the
/// commit/reveal scheme.
#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Allocate the next monotonically increasing round id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn next_round_id(&self) -> Result<u64>;

    /// Persist a newly committed round (status `pending`).
    ///
    /// # Errors
    ///
    /// Returns an error if a round with this id already exists or the
    /// database operation fails.
    async fn save_round(&self, round: &Round) -> Result<()>;

    /// Transition a round's status.
    ///
    /// # Errors
    ///
    /// Returns an error if the round doesn't exist or the database
    /// operation fails.
    async fn update_round_status(&self, round_id: u64, status: RoundStatus) -> Result<()>;

    /// Reveal a round's server seed and mark it settled.
    ///
    /// # Errors
    ///
    /// Returns an error if the round doesn't exist, is not in `running`
    /// status, or the database operation fails.
    async fn reveal_round(
        &self,
        round_id: u64,
        server_seed: &str,
        settled_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Get a round by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_round(&self, round_id: u64) -> Result<Option<Round>>;

    /// Get recent rounds, most recent first (used for the crash history
    /// feed and `GET /rounds/recent`).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_recent_rounds(&self, limit: u32) -> Result<Vec<Round>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// BET STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for bet persistence.
///
/// Backs bet placement, the live betting table, and cashout arbitration.
#[async_trait]
pub trait BetStore: Send + Sync {
    /// Record a newly placed bet.
    ///
    /// # Errors
    ///
    /// Returns an error if a bet already exists for `(round_id, user_id)`
    /// or the database operation fails.
    async fn place_bet(&self, bet: &Bet) -> Result<()>;

    /// Get a user's bet on a round, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_bet(&self, round_id: u64, user_id: &EthAddress) -> Result<Option<Bet>>;

    /// Get every bet placed on a round (for the live table and
    /// settlement).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_bets_for_round(&self, round_id: u64) -> Result<Vec<Bet>>;

    /// Update a bet's lifecycle status and, for settled bets, the
    /// multiplier it cashed out at.
    ///
    /// # Errors
    ///
    /// Returns an error if the bet doesn't exist or the database
    /// operation fails.
    async fn update_bet_status(
        &self,
        round_id: u64,
        user_id: &EthAddress,
        status: BetStatus,
        cashout_ppm: Option<u64>,
    ) -> Result<()>;

    /// Get a user's betting history, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_user_bets(&self, user_id: &EthAddress, limit: u32) -> Result<Vec<Bet>>;

    /// Look up a bet by its idempotency key, for duplicate-submission
    /// detection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn find_bet_by_client_id(&self, client_id: &str) -> Result<Option<Bet>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEPOSIT STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for deposit-observation persistence and indexer scan progress.
///
/// Backs the Deposit Indexer (C8). `record_deposit` is the idempotency
/// boundary: a repeat observation of the same `(tx_hash, log_index)` is
/// rejected by a unique constraint rather than silently re-credited.
#[async_trait]
pub trait DepositStore: Send + Sync {
    /// Record a newly observed deposit. Returns `true` if this is a new
    /// observation, `false` if `(tx_hash, log_index)` was already
    /// recorded (the caller should treat this as already-processed and
    /// skip crediting the ledger again).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails for a reason
    /// other than the duplicate-key check.
    async fn record_deposit(&self, deposit: &DepositSeen) -> Result<bool>;

    /// Look up a previously observed deposit.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_deposit(&self, tx_hash: B256, log_index: u64) -> Result<Option<DepositSeen>>;

    /// Get the indexer's current scan checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_checkpoint(&self) -> Result<IndexerCheckpoint>;

    /// Persist the indexer's scan checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn set_checkpoint(&self, checkpoint: IndexerCheckpoint) -> Result<()>;
}

