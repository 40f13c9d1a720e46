//! Domain entities for database persistence.
//!
//! These structs represent the application's core domain objects that are
//! persisted to the database. They differ from events in that they represent
//! current state (or an append-only fact) rather than a message broadcast to
//! clients.

use std::collections::BTreeMap;

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{BetStatus, OpType, RoundStatus};
use super::primitives::{BlockNumber, ClientId, EthAddress, Ppm, Wei};

// ═══════════════════════════════════════════════════════════════════════════════
// ACCOUNT
// ═══════════════════════════════════════════════════════════════════════════════

/// A user's ledger account.
///
/// `available` funds can be wagered or withdrawn; `locked` funds are staked
/// on an active bet and cannot be touched until the bet settles. Mutated
/// only through Ledger Core's RPCs (`deposit`, `lock_bet`, `settle_win`,
/// `settle_lose`, `withdraw`, `adjustment`), never written to directly by
/// callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Canonical account key — the user's wallet address.
    pub user_id: EthAddress,
    /// Funds that can be wagered or withdrawn.
    pub available: Wei,
    /// Funds staked on an active bet.
    pub locked: Wei,
    /// Optimistic concurrency version. Strictly increases on every
    /// successful mutation (invariant I4).
    pub version: u64,
}

impl Account {
    /// A fresh, zero-balance account for a user who has never deposited.
    #[must_use]
    pub const fn empty(user_id: EthAddress) -> Self {
        Self {
            user_id,
            available: Wei::ZERO,
            locked: Wei::ZERO,
            version: 0,
        }
    }

    /// Total funds (available + locked). Never negative by invariant I1.
    #[must_use]
    pub fn total(&self) -> Wei {
        self.available.saturating_add(self.locked)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEDGER ENTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// An append-only fact recording one ledger mutation.
///
/// Idempotent on `reference.client_id` (or, for deposits, on
/// `reference.tx_hash` + `reference.log_index`): a retried request that
/// matches a prior entry's reference is a no-op, never a second mutation
/// (invariant I3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique identifier.
    pub id: Uuid,
    /// Account this entry applies to.
    pub user_id: EthAddress,
    /// Kind of mutation.
    pub op_type: OpType,
    /// Magnitude of the mutation (always non-negative; direction is implied
    /// by `op_type`).
    pub amount: Wei,
    /// Free-form reference data used for idempotency and audit (e.g.
    /// `client_id`, `round_id`, `tx_hash`, `log_index`, `reason`).
    pub reference: BTreeMap<String, String>,
    /// When this entry was recorded.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Convenience accessor for the `client_id` reference field, if present.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.reference.get("client_id").map(String::as_str)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEPOSIT SEEN
// ═══════════════════════════════════════════════════════════════════════════════

/// Record of a single on-chain transfer observed by the Deposit Indexer.
///
/// Primary key is `(tx_hash, log_index)`, which is what makes re-scanning an
/// overlapping block range (after a shallow reorg, or on restart) safe: a
/// repeat observation simply fails the unique constraint and is treated as
/// already-processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositSeen {
    /// Transaction hash carrying the transfer.
    pub tx_hash: B256,
    /// Log index within the transaction (0 for a native-value transfer with
    /// no log, synthesized from the transaction's position in the block).
    pub log_index: u64,
    /// Block number the transfer was included in.
    pub block_number: BlockNumber,
    /// Sender address.
    pub from_address: EthAddress,
    /// Transferred amount.
    pub amount: Wei,
    /// When this deposit was credited to the user's ledger account.
    pub processed_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// INDEXER CHECKPOINT
// ═══════════════════════════════════════════════════════════════════════════════

/// Singleton row tracking Deposit Indexer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerCheckpoint {
    /// Last block number whose transfers have been scanned and credited.
    pub last_scanned_block: BlockNumber,
    /// Last block number considered finalized (beyond `REORG_BUFFER`).
    pub last_finalized_block: BlockNumber,
}

impl IndexerCheckpoint {
    /// The checkpoint for a chain that has never been scanned.
    #[must_use]
    pub const fn genesis() -> Self {
        Self {
            last_scanned_block: BlockNumber::new(0),
            last_finalized_block: BlockNumber::new(0),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUND
// ═══════════════════════════════════════════════════════════════════════════════

/// The commit triple published before a round's multiplier starts counting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCommit {
    /// `SHA256(server_seed)`, published before `server_seed` is used.
    pub commit_hash: [u8; 32],
    /// Client-supplied (or engine-generated) seed, public from the start.
    pub client_seed: String,
    /// Monotonically increasing per-seed-generation nonce.
    pub nonce: u64,
}

/// A single crash round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Monotonically increasing round identifier.
    pub id: u64,
    /// `SHA256(server_seed)`, published before betting opens.
    pub commit_hash: [u8; 32],
    /// Server seed. `None` until the round settles and it is revealed.
    pub server_seed: Option<String>,
    /// Client seed, public for the lifetime of the round.
    pub client_seed: String,
    /// Nonce used in the HMAC derivation.
    pub nonce: u64,
    /// Crash point in parts-per-million, computed (but not revealed) at
    /// commit time.
    pub crash_point_ppm: u64,
    /// Lifecycle status.
    pub status: RoundStatus,
    /// When the round entered `running_phase`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the round was fully settled.
    pub settled_at: Option<DateTime<Utc>>,
}

impl Round {
    /// Crash point as a `Ppm` value.
    #[must_use]
    pub const fn crash_point(&self) -> Ppm {
        Ppm::new(self.crash_point_ppm)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BET
// ═══════════════════════════════════════════════════════════════════════════════

/// A user's wager on a single round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    /// Round this bet applies to.
    pub round_id: u64,
    /// Bettor's wallet address.
    pub user_id: EthAddress,
    /// Amount wagered, locked in the user's account while `status` is
    /// `queued` or `active`.
    pub stake: Wei,
    /// Standing auto-cashout instruction, evaluated every tick in
    /// `running_phase`.
    pub auto_cashout_ppm: Option<u64>,
    /// Lifecycle status.
    pub status: BetStatus,
    /// Multiplier the bet was cashed out at, once known.
    pub cashout_ppm: Option<u64>,
    /// Idempotency key from the placing request.
    pub client_id: ClientId,
    /// When the bet was placed.
    pub created_at: DateTime<Utc>,
}

impl Bet {
    /// Whether this bet still has an open position (stake locked, no
    /// outcome yet).
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.status, BetStatus::Queued | BetStatus::Active)
    }

    /// Compute payout for a winning bet at the given cashout multiplier.
    #[must_use]
    pub fn payout_at(&self, cashout_ppm: u64) -> Wei {
        self.stake.scale_ppm(cashout_ppm)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_address() -> EthAddress {
        EthAddress::from_hex("0x1234567890123456789012345678901234567890").unwrap()
    }

    mod account_tests {
        use super::*;

        #[test]
        fn empty_account_has_zero_total() {
            let account = Account::empty(sample_address());
            assert!(account.total().is_zero());
        }

        #[test]
        fn total_sums_available_and_locked() {
            let account = Account {
                user_id: sample_address(),
                available: Wei::from_u128(100),
                locked: Wei::from_u128(50),
                version: 3,
            };
            assert_eq!(account.total(), Wei::from_u128(150));
        }
    }

    mod bet_tests {
        use super::*;

        fn open_bet() -> Bet {
            Bet {
                round_id: 1,
                user_id: sample_address(),
                stake: Wei::from_u128(1_000_000_000_000_000_000),
                auto_cashout_ppm: None,
                status: BetStatus::Active,
                cashout_ppm: None,
                client_id: ClientId::new("c-1").unwrap(),
                created_at: Utc::now(),
            }
        }

        #[test]
        fn is_open_for_active_and_queued() {
            let mut bet = open_bet();
            assert!(bet.is_open());
            bet.status = BetStatus::Queued;
            assert!(bet.is_open());
            bet.status = BetStatus::Won;
            assert!(!bet.is_open());
        }

        #[test]
        fn payout_doubles_at_two_x() {
            let bet = open_bet();
            let payout = bet.payout_at(Ppm::from_f64(2.0).raw());
            assert_eq!(payout, Wei::from_u128(2_000_000_000_000_000_000));
        }
    }

    mod checkpoint_tests {
        use super::*;

        #[test]
        fn genesis_is_zero() {
            let cp = IndexerCheckpoint::genesis();
            assert_eq!(cp.last_scanned_block.get(), 0);
            assert_eq!(cp.last_finalized_block.get(), 0);
        }
    }
}
