//! Domain enumerations for the crash engine.
//!
//! Each enum provides:
//! - Safe conversion from/to numeric values
//! - Database serialization via `sqlx::Type`
//! - JSON serialization via `serde`
//! - Domain-specific helper methods

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// LEDGER OP TYPE
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of a ledger mutation. See `LedgerEntry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[repr(i16)]
#[sqlx(type_name = "smallint")]
#[non_exhaustive]
pub enum OpType {
    /// Confirmed on-chain deposit credited to `available`.
    Deposit = 0,
    /// On-chain withdrawal debited from `available`.
    Withdraw = 1,
    /// Stake moved from `available` to `locked` when a bet is placed.
    BetLock = 2,
    /// Settlement of a winning bet: payout credited, stake's lock released.
    BetWin = 3,
    /// Settlement of a losing bet: locked stake is forfeited.
    BetLose = 4,
    /// Manual balance correction, always requires a `reason`.
    Adjustment = 5,
}

impl OpType {
    /// Human-readable name for display/metrics labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
            Self::BetLock => "bet_lock",
            Self::BetWin => "bet_win",
            Self::BetLose => "bet_lose",
            Self::Adjustment => "adjustment",
        }
    }

    /// Whether this op type counts toward invariant I2's global conservation
    /// sum. `BetLock` only moves funds between `available` and `locked`
    /// within one account, so it is excluded.
    #[must_use]
    pub const fn counts_toward_conservation(&self) -> bool {
        !matches!(self, Self::BetLock)
    }
}

/// Error returned when an invalid op type value is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid op type value: {0}")]
pub struct InvalidOpType(pub u8);

impl TryFrom<u8> for OpType {
    type Error = InvalidOpType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Deposit),
            1 => Ok(Self::Withdraw),
            2 => Ok(Self::BetLock),
            3 => Ok(Self::BetWin),
            4 => Ok(Self::BetLose),
            5 => Ok(Self::Adjustment),
            _ => Err(InvalidOpType(value)),
        }
    }
}

impl From<OpType> for u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from(op: OpType) -> Self {
        op as i16 as Self
    }
}

impl From<OpType> for i16 {
    fn from(op: OpType) -> Self {
        op as Self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUND STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a `Round`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[repr(i16)]
#[sqlx(type_name = "smallint")]
#[non_exhaustive]
pub enum RoundStatus {
    /// Committed but not yet running (betting phase).
    Pending = 0,
    /// Multiplier is counting up.
    Running = 1,
    /// Crashed and fully settled; `server_seed` has been revealed.
    Settled = 2,
}

impl RoundStatus {
    /// Human-readable name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Settled => "settled",
        }
    }
}

/// Error returned when an invalid round status value is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid round status value: {0}")]
pub struct InvalidRoundStatus(pub u8);

impl TryFrom<u8> for RoundStatus {
    type Error = InvalidRoundStatus;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Running),
            2 => Ok(Self::Settled),
            _ => Err(InvalidRoundStatus(value)),
        }
    }
}

impl From<RoundStatus> for u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from(status: RoundStatus) -> Self {
        status as i16 as Self
    }
}

impl From<RoundStatus> for i16 {
    fn from(status: RoundStatus) -> Self {
        status as Self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BET STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a `Bet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[repr(i16)]
#[sqlx(type_name = "smallint")]
#[non_exhaustive]
pub enum BetStatus {
    /// Placed outside betting phase; will be admitted at the next betting phase.
    Queued = 0,
    /// Admitted into the current round, stake locked.
    Active = 1,
    /// Settled as a win (cashed out, or auto-cashed below the crash point).
    Won = 2,
    /// Settled as a loss (never cashed out before the round crashed).
    Lost = 3,
}

impl BetStatus {
    /// Human-readable name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }

    /// Whether this status represents a final, settled outcome.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }
}

/// Error returned when an invalid bet status value is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid bet status value: {0}")]
pub struct InvalidBetStatus(pub u8);

impl TryFrom<u8> for BetStatus {
    type Error = InvalidBetStatus;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Queued),
            1 => Ok(Self::Active),
            2 => Ok(Self::Won),
            3 => Ok(Self::Lost),
            _ => Err(InvalidBetStatus(value)),
        }
    }
}

impl From<BetStatus> for u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from(status: BetStatus) -> Self {
        status as i16 as Self
    }
}

impl From<BetStatus> for i16 {
    fn from(status: BetStatus) -> Self {
        status as Self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUND PHASE (in-memory only — not persisted, driven by the engine clock)
// ═══════════════════════════════════════════════════════════════════════════════

/// Current phase of the live round engine.
///
/// Unlike `RoundStatus`, which tracks a single round's row in storage, this
/// tracks which part of the phase cycle the engine is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundPhase {
    /// Crash just happened; settling bets and revealing the seed.
    CashoutPhase,
    /// Bets are being accepted for the upcoming round.
    BettingPhase,
    /// The multiplier is counting up; cashouts are being arbitrated.
    RunningPhase,
}

impl RoundPhase {
    /// Human-readable name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CashoutPhase => "cashout_phase",
            Self::BettingPhase => "betting_phase",
            Self::RunningPhase => "running_phase",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
