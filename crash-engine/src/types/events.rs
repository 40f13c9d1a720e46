//! Strongly-typed events broadcast to connected clients.
//!
//! Each variant corresponds to one message the event fan-out (C6) pushes
//! over a client's WebSocket session. Events are wrapped in `EventEnvelope`
//! so every client can detect gaps and request a resume from a known
//! sequence number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::primitives::{EthAddress, Wei};

// ═══════════════════════════════════════════════════════════════════════════════
// ENVELOPE
// ═══════════════════════════════════════════════════════════════════════════════

/// Wraps every broadcast event with a monotonic sequence number.
///
/// `seq` is assigned by the fan-out bus in send order and is unique and
/// increasing for the lifetime of the process. A client that observes a gap
/// between the last `seq` it received and the next one asks for a resume
/// starting at `last_seq + 1`; if the bus can no longer supply that range it
/// answers with a `Snapshot` instead (see `ports::streaming`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Monotonic sequence number, unique for the process lifetime.
    pub seq: u64,
    /// When the event was produced.
    pub emitted_at: DateTime<Utc>,
    /// The event payload.
    pub event: GameEvent,
}

// ═══════════════════════════════════════════════════════════════════════════════
// UNIFIED EVENT ENUM
// ═══════════════════════════════════════════════════════════════════════════════

/// Unified enum for every event the round engine and ledger broadcast.
///
/// # Serialization
///
/// Events are serialized with a type tag so clients can dispatch without
/// inspecting the payload shape:
/// ```json
/// {"RoundReveal": {"round_id": 42, "server_seed": "...", ...}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
#[non_exhaustive]
pub enum GameEvent {
    // ═══════════════════════════════════════════════════════════════════════
    // ROUND LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════
    /// Betting phase opened; the round's commit hash is now public.
    StartBettingPhase(StartBettingPhaseEvent),
    /// Periodic tick counting down the remaining betting window.
    BettingCountdown(BettingCountdownEvent),
    /// The multiplier has started counting up.
    StartMultiplierCount(StartMultiplierCountEvent),
    /// The multiplier stopped: the round crashed.
    StopMultiplierCount(StopMultiplierCountEvent),
    /// The round's server seed has been revealed for independent
    /// verification.
    RoundReveal(RoundRevealEvent),
    /// Appended to the rolling history of recent crash points.
    CrashHistory(CrashHistoryEvent),

    // ═══════════════════════════════════════════════════════════════════════
    // LIVE TABLE / TICKS
    // ═══════════════════════════════════════════════════════════════════════
    /// Snapshot of every active bet in the current round, refreshed each
    /// tick while the multiplier is counting.
    LiveBettingTable(LiveBettingTableEvent),
    /// A user's available/locked balances changed.
    BalanceUpdate(BalanceUpdateEvent),

    // ═══════════════════════════════════════════════════════════════════════
    // BET LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════
    /// A bet was admitted into the current or next round.
    BetAccepted(BetAcceptedEvent),
    /// A bet was rejected.
    BetRejected(BetRejectedEvent),
    /// A cashout request was honored.
    CashoutSuccess(CashoutSuccessEvent),
    /// A cashout request could not be honored.
    CashoutError(CashoutErrorEvent),

    // ═══════════════════════════════════════════════════════════════════════
    // PAYOUTS
    // ═══════════════════════════════════════════════════════════════════════
    /// An on-chain payout transaction was confirmed.
    PayoutSuccess(PayoutSuccessEvent),
    /// An on-chain payout transaction failed or was rejected by the
    /// solvency gate.
    PayoutFailed(PayoutFailedEvent),
}

impl GameEvent {
    /// Event type name, for logging and metrics labels.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::StartBettingPhase(_) => "StartBettingPhase",
            Self::BettingCountdown(_) => "BettingCountdown",
            Self::StartMultiplierCount(_) => "StartMultiplierCount",
            Self::StopMultiplierCount(_) => "StopMultiplierCount",
            Self::RoundReveal(_) => "RoundReveal",
            Self::CrashHistory(_) => "CrashHistory",
            Self::LiveBettingTable(_) => "LiveBettingTable",
            Self::BalanceUpdate(_) => "BalanceUpdate",
            Self::BetAccepted(_) => "BetAccepted",
            Self::BetRejected(_) => "BetRejected",
            Self::CashoutSuccess(_) => "CashoutSuccess",
            Self::CashoutError(_) => "CashoutError",
            Self::PayoutSuccess(_) => "PayoutSuccess",
            Self::PayoutFailed(_) => "PayoutFailed",
        }
    }

    /// Whether this event carries information specific to one user and
    /// should therefore only be replayed to that user's session, never
    /// broadcast on the public topic.
    #[must_use]
    pub const fn is_private(&self) -> bool {
        matches!(
            self,
            Self::BalanceUpdate(_)
                | Self::BetAccepted(_)
                | Self::BetRejected(_)
                | Self::CashoutSuccess(_)
                | Self::CashoutError(_)
                | Self::PayoutSuccess(_)
                | Self::PayoutFailed(_)
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUND LIFECYCLE EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Betting phase opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartBettingPhaseEvent {
    /// Round this betting window belongs to.
    pub round_id: u64,
    /// `SHA256(server_seed)`, hex-encoded.
    pub commit_hash: String,
    /// Public client seed for this round.
    pub client_seed: String,
    /// Betting window length in milliseconds.
    pub duration_ms: u64,
}

/// Countdown tick during the betting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BettingCountdownEvent {
    /// Round this countdown belongs to.
    pub round_id: u64,
    /// Milliseconds remaining until betting closes.
    pub remaining_ms: u64,
}

/// The multiplier has started counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMultiplierCountEvent {
    /// Round now running.
    pub round_id: u64,
    /// Number of bets admitted into this round.
    pub bet_count: u32,
}

/// The round crashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopMultiplierCountEvent {
    /// Round that crashed.
    pub round_id: u64,
    /// Crash point in parts-per-million.
    pub crash_point_ppm: u64,
}

/// The round's seed has been revealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRevealEvent {
    /// Round being revealed.
    pub round_id: u64,
    /// Server seed, hex-encoded, now public.
    pub server_seed: String,
    /// Client seed used in the derivation.
    pub client_seed: String,
    /// Nonce used in the derivation.
    pub nonce: u64,
    /// Crash point in parts-per-million, independently recomputable from
    /// the above.
    pub crash_point_ppm: u64,
}

/// One entry appended to the rolling crash-point history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashHistoryEvent {
    /// Round this entry records.
    pub round_id: u64,
    /// Crash point in parts-per-million.
    pub crash_point_ppm: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIVE TABLE / BALANCE EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// One row of the live betting table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveBetRow {
    /// Bettor's wallet address.
    pub user_id: EthAddress,
    /// Amount wagered.
    pub stake: Wei,
    /// Multiplier the bet cashed out at, if already settled this round.
    pub cashout_ppm: Option<u64>,
}

/// Snapshot of every active bet in the current round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveBettingTableEvent {
    /// Round this snapshot belongs to.
    pub round_id: u64,
    /// Current multiplier in parts-per-million.
    pub current_multiplier_ppm: u64,
    /// All bets placed this round.
    pub bets: Vec<LiveBetRow>,
}

/// A user's balance changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdateEvent {
    /// Affected account.
    pub user_id: EthAddress,
    /// New available balance.
    pub available: Wei,
    /// New locked balance.
    pub locked: Wei,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BET LIFECYCLE EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// A bet was admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetAcceptedEvent {
    /// Round the bet was admitted into.
    pub round_id: u64,
    /// Bettor's wallet address.
    pub user_id: EthAddress,
    /// Amount staked.
    pub stake: Wei,
    /// Idempotency key echoed back.
    pub client_id: String,
}

/// A bet was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetRejectedEvent {
    /// Round the bet targeted, if known.
    pub round_id: Option<u64>,
    /// Bettor's wallet address.
    pub user_id: EthAddress,
    /// Idempotency key echoed back.
    pub client_id: String,
    /// Machine-readable rejection reason, e.g. `INSUFFICIENT_FUNDS`.
    pub reason: String,
}

/// A cashout was honored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashoutSuccessEvent {
    /// Round the bet was on.
    pub round_id: u64,
    /// Bettor's wallet address.
    pub user_id: EthAddress,
    /// Multiplier cashed out at, in parts-per-million.
    pub cashout_ppm: u64,
    /// Payout credited.
    pub payout: Wei,
}

/// A cashout was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashoutErrorEvent {
    /// Round the bet was on, if known.
    pub round_id: Option<u64>,
    /// Bettor's wallet address.
    pub user_id: EthAddress,
    /// Machine-readable rejection reason, e.g. `CASHOUT_TOO_LATE`.
    pub reason: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAYOUT EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// A payout transaction confirmed on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSuccessEvent {
    /// Recipient.
    pub user_id: EthAddress,
    /// Amount paid.
    pub amount: Wei,
    /// Transaction hash, hex-encoded.
    pub tx_hash: String,
}

/// A payout attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutFailedEvent {
    /// Intended recipient.
    pub user_id: EthAddress,
    /// Amount that could not be paid.
    pub amount: Wei,
    /// Machine-readable failure reason, e.g. `SOLVENCY_REJECTED`.
    pub reason: String,
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

    #[test]
    fn type_name_matches_variant() {
        let event = GameEvent::StopMultiplierCount(StopMultiplierCountEvent {
            round_id: 1,
            crash_point_ppm: 2_500_000,
        });
        assert_eq!(event.type_name(), "StopMultiplierCount");
    }

    #[test]
    fn balance_update_is_private() {
        let event = GameEvent::BalanceUpdate(BalanceUpdateEvent {
            user_id: sample_address(),
            available: Wei::ZERO,
            locked: Wei::ZERO,
        });
        assert!(event.is_private());
    }

    #[test]
    fn crash_history_is_public() {
        let event = GameEvent::CrashHistory(CrashHistoryEvent {
            round_id: 1,
            crash_point_ppm: 1_000_000,
        });
        assert!(!event.is_private());
    }

    #[test]
    fn envelope_carries_sequence_number() {
        let envelope = EventEnvelope {
            seq: 7,
            emitted_at: Utc::now(),
            event: GameEvent::BettingCountdown(BettingCountdownEvent {
                round_id: 1,
                remaining_ms: 500,
            }),
        };
        assert_eq!(envelope.seq, 7);
    }
}
