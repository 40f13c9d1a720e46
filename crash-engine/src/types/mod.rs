//! Domain types for the crash engine.
//!
//! This module contains all the core types used throughout the service:
//!
//! - [`enums`] - Game enumerations (`OpType`, `RoundStatus`, `BetStatus`, `RoundPhase`)
//! - [`primitives`] - Validated newtypes (`EthAddress`, `Wei`, `Ppm`, `ClientId`, `BlockNumber`)
//! - [`events`] - Strongly-typed events broadcast to clients
//! - [`entities`] - Domain entities for database persistence

pub mod entities;
pub mod enums;
pub mod events;
pub mod primitives;

// Re-export commonly used types at module level
pub use entities::{Account, Bet, DepositSeen, IndexerCheckpoint, LedgerEntry, Round, RoundCommit};
pub use enums::{BetStatus, OpType, RoundPhase, RoundStatus};
pub use events::{EventEnvelope, GameEvent};
pub use primitives::{BlockNumber, ClientId, EthAddress, Ppm, Wei};
