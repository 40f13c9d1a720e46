//! On-chain deposit indexing (C8).
//!
//! A crash round never waits on the chain, but a user's balance must. This
//! module watches the hot wallet for incoming native-value transfers,
//! waits out `confirmations` blocks, and credits the ledger exactly once
//! per transfer.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         RpcChainClient                          │
//! │     latest_block / scan_transfers / send_transfer / balance_of  │
//! └───────────────────────────────┬───────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         DepositIndexer                          │
//! │   poll loop: scan [checkpoint - reorg_buffer, tip - conf.]      │
//! │   record_deposit (idempotent) -> Ledger::deposit -> BalanceUpdate│
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no rollback machinery here: deposits are only credited once
//! `confirmations` blocks deep, and any reorg shallower than
//! `reorg_buffer` is absorbed for free by re-scanning the same range on
//! the next pass. The `(tx_hash, log_index)` idempotency key on
//! [`crate::ports::DepositStore`] makes re-observing the same transfer a
//! no-op rather than a double credit.

mod chain_client;
mod deposit_indexer;

pub use chain_client::RpcChainClient;
pub use deposit_indexer::DepositIndexer;
