//! Chain access port for the Deposit Indexer (C8) and Payout Dispatcher (C9).
//!
//! `evm_provider::ChainProvider` covers generic EVM reads and raw transaction
//! submission, but has no notion of "every native-value transfer into this
//! block range" — that is not a concept JSON-RPC exposes as a log filter,
//! since a plain value transfer emits no event. This port sits one layer
//! above `ChainProvider` and names the three chain operations this crate
//! actually needs: the current tip, a scan of native transfers into the hot
//! wallet, and submission of an outbound transfer.

use alloy::primitives::B256;
use async_trait::async_trait;

use crate::error::Result;
use crate::types::primitives::{BlockNumber, EthAddress, Wei};

// ═══════════════════════════════════════════════════════════════════════════════
// OBSERVED TRANSFER
// ═══════════════════════════════════════════════════════════════════════════════

/// A single native-value transfer observed while scanning a block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedTransfer {
    /// Transaction carrying the transfer.
    pub tx_hash: B256,
    /// Position of the transaction within its block; stands in for a log
    /// index since a plain value transfer has none.
    pub log_index: u64,
    /// Block the transaction was included in.
    pub block_number: BlockNumber,
    /// Sender.
    pub from_address: EthAddress,
    /// Amount transferred.
    pub amount: Wei,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for the three chain operations the crash engine performs.
///
/// # Implementation Notes
///
/// `scan_transfers` is expected to enumerate full block transactions (e.g.
/// `eth_getBlockByNumber(n, true)`) and filter on `to == hot_wallet && value >
/// 0`, not to rely on `evm_provider::ExtendedChainProvider`'s log-filter
/// surface, which only sees contract event logs.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The chain's current block tip.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC endpoint is unreachable.
    async fn latest_block(&self) -> Result<BlockNumber>;

    /// Block hash for reorg-detection bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC endpoint is unreachable.
    async fn block_hash(&self, block: BlockNumber) -> Result<Option<B256>>;

    /// Every native-value transfer to `to` in `[from_block, to_block]`
    /// inclusive.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC endpoint is unreachable or a block in the
    /// range cannot be fetched.
    async fn scan_transfers(
        &self,
        to: EthAddress,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<Vec<ObservedTransfer>>;

    /// Submit a native-value transfer from the hot wallet, returning the
    /// transaction hash once broadcast (not yet confirmed).
    ///
    /// # Errors
    ///
    /// Returns an error if signing, nonce assignment, or broadcast fails.
    async fn send_transfer(&self, to: EthAddress, amount: Wei) -> Result<B256>;

    /// Current balance of an address (used to evaluate hot-wallet reserves
    /// for the Solvency Gate and the hot-wallet top-up trigger).
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC endpoint is unreachable.
    async fn balance_of(&self, address: EthAddress) -> Result<Wei>;
}

#[async_trait]
impl<T: ChainClient + ?Sized> ChainClient for std::sync::Arc<T> {
    async fn latest_block(&self) -> Result<BlockNumber> {
        (**self).latest_block().await
    }

    async fn block_hash(&self, block: BlockNumber) -> Result<Option<B256>> {
        (**self).block_hash(block).await
    }

    async fn scan_transfers(
        &self,
        to: EthAddress,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<Vec<ObservedTransfer>> {
        (**self).scan_transfers(to, from_block, to_block).await
    }

    async fn send_transfer(&self, to: EthAddress, amount: Wei) -> Result<B256> {
        (**self).send_transfer(to, amount).await
    }

    async fn balance_of(&self, address: EthAddress) -> Result<Wei> {
        (**self).balance_of(address).await
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks {
    //! Mock implementations for testing.

    use std::sync::Mutex;

    use super::{
        B256, BlockNumber, ChainClient, EthAddress, ObservedTransfer, Result, Wei, async_trait,
    };

    /// In-memory chain client for tests: a fixed tip, a canned set of
    /// transfers, and a recording of every outbound transfer requested.
    #[derive(Debug, Default)]
    pub struct MockChainClient {
        tip: Mutex<BlockNumber>,
        transfers: Mutex<Vec<ObservedTransfer>>,
        balance: Mutex<Wei>,
        sent: Mutex<Vec<(EthAddress, Wei)>>,
    }

    impl MockChainClient {
        /// A mock client with the given tip and balance.
        #[must_use]
        pub fn new(tip: BlockNumber, balance: Wei) -> Self {
            Self {
                tip: Mutex::new(tip),
                transfers: Mutex::new(Vec::new()),
                balance: Mutex::new(balance),
                sent: Mutex::new(Vec::new()),
            }
        }

        /// Queue a transfer to be returned by the next matching
        /// `scan_transfers` call.
        pub fn push_transfer(&self, transfer: ObservedTransfer) {
            self.transfers.lock().expect("lock poisoned").push(transfer);
        }

        /// Every transfer requested via `send_transfer`, in request order.
        #[must_use]
        pub fn sent_transfers(&self) -> Vec<(EthAddress, Wei)> {
            self.sent.lock().expect("lock poisoned").clone()
        }

        /// Advance the mock tip.
        pub fn set_tip(&self, tip: BlockNumber) {
            *self.tip.lock().expect("lock poisoned") = tip;
        }
    }

    #[async_trait]
    impl ChainClient for MockChainClient {
        async fn latest_block(&self) -> Result<BlockNumber> {
            Ok(*self.tip.lock().expect("lock poisoned"))
        }

        async fn block_hash(&self, block: BlockNumber) -> Result<Option<B256>> {
            Ok(Some(B256::from(alloy::primitives::keccak256(
                block.get().to_le_bytes(),
            ))))
        }

        async fn scan_transfers(
            &self,
            to: EthAddress,
            from_block: BlockNumber,
            to_block: BlockNumber,
        ) -> Result<Vec<ObservedTransfer>> {
            let _ = to;
            Ok(self
                .transfers
                .lock()
                .expect("lock poisoned")
                .iter()
                .filter(|t| t.block_number >= from_block && t.block_number <= to_block)
                .copied()
                .collect())
        }

        async fn send_transfer(&self, to: EthAddress, amount: Wei) -> Result<B256> {
            self.sent.lock().expect("lock poisoned").push((to, amount));
            Ok(B256::from(alloy::primitives::keccak256(to.as_slice())))
        }

        async fn balance_of(&self, address: EthAddress) -> Result<Wei> {
            let _ = address;
            Ok(*self.balance.lock().expect("lock poisoned"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockChainClient;
    use super::*;

    fn sample_address() -> EthAddress {
        EthAddress::from_hex("0x1234567890123456789012345678901234567890").expect("valid address")
    }

    #[tokio::test]
    async fn scan_transfers_filters_by_range() {
        let client = MockChainClient::new(BlockNumber::new(100), Wei::ZERO);
        client.push_transfer(ObservedTransfer {
            tx_hash: B256::ZERO,
            log_index: 0,
            block_number: BlockNumber::new(50),
            from_address: sample_address(),
            amount: Wei::from_u128(1),
        });
        client.push_transfer(ObservedTransfer {
            tx_hash: B256::ZERO,
            log_index: 0,
            block_number: BlockNumber::new(150),
            from_address: sample_address(),
            amount: Wei::from_u128(1),
        });

        let found = client
            .scan_transfers(sample_address(), BlockNumber::new(0), BlockNumber::new(100))
            .await
            .expect("scan succeeds");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].block_number.get(), 50);
    }

    #[tokio::test]
    async fn send_transfer_is_recorded() {
        let client = MockChainClient::new(BlockNumber::new(1), Wei::ZERO);
        client
            .send_transfer(sample_address(), Wei::from_u128(10))
            .await
            .expect("send succeeds");
        assert_eq!(client.sent_transfers(), vec![(sample_address(), Wei::from_u128(10))]);
    }
}
