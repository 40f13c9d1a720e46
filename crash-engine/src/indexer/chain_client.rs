//! Production `ChainClient` adapter (C8) backed by [`evm_provider::StandardEvmProvider`].
//!
//! `ChainProvider` already covers balance queries, nonce management and raw
//! transaction submission, but has no notion of "every native-value transfer
//! into this address within a block range" — a plain value transfer emits no
//! log, so `eth_getLogs` cannot see it. This adapter reaches past
//! `ChainProvider` to the underlying `alloy` root provider to enumerate full
//! block bodies directly, and uses `LocalNonceManager` plus an `alloy` wallet
//! to sign and submit hot-wallet payouts.

use alloy::network::{EthereumWallet, TransactionBuilder, TransactionResponse};
use alloy::primitives::{Address, B256};
use alloy::providers::Provider;
use alloy::rpc::types::{BlockNumberOrTag, TransactionRequest as AlloyTxRequest};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use evm_provider::{ChainProvider, LocalNonceManager, StandardEvmProvider};
use tracing::{debug, instrument, warn};

use crate::error::{AppError, InfraError, Result};
use crate::ports::chain::{ChainClient, ObservedTransfer};
use crate::types::primitives::{BlockNumber, EthAddress, Wei};

fn rpc_error(err: impl std::error::Error + Send + Sync + 'static) -> AppError {
    InfraError::Rpc(Box::new(err)).into()
}

// ═══════════════════════════════════════════════════════════════════════════════
// RPC CHAIN CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// `ChainClient` backed by a live JSON-RPC endpoint.
///
/// Holds its own `LocalNonceManager` so concurrent payouts never race for
/// the same nonce; the hot wallet is the only signer this process ever
/// drives, so a single in-process manager is sufficient (no need to
/// coordinate nonces across replicas).
#[derive(Debug)]
pub struct RpcChainClient {
    provider: StandardEvmProvider,
    nonces: LocalNonceManager<StandardEvmProvider>,
    wallet: EthereumWallet,
    hot_wallet: Address,
}

impl RpcChainClient {
    /// Connect to `rpc_url` and configure the hot wallet signer from its raw
    /// private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC endpoint is unreachable, the chain ID
    /// cannot be queried, or `hot_wallet_key_hex` is not a valid secp256k1
    /// private key.
    pub async fn connect(rpc_url: &str, hot_wallet_key_hex: &str) -> Result<Self> {
        let provider = StandardEvmProvider::new(rpc_url)
            .await
            .map_err(|e| InfraError::ChainUnavailable(e.to_string()))?;

        let signer: PrivateKeySigner = hot_wallet_key_hex
            .parse()
            .map_err(|e: alloy::signers::local::LocalSignerError| {
                AppError::Initialization(format!("invalid hot wallet key: {e}"))
            })?;
        let hot_wallet = signer.address();
        let wallet = EthereumWallet::from(signer);

        let nonces = LocalNonceManager::new(provider.clone());

        Ok(Self {
            provider,
            nonces,
            wallet,
            hot_wallet,
        })
    }

    /// The address of the hot wallet this client signs payouts from.
    #[must_use]
    pub fn hot_wallet_address(&self) -> EthAddress {
        self.hot_wallet.into()
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    #[instrument(skip(self))]
    async fn latest_block(&self) -> Result<BlockNumber> {
        let tip = self
            .provider
            .inner()
            .get_block_number()
            .await
            .map_err(rpc_error)?;
        Ok(BlockNumber::new(tip))
    }

    #[instrument(skip(self))]
    async fn block_hash(&self, block: BlockNumber) -> Result<Option<B256>> {
        let fetched = self
            .provider
            .inner()
            .get_block_by_number(BlockNumberOrTag::Number(block.get()))
            .await
            .map_err(rpc_error)?;
        Ok(fetched.map(|b| b.header.hash))
    }

    #[instrument(skip(self, to), fields(from_block = from_block.get(), to_block = to_block.get()))]
    async fn scan_transfers(
        &self,
        to: EthAddress,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<Vec<ObservedTransfer>> {
        let target: Address = to.into();
        let mut observed = Vec::new();

        let mut n = from_block.get();
        while n <= to_block.get() {
            let block = self
                .provider
                .inner()
                .get_block_by_number(BlockNumberOrTag::Number(n))
                .full()
                .await
                .map_err(rpc_error)?;

            let Some(block) = block else {
                warn!(block = n, "block vanished mid-scan, likely a shallow reorg");
                n += 1;
                continue;
            };

            let txs = block.transactions.as_transactions().unwrap_or_default();
            for (index, tx) in txs.iter().enumerate() {
                if tx.to() == Some(target) && !tx.value().is_zero() {
                    observed.push(ObservedTransfer {
                        tx_hash: tx.tx_hash(),
                        log_index: index as u64,
                        block_number: BlockNumber::new(n),
                        from_address: tx.from().into(),
                        amount: Wei::new(tx.value()),
                    });
                }
            }

            n += 1;
        }

        debug!(found = observed.len(), "scanned block range for transfers");
        Ok(observed)
    }

    #[instrument(skip(self))]
    async fn send_transfer(&self, to: EthAddress, amount: Wei) -> Result<B256> {
        let nonce = self
            .nonces
            .get_and_increment(self.hot_wallet)
            .await
            .map_err(rpc_error)?;
        let gas_price = self.provider.gas_price().await.map_err(rpc_error)?;
        let chain_id = self.provider.chain_id();

        let request = AlloyTxRequest::default()
            .with_from(self.hot_wallet)
            .with_to(to.into())
            .with_value(amount.as_u256())
            .with_nonce(nonce)
            .with_gas_limit(21_000)
            .with_gas_price(gas_price)
            .with_chain_id(chain_id);

        let envelope = request
            .build(&self.wallet)
            .await
            .map_err(|e| AppError::Initialization(format!("failed to sign payout tx: {e}")))?;
        let raw = alloy::eips::eip2718::Encodable2718::encoded_2718(&envelope);

        let hash = self
            .provider
            .send_raw_transaction(raw.into())
            .await
            .map_err(rpc_error)?;

        debug!(tx_hash = %hash, nonce, to = %to, amount = %amount.as_u256(), "submitted payout transaction");
        Ok(hash)
    }

    #[instrument(skip(self))]
    async fn balance_of(&self, address: EthAddress) -> Result<Wei> {
        let balance = self
            .provider
            .get_balance(address.into())
            .await
            .map_err(rpc_error)?;
        Ok(Wei::new(balance))
    }
}
