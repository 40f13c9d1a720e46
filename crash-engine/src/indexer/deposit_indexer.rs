//! Deposit Indexer (C8): scans native-value transfers into the hot wallet
//! and credits them to the ledger once sufficiently confirmed.
//!
//! Grounded on the teacher's `block_processor` scan-and-checkpoint shape,
//! simplified for this crate's needs: a plain value transfer into the hot
//! wallet has no event log and no ABI to decode, so there is no
//! block-by-block log router here, only a direct range scan via
//! [`crate::ports::ChainClient::scan_transfers`]. Reorg safety comes from
//! waiting `CONFIRMATIONS` deep and re-scanning `REORG_BUFFER` blocks on
//! every pass, not from tracking and rolling back per-block hashes — the
//! `(tx_hash, log_index)` idempotency key on `DepositStore` makes
//! re-crediting the same transfer a no-op.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::config::GameSettings;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::ports::{Cache, ChainClient, DepositStore, EventBus, LedgerStore};
use crate::types::entities::{DepositSeen, IndexerCheckpoint};
use crate::types::events::{BalanceUpdateEvent, GameEvent};
use crate::types::primitives::{BlockNumber, EthAddress};

/// Drives the scan-confirm-credit loop for native deposits into the hot
/// wallet.
#[derive(Debug)]
pub struct DepositIndexer<DS, LS, LC, CC, EB> {
    deposits: DS,
    ledger: Ledger<LS, LC>,
    chain: CC,
    events: EB,
    hot_wallet: EthAddress,
    confirmations: u64,
    reorg_buffer: u64,
    scan_batch: u64,
    poll_interval: Duration,
}

impl<DS, LS, LC, CC, EB> DepositIndexer<DS, LS, LC, CC, EB>
where
    DS: DepositStore,
    LS: LedgerStore,
    LC: Cache,
    CC: ChainClient,
    EB: EventBus,
{
    /// Construct a new indexer from tuning constants in `settings`.
    pub fn new(
        deposits: DS,
        ledger: Ledger<LS, LC>,
        chain: CC,
        events: EB,
        hot_wallet: EthAddress,
        settings: &GameSettings,
    ) -> Self {
        Self {
            deposits,
            ledger,
            chain,
            events,
            hot_wallet,
            confirmations: settings.confirmations,
            reorg_buffer: settings.reorg_buffer,
            scan_batch: settings.scan_batch,
            poll_interval: Duration::from_millis(settings.request_timeout_ms),
        }
    }

    /// Run the scan loop until cancelled. Intended to be spawned as a
    /// long-lived background task.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if let Err(err) = self.scan_once().await {
                warn!(error = %err, "deposit scan pass failed, will retry next interval");
            }

            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("deposit indexer shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Run a single scan-and-credit pass. Public so tests and the health
    /// surface can drive it deterministically without the sleep loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain RPC or the deposit store fail.
    #[instrument(skip(self))]
    pub async fn scan_once(&self) -> Result<()> {
        let tip = self.chain.latest_block().await?;
        let safe_tip = tip.saturating_sub_u64(self.confirmations);

        let checkpoint = self.deposits.get_checkpoint().await?;
        let from = checkpoint
            .last_scanned_block
            .saturating_sub_u64(self.reorg_buffer);
        let to = BlockNumber::new(safe_tip.get().min(from.get() + self.scan_batch));

        if to.get() <= from.get() {
            debug!(tip = tip.get(), safe_tip = safe_tip.get(), from = from.get(), "nothing new to scan yet");
            return Ok(());
        }

        let transfers = self.chain.scan_transfers(self.hot_wallet, from, to).await?;
        debug!(from = from.get(), to = to.get(), found = transfers.len(), "scanned deposit range");

        for transfer in &transfers {
            let is_new = self
                .deposits
                .record_deposit(&DepositSeen {
                    tx_hash: transfer.tx_hash,
                    log_index: transfer.log_index,
                    block_number: transfer.block_number,
                    from_address: transfer.from_address,
                    amount: transfer.amount,
                    processed_at: chrono::Utc::now(),
                })
                .await?;

            if !is_new {
                continue;
            }

            let account = self
                .ledger
                .deposit(
                    transfer.from_address,
                    transfer.amount,
                    transfer.tx_hash,
                    transfer.log_index,
                )
                .await?;

            let _ = self
                .events
                .publish(GameEvent::BalanceUpdate(BalanceUpdateEvent {
                    user_id: transfer.from_address,
                    available: account.available,
                    locked: account.locked,
                }))
                .await;

            info!(
                user = %transfer.from_address,
                amount = %transfer.amount.as_u256(),
                tx_hash = %transfer.tx_hash,
                "credited on-chain deposit"
            );
        }

        self.deposits
            .set_checkpoint(IndexerCheckpoint {
                last_scanned_block: to,
                last_finalized_block: safe_tip,
            })
            .await?;

        Ok(())
    }
}
