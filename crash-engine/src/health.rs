//! Health & Invariants (C10): continuous evaluation of I1–I4 and indexer
//! lag, backing the admin health surface.
//!
//! Runs as its own background task, polling the same ports the rest of the
//! engine already depends on rather than adding a privileged side-channel.
//! The latest [`HealthSnapshot`] is published on a `tokio::sync::watch`
//! channel; any number of readers (an admin HTTP route, a metrics scrape)
//! can hold a cheap clone of the receiver without blocking the evaluator.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, warn};

use crate::ports::{ChainClient, DepositStore, LedgerStore};
use crate::solvency::SolvencyGate;
use crate::types::primitives::{EthAddress, Wei};

/// A single point-in-time read of engine health, serializable for an admin
/// endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Whether every invariant this check can evaluate currently holds.
    pub healthy: bool,
    /// Aggregate `available + locked` across every ledger account.
    pub ledger_liabilities: String,
    /// Live hot-wallet balance, as last observed.
    pub hot_wallet_balance: String,
    /// Whether the solvency gate is currently in emergency mode.
    pub emergency_mode: bool,
    /// `tip - last_scanned_block`, in blocks.
    pub indexer_lag_blocks: u64,
    /// Whether `indexer_lag_blocks` exceeds the configured ceiling.
    pub indexer_lagging: bool,
    /// Human-readable incidents raised by this pass, empty when healthy.
    pub incidents: Vec<String>,
}

impl HealthSnapshot {
    fn starting_up() -> Self {
        Self {
            healthy: true,
            ledger_liabilities: "0".to_string(),
            hot_wallet_balance: "0".to_string(),
            emergency_mode: false,
            indexer_lag_blocks: 0,
            indexer_lagging: false,
            incidents: Vec::new(),
        }
    }
}

/// Evaluates I1–I4 and indexer lag on a fixed interval and tracks them as a
/// single published snapshot.
pub struct HealthMonitor<DS, LS, CC> {
    deposits: DS,
    ledger: LS,
    chain: CC,
    solvency: std::sync::Arc<SolvencyGate>,
    hot_wallet: EthAddress,
    lag_ceiling_blocks: u64,
    poll_interval: Duration,
    sender: watch::Sender<HealthSnapshot>,
}

impl<DS, LS, CC> HealthMonitor<DS, LS, CC>
where
    DS: DepositStore,
    LS: LedgerStore,
    CC: ChainClient,
{
    /// Construct a monitor and its initial, optimistic snapshot. Callers
    /// should hold on to a `subscribe()`'d receiver before spawning `run`.
    #[must_use]
    pub fn new(
        deposits: DS,
        ledger: LS,
        chain: CC,
        solvency: std::sync::Arc<SolvencyGate>,
        hot_wallet: EthAddress,
        lag_ceiling_blocks: u64,
        poll_interval: Duration,
    ) -> (Self, watch::Receiver<HealthSnapshot>) {
        let (sender, receiver) = watch::channel(HealthSnapshot::starting_up());
        (
            Self {
                deposits,
                ledger,
                chain,
                solvency,
                hot_wallet,
                lag_ceiling_blocks,
                poll_interval,
                sender,
            },
            receiver,
        )
    }

    /// Poll forever until every receiver is dropped. Intended to be spawned
    /// as a long-lived background task.
    pub async fn run(&self) {
        loop {
            let snapshot = self.evaluate().await;
            if !snapshot.healthy {
                for incident in &snapshot.incidents {
                    error!(incident, "health invariant violation");
                }
            }
            if self.sender.send(snapshot).is_err() {
                warn!("health monitor has no remaining subscribers, stopping");
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run a single evaluation pass. Public so tests and an on-demand admin
    /// endpoint can force a fresh read without waiting for the poll tick.
    pub async fn evaluate(&self) -> HealthSnapshot {
        let mut incidents = Vec::new();

        let ledger_liabilities = match self.ledger.total_liabilities().await {
            Ok(total) => total,
            Err(err) => {
                incidents.push(format!("failed to read ledger liabilities: {err}"));
                Wei::ZERO
            }
        };

        let hot_wallet_balance = match self.chain.balance_of(self.hot_wallet).await {
            Ok(balance) => balance,
            Err(err) => {
                incidents.push(format!("failed to read hot wallet balance: {err}"));
                Wei::ZERO
            }
        };

        // I1/I2 (approximate, given the ports available to a live health
        // check rather than a full ledger audit): every account's balance
        // must ultimately be backed by chain-custodied funds. Liabilities
        // exceeding the hot wallet's own balance means either a ledger bug
        // or an un-actioned withdrawal backlog — either way, critical.
        if ledger_liabilities > hot_wallet_balance {
            incidents.push(format!(
                "ledger liabilities {ledger_liabilities} exceed hot wallet balance {hot_wallet_balance}"
            ));
            self.solvency.trip_emergency();
        }

        let indexer_lag_blocks = match (self.chain.latest_block().await, self.deposits.get_checkpoint().await) {
            (Ok(tip), Ok(checkpoint)) => tip.get().saturating_sub(checkpoint.last_scanned_block.get()),
            (tip_result, checkpoint_result) => {
                if let Err(err) = tip_result {
                    incidents.push(format!("failed to read chain tip: {err}"));
                }
                if let Err(err) = checkpoint_result {
                    incidents.push(format!("failed to read indexer checkpoint: {err}"));
                }
                0
            }
        };
        let indexer_lagging = indexer_lag_blocks > self.lag_ceiling_blocks;
        if indexer_lagging {
            incidents.push(format!(
                "indexer lag {indexer_lag_blocks} blocks exceeds ceiling {}",
                self.lag_ceiling_blocks
            ));
        }

        let emergency_mode = self.solvency.is_emergency();
        if emergency_mode {
            incidents.push("solvency gate is in emergency mode".to_string());
        }

        metrics::gauge!("crash_engine_indexer_lag_blocks").set(indexer_lag_blocks as f64);
        metrics::gauge!("crash_engine_ledger_liabilities_wei").set(wei_to_f64(ledger_liabilities));

        HealthSnapshot {
            healthy: incidents.is_empty(),
            ledger_liabilities: ledger_liabilities.to_string(),
            hot_wallet_balance: hot_wallet_balance.to_string(),
            emergency_mode,
            indexer_lag_blocks,
            indexer_lagging,
            incidents,
        }
    }
}

fn wei_to_f64(amount: Wei) -> f64 {
    amount.as_u256().to_string().parse().unwrap_or(f64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use alloy::primitives::B256;
    use async_trait::async_trait;

    use super::*;
    use crate::error::Result;
    use crate::ports::chain::mocks::MockChainClient;
    use crate::solvency::SolvencyLimits;
    use crate::types::entities::{Account, DepositSeen, IndexerCheckpoint, LedgerEntry};
    use crate::types::primitives::BlockNumber;

    fn hot_wallet() -> EthAddress {
        EthAddress::from_hex("0x1234567890123456789012345678901234567890").unwrap()
    }

    struct FixedDepositStore {
        checkpoint: IndexerCheckpoint,
    }

    #[async_trait]
    impl DepositStore for FixedDepositStore {
        async fn record_deposit(&self, _deposit: &DepositSeen) -> Result<bool> {
            Ok(true)
        }
        async fn get_deposit(&self, _tx_hash: B256, _log_index: u64) -> Result<Option<DepositSeen>> {
            Ok(None)
        }
        async fn get_checkpoint(&self) -> Result<IndexerCheckpoint> {
            Ok(self.checkpoint)
        }
        async fn set_checkpoint(&self, _checkpoint: IndexerCheckpoint) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FixedLedgerStore {
        accounts: Mutex<HashMap<EthAddress, Account>>,
    }

    impl FixedLedgerStore {
        fn with_balance(user_id: EthAddress, available: Wei) -> Self {
            let mut accounts = HashMap::new();
            accounts.insert(user_id, Account { user_id, available, locked: Wei::ZERO, version: 1 });
            Self { accounts: Mutex::new(accounts) }
        }
    }

    #[async_trait]
    impl LedgerStore for FixedLedgerStore {
        async fn get_account(&self, user_id: &EthAddress) -> Result<Option<Account>> {
            Ok(self.accounts.lock().unwrap().get(user_id).cloned())
        }
        async fn get_or_create_account(&self, user_id: &EthAddress) -> Result<Account> {
            Ok(self.accounts.lock().unwrap().entry(*user_id).or_insert_with(|| Account::empty(*user_id)).clone())
        }
        async fn apply_entry(&self, account: &Account, _entry: &LedgerEntry) -> Result<Account> {
            Ok(account.clone())
        }
        async fn find_entry_by_client_id(&self, _user_id: &EthAddress, _client_id: &str) -> Result<Option<LedgerEntry>> {
            Ok(None)
        }
        async fn find_deposit_entry(&self, _tx_hash: B256, _log_index: u64) -> Result<Option<LedgerEntry>> {
            Ok(None)
        }
        async fn total_liabilities(&self) -> Result<Wei> {
            Ok(self.accounts.lock().unwrap().values().fold(Wei::ZERO, |acc, a| acc.saturating_add(a.total())))
        }
    }

    fn gate() -> Arc<SolvencyGate> {
        Arc::new(SolvencyGate::new(SolvencyLimits {
            min_reserve_wei: Wei::ZERO,
            max_liability_ratio: 0.8,
            emergency_threshold: 0.95,
        }))
    }

    #[tokio::test]
    async fn healthy_when_reserves_cover_liabilities_and_indexer_is_current() {
        let deposits = FixedDepositStore {
            checkpoint: IndexerCheckpoint {
                last_scanned_block: BlockNumber::new(100),
                last_finalized_block: BlockNumber::new(100),
            },
        };
        let ledger = FixedLedgerStore::with_balance(hot_wallet(), Wei::from_u128(100));
        let chain = MockChainClient::new(BlockNumber::new(105), Wei::from_u128(1_000));

        let (monitor, _receiver) = HealthMonitor::new(deposits, ledger, chain, gate(), hot_wallet(), 50, Duration::from_secs(30));

        let snapshot = monitor.evaluate().await;
        assert!(snapshot.healthy);
        assert!(!snapshot.indexer_lagging);
        assert_eq!(snapshot.indexer_lag_blocks, 5);
    }

    #[tokio::test]
    async fn unhealthy_when_liabilities_exceed_hot_wallet_balance() {
        let deposits = FixedDepositStore { checkpoint: IndexerCheckpoint::genesis() };
        let ledger = FixedLedgerStore::with_balance(hot_wallet(), Wei::from_u128(10_000));
        let chain = MockChainClient::new(BlockNumber::new(1), Wei::from_u128(1));

        let (monitor, _receiver) = HealthMonitor::new(deposits, ledger, chain, gate(), hot_wallet(), 50, Duration::from_secs(30));

        let snapshot = monitor.evaluate().await;
        assert!(!snapshot.healthy);
        assert!(snapshot.emergency_mode);
    }

    #[tokio::test]
    async fn unhealthy_when_indexer_lag_exceeds_ceiling() {
        let deposits = FixedDepositStore {
            checkpoint: IndexerCheckpoint { last_scanned_block: BlockNumber::new(0), last_finalized_block: BlockNumber::new(0) },
        };
        let ledger = FixedLedgerStore::with_balance(hot_wallet(), Wei::ZERO);
        let chain = MockChainClient::new(BlockNumber::new(1_000), Wei::from_u128(1_000));

        let (monitor, _receiver) = HealthMonitor::new(deposits, ledger, chain, gate(), hot_wallet(), 50, Duration::from_secs(30));

        let snapshot = monitor.evaluate().await;
        assert!(!snapshot.healthy);
        assert!(snapshot.indexer_lagging);
    }
}
