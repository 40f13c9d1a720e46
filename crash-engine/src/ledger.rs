//! Ledger Core (C3): the append-only double-entry wei ledger.
//!
//! Every mutation goes through [`Ledger`], never through `LedgerStore`
//! directly, so that idempotency checks and the optimistic-concurrency
//! retry loop are applied uniformly. All arithmetic is on [`Wei`]; no
//! floating point ever reaches an account balance.
//!
//! # Invariants
//!
//! - I1: `available >= 0 && locked >= 0` — guaranteed structurally, `Wei` has
//!   no negative representation.
//! - I2: global conservation — monitored continuously by [`crate::health`],
//!   not enforced per-call here.
//! - I3: idempotent replay — enforced by the `find_entry_by_client_id` /
//!   `find_deposit_entry` checks below, backstopped by a unique constraint
//!   in the store.
//! - I4: `Account.version` strictly increases — delegated to
//!   `LedgerStore::apply_entry`, which is contractually required to bump it.

use std::collections::BTreeMap;

use alloy::primitives::B256;
use chrono::Utc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, DomainError, Result};
use crate::ports::{Cache, LedgerStore};
use crate::types::entities::{Account, LedgerEntry};
use crate::types::enums::OpType;
use crate::types::primitives::{ClientId, EthAddress, Wei};

/// Default optimistic-concurrency retry budget before surfacing
/// `CONTENTION`, per `GameSettings::ledger_max_retries`.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// The append-only ledger, fronted by an optional read-through cache.
#[derive(Debug)]
pub struct Ledger<S, C> {
    store: S,
    cache: C,
    max_retries: u32,
}

impl<S, C> Ledger<S, C>
where
    S: LedgerStore,
    C: Cache,
{
    /// Construct a ledger with the default retry budget.
    pub fn new(store: S, cache: C) -> Self {
        Self {
            store,
            cache,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Construct a ledger with an explicit retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Read-through account lookup: cache first, store on miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store query fails.
    #[instrument(skip(self))]
    pub async fn get_account(&self, user_id: &EthAddress) -> Result<Account> {
        if let Some(account) = self.cache.get_account(user_id) {
            return Ok(account);
        }
        let account = self.store.get_or_create_account(user_id).await?;
        self.cache.set_account(user_id, account.clone());
        Ok(account)
    }

    /// Credit a confirmed on-chain deposit. Idempotent on `(tx_hash,
    /// log_index)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the retry budget is exhausted or the store fails.
    #[instrument(skip(self), fields(user = %user_id, amount = %amount))]
    pub async fn deposit(
        &self,
        user_id: EthAddress,
        amount: Wei,
        tx_hash: B256,
        log_index: u64,
    ) -> Result<Account> {
        if self
            .store
            .find_deposit_entry(tx_hash, log_index)
            .await?
            .is_some()
        {
            return self.get_account(&user_id).await;
        }

        let reference = reference_map(&[("tx_hash", &hex::encode(tx_hash)), ("log_index", &log_index.to_string())]);

        self.mutate_with_retry(user_id, OpType::Deposit, amount, reference, move |account, amount| {
            Ok(Account {
                available: account.available.saturating_add(amount),
                ..account.clone()
            })
        })
        .await
    }

    /// Lock a bet's stake, moving it from `available` to `locked`.
    /// Idempotent on `client_id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InsufficientFunds` if `available < amount`, or
    /// an error if the retry budget is exhausted or the store fails.
    #[instrument(skip(self), fields(user = %user_id, amount = %amount, round_id))]
    pub async fn lock_bet(
        &self,
        user_id: EthAddress,
        amount: Wei,
        round_id: u64,
        client_id: &ClientId,
    ) -> Result<Account> {
        if self
            .store
            .find_entry_by_client_id(&user_id, client_id.as_str())
            .await?
            .is_some()
        {
            return self.get_account(&user_id).await;
        }

        let reference = reference_map(&[
            ("client_id", client_id.as_str()),
            ("round_id", &round_id.to_string()),
        ]);

        self.mutate_with_retry(user_id, OpType::BetLock, amount, reference, move |account, amount| {
            let available = account.available.checked_sub(amount).ok_or_else(|| {
                AppError::Domain(DomainError::InsufficientFunds {
                    requested: amount.to_string(),
                    available: account.available.to_string(),
                })
            })?;
            Ok(Account {
                available,
                locked: account.locked.saturating_add(amount),
                ..account.clone()
            })
        })
        .await
    }

    /// Settle a winning bet: release `stake` from `locked` and credit
    /// `payout` to `available`.
    ///
    /// # Errors
    ///
    /// Returns an error if the retry budget is exhausted or the store fails.
    #[instrument(skip(self), fields(user = %user_id, stake = %stake, payout = %payout, round_id))]
    pub async fn settle_win(
        &self,
        user_id: EthAddress,
        stake: Wei,
        payout: Wei,
        round_id: u64,
    ) -> Result<Account> {
        let reference = reference_map(&[
            ("round_id", &round_id.to_string()),
            ("stake", &stake.to_string()),
        ]);

        self.mutate_with_retry(user_id, OpType::BetWin, payout, reference, move |account, payout| {
            let locked = account.locked.saturating_sub(stake);
            Ok(Account {
                available: account.available.saturating_add(payout),
                locked,
                ..account.clone()
            })
        })
        .await
    }

    /// Settle a losing bet: forfeit `stake` from `locked`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvariantViolation` if `locked < stake` (the
    /// engine should never reach this state), or an error if the retry
    /// budget is exhausted or the store fails.
    #[instrument(skip(self), fields(user = %user_id, stake = %stake, round_id))]
    pub async fn settle_lose(&self, user_id: EthAddress, stake: Wei, round_id: u64) -> Result<Account> {
        let reference = reference_map(&[("round_id", &round_id.to_string())]);

        self.mutate_with_retry(user_id, OpType::BetLose, stake, reference, move |account, stake| {
            let locked = account.locked.checked_sub(stake).ok_or_else(|| {
                AppError::InvariantViolation(format!(
                    "settle_lose: account {} locked {} < stake {}",
                    account.user_id, account.locked, stake
                ))
            })?;
            Ok(Account {
                locked,
                ..account.clone()
            })
        })
        .await
    }

    /// Debit `amount` from `available` for an outbound withdrawal.
    /// Idempotent on `client_id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InsufficientFunds` if `available < amount`, or
    /// an error if the retry budget is exhausted or the store fails.
    #[instrument(skip(self), fields(user = %user_id, amount = %amount))]
    pub async fn withdraw(&self, user_id: EthAddress, amount: Wei, client_id: &ClientId) -> Result<Account> {
        if self
            .store
            .find_entry_by_client_id(&user_id, client_id.as_str())
            .await?
            .is_some()
        {
            return self.get_account(&user_id).await;
        }

        let reference = reference_map(&[("client_id", client_id.as_str())]);

        self.mutate_with_retry(user_id, OpType::Withdraw, amount, reference, move |account, amount| {
            let available = account.available.checked_sub(amount).ok_or_else(|| {
                AppError::Domain(DomainError::InsufficientFunds {
                    requested: amount.to_string(),
                    available: account.available.to_string(),
                })
            })?;
            Ok(Account {
                available,
                ..account.clone()
            })
        })
        .await
    }

    /// Apply a manual, signed balance correction. Always requires `reason`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InsufficientFunds` if a negative adjustment
    /// would drive `available` below zero, or an error if the retry budget
    /// is exhausted or the store fails.
    #[instrument(skip(self), fields(user = %user_id, delta, reason))]
    pub async fn adjustment(&self, user_id: EthAddress, delta: i128, reason: &str) -> Result<Account> {
        let magnitude = Wei::from_u128(delta.unsigned_abs());
        let reference = reference_map(&[
            ("reason", reason),
            ("sign", if delta >= 0 { "+" } else { "-" }),
        ]);

        self.mutate_with_retry(user_id, OpType::Adjustment, magnitude, reference, move |account, magnitude| {
            let available = if delta >= 0 {
                account.available.saturating_add(magnitude)
            } else {
                account.available.checked_sub(magnitude).ok_or_else(|| {
                    AppError::Domain(DomainError::InsufficientFunds {
                        requested: magnitude.to_string(),
                        available: account.available.to_string(),
                    })
                })?
            };
            Ok(Account {
                available,
                ..account.clone()
            })
        })
        .await
    }

    /// Sum of `available + locked` across every account, for the Solvency
    /// Gate's reserve calculation.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store query fails.
    #[instrument(skip(self))]
    pub async fn total_liabilities(&self) -> Result<Wei> {
        if let Some(cached) = self.cache.get_total_liabilities() {
            return Ok(cached);
        }
        let total = self.store.total_liabilities().await?;
        self.cache.set_total_liabilities(total);
        Ok(total)
    }

    /// Recent ledger entries for a user, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store query fails.
    #[instrument(skip(self))]
    pub async fn get_entries_for_user(&self, user_id: &EthAddress, limit: u32) -> Result<Vec<LedgerEntry>> {
        self.store.get_entries_for_user(user_id, limit).await
    }

    /// Read-modify-write an account with optimistic-concurrency retry.
    async fn mutate_with_retry<F>(
        &self,
        user_id: EthAddress,
        op_type: OpType,
        amount: Wei,
        reference: BTreeMap<String, String>,
        mutate: F,
    ) -> Result<Account>
    where
        F: Fn(&Account, Wei) -> Result<Account>,
    {
        for attempt in 0..self.max_retries {
            let account = self.store.get_or_create_account(&user_id).await?;
            let mut proposed = mutate(&account, amount)?;
            proposed.version = account.version;

            let entry = LedgerEntry {
                id: Uuid::now_v7(),
                user_id,
                op_type,
                amount,
                reference: reference.clone(),
                created_at: Utc::now(),
            };

            match self.store.apply_entry(&proposed, &entry).await {
                Ok(updated) => {
                    self.cache.invalidate_account(&user_id);
                    return Ok(updated);
                }
                Err(AppError::Domain(DomainError::Contention(_))) => {
                    warn!(attempt, user = %user_id, "ledger contention, retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(AppError::Domain(DomainError::Contention(user_id.to_hex())))
    }
}

fn reference_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::DateTime;

    use super::*;
    use crate::ports::cache::mocks::MockCache;

    #[derive(Debug, Default)]
    struct MockLedgerStore {
        accounts: Mutex<HashMap<EthAddress, Account>>,
        entries_by_client: Mutex<HashMap<(EthAddress, String), LedgerEntry>>,
        entries_by_deposit: Mutex<HashMap<(B256, u64), LedgerEntry>>,
        fail_next_n: Mutex<u32>,
    }

    impl MockLedgerStore {
        fn fail_next(&self, n: u32) {
            *self.fail_next_n.lock().unwrap() = n;
        }
    }

    #[async_trait]
    impl LedgerStore for MockLedgerStore {
        async fn get_account(&self, user_id: &EthAddress) -> Result<Option<Account>> {
            Ok(self.accounts.lock().unwrap().get(user_id).cloned())
        }

        async fn get_or_create_account(&self, user_id: &EthAddress) -> Result<Account> {
            let mut accounts = self.accounts.lock().unwrap();
            Ok(accounts
                .entry(*user_id)
                .or_insert_with(|| Account::empty(*user_id))
                .clone())
        }

        async fn apply_entry(&self, account: &Account, entry: &LedgerEntry) -> Result<Account> {
            {
                let mut remaining = self.fail_next_n.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(AppError::Domain(DomainError::Contention(account.user_id.to_hex())));
                }
            }
            let mut accounts = self.accounts.lock().unwrap();
            let current = accounts
                .entry(account.user_id)
                .or_insert_with(|| Account::empty(account.user_id));
            if current.version != account.version {
                return Err(AppError::Domain(DomainError::Contention(account.user_id.to_hex())));
            }
            current.available = account.available;
            current.locked = account.locked;
            current.version += 1;

            if let Some(client_id) = entry.client_id() {
                self.entries_by_client
                    .lock()
                    .unwrap()
                    .insert((account.user_id, client_id.to_string()), entry.clone());
            }
            if let (Some(tx_hash), Some(log_index)) = (entry.reference.get("tx_hash"), entry.reference.get("log_index"))
            {
                let tx_hash: B256 = tx_hash.parse().unwrap_or(B256::ZERO);
                let log_index: u64 = log_index.parse().unwrap_or(0);
                self.entries_by_deposit
                    .lock()
                    .unwrap()
                    .insert((tx_hash, log_index), entry.clone());
            }

            Ok(current.clone())
        }

        async fn find_entry_by_client_id(
            &self,
            user_id: &EthAddress,
            client_id: &str,
        ) -> Result<Option<LedgerEntry>> {
            Ok(self
                .entries_by_client
                .lock()
                .unwrap()
                .get(&(*user_id, client_id.to_string()))
                .cloned())
        }

        async fn find_deposit_entry(&self, tx_hash: B256, log_index: u64) -> Result<Option<LedgerEntry>> {
            Ok(self
                .entries_by_deposit
                .lock()
                .unwrap()
                .get(&(tx_hash, log_index))
                .cloned())
        }

        async fn total_liabilities(&self) -> Result<Wei> {
            let accounts = self.accounts.lock().unwrap();
            Ok(accounts
                .values()
                .fold(Wei::ZERO, |acc, a| acc.saturating_add(a.total())))
        }

        async fn get_entries_for_user(&self, _user_id: &EthAddress, _limit: u32) -> Result<Vec<LedgerEntry>> {
            Ok(Vec::new())
        }
    }

    fn sample_address() -> EthAddress {
        EthAddress::from_hex("0x1234567890123456789012345678901234567890").unwrap()
    }

    fn ledger() -> Ledger<MockLedgerStore, MockCache> {
        Ledger::new(MockLedgerStore::default(), MockCache::new())
    }

    #[tokio::test]
    async fn deposit_credits_available() {
        let ledger = ledger();
        let user = sample_address();
        let account = ledger
            .deposit(user, Wei::from_u128(100), B256::ZERO, 0)
            .await
            .unwrap();
        assert_eq!(account.available, Wei::from_u128(100));
        assert_eq!(account.version, 1);
    }

    #[tokio::test]
    async fn deposit_is_idempotent_on_tx_and_log_index() {
        let ledger = ledger();
        let user = sample_address();
        ledger.deposit(user, Wei::from_u128(100), B256::ZERO, 0).await.unwrap();
        let replayed = ledger.deposit(user, Wei::from_u128(100), B256::ZERO, 0).await.unwrap();
        assert_eq!(replayed.available, Wei::from_u128(100));
        assert_eq!(replayed.version, 1, "second deposit call must not mutate again");
    }

    #[tokio::test]
    async fn lock_bet_moves_available_to_locked() {
        let ledger = ledger();
        let user = sample_address();
        ledger.deposit(user, Wei::from_u128(100), B256::ZERO, 0).await.unwrap();

        let client_id = ClientId::new("bet-1").unwrap();
        let account = ledger.lock_bet(user, Wei::from_u128(40), 1, &client_id).await.unwrap();
        assert_eq!(account.available, Wei::from_u128(60));
        assert_eq!(account.locked, Wei::from_u128(40));
    }

    #[tokio::test]
    async fn lock_bet_rejects_insufficient_funds() {
        let ledger = ledger();
        let user = sample_address();
        let client_id = ClientId::new("bet-1").unwrap();
        let result = ledger.lock_bet(user, Wei::from_u128(40), 1, &client_id).await;
        assert!(matches!(
            result,
            Err(AppError::Domain(DomainError::InsufficientFunds { .. }))
        ));
    }

    #[tokio::test]
    async fn settle_win_releases_lock_and_credits_payout() {
        let ledger = ledger();
        let user = sample_address();
        ledger.deposit(user, Wei::from_u128(100), B256::ZERO, 0).await.unwrap();
        let client_id = ClientId::new("bet-1").unwrap();
        ledger.lock_bet(user, Wei::from_u128(40), 1, &client_id).await.unwrap();

        let account = ledger
            .settle_win(user, Wei::from_u128(40), Wei::from_u128(80), 1)
            .await
            .unwrap();
        assert_eq!(account.locked, Wei::ZERO);
        assert_eq!(account.available, Wei::from_u128(140));
    }

    #[tokio::test]
    async fn settle_lose_forfeits_locked_stake() {
        let ledger = ledger();
        let user = sample_address();
        ledger.deposit(user, Wei::from_u128(100), B256::ZERO, 0).await.unwrap();
        let client_id = ClientId::new("bet-1").unwrap();
        ledger.lock_bet(user, Wei::from_u128(40), 1, &client_id).await.unwrap();

        let account = ledger.settle_lose(user, Wei::from_u128(40), 1).await.unwrap();
        assert_eq!(account.locked, Wei::ZERO);
        assert_eq!(account.available, Wei::from_u128(60));
    }

    #[tokio::test]
    async fn settle_lose_violates_invariant_when_underlocked() {
        let ledger = ledger();
        let user = sample_address();
        ledger.deposit(user, Wei::from_u128(100), B256::ZERO, 0).await.unwrap();

        let result = ledger.settle_lose(user, Wei::from_u128(40), 1).await;
        assert!(matches!(result, Err(AppError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn withdraw_debits_available() {
        let ledger = ledger();
        let user = sample_address();
        ledger.deposit(user, Wei::from_u128(100), B256::ZERO, 0).await.unwrap();
        let client_id = ClientId::new("wd-1").unwrap();
        let account = ledger.withdraw(user, Wei::from_u128(30), &client_id).await.unwrap();
        assert_eq!(account.available, Wei::from_u128(70));
    }

    #[tokio::test]
    async fn adjustment_applies_negative_delta() {
        let ledger = ledger();
        let user = sample_address();
        ledger.deposit(user, Wei::from_u128(100), B256::ZERO, 0).await.unwrap();
        let account = ledger.adjustment(user, -30, "chargeback").await.unwrap();
        assert_eq!(account.available, Wei::from_u128(70));
    }

    #[tokio::test]
    async fn contention_retries_then_succeeds() {
        let store = MockLedgerStore::default();
        store.fail_next(2);
        let ledger = Ledger::new(store, MockCache::new());
        let user = sample_address();
        let account = ledger
            .deposit(user, Wei::from_u128(100), B256::ZERO, 0)
            .await
            .unwrap();
        assert_eq!(account.available, Wei::from_u128(100));
    }

    #[tokio::test]
    async fn contention_exhausts_retry_budget() {
        let store = MockLedgerStore::default();
        store.fail_next(100);
        let ledger = Ledger::new(store, MockCache::new()).with_max_retries(3);
        let user = sample_address();
        let result = ledger.deposit(user, Wei::from_u128(100), B256::ZERO, 0).await;
        assert!(matches!(result, Err(AppError::Domain(DomainError::Contention(_)))));
    }

    #[test]
    fn entry_ids_are_well_formed() {
        let id = Uuid::now_v7();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn timestamps_are_utc() {
        let now: DateTime<Utc> = Utc::now();
        assert_eq!(now.timezone(), Utc);
    }
}
