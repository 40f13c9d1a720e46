//! PostgreSQL implementation of store ports using SQLx.
//!
//! This module provides the primary persistence layer for the ledger,
//! round engine, bet book, and deposit indexer using plain PostgreSQL
//! tables (no TimescaleDB hypertables — none of these tables benefit from
//! time-partitioning the way the teacher's scan/death history did).
//!
//! # Type Conversions
//!
//! PostgreSQL uses signed integers (i16, i32, i64) for numeric columns while
//! our domain uses unsigned types. These casts are safe because:
//! - Op type / round status / bet status fit in i16 by construction
//! - Block numbers and round ids won't exceed i64::MAX
//! - ppm values (max ~10^15 for any realistic crash point) fit in i64
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless,
    clippy::use_self
)]

use std::collections::BTreeMap;

use alloy::primitives::B256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, postgres::PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{AppError, DomainError, InfraError, Result};
use crate::ports::{BetStore, DepositStore, LedgerStore, RoundStore};
use crate::types::entities::{Account, Bet, DepositSeen, IndexerCheckpoint, LedgerEntry, Round};
use crate::types::enums::{BetStatus, OpType, RoundStatus};
use crate::types::primitives::{BlockNumber, ClientId, EthAddress, Wei};

// ═══════════════════════════════════════════════════════════════════════════════
// POSTGRES STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// PostgreSQL-based store implementation.
///
/// Implements all store port traits using SQLx for database access.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| InfraError::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }
}

fn address_from_bytes(bytes: Vec<u8>) -> std::result::Result<EthAddress, InfraError> {
    let arr: [u8; 20] = bytes
        .try_into()
        .map_err(|_| InfraError::Database(sqlx::Error::Decode("invalid address length in DB".into())))?;
    Ok(EthAddress::new(arr))
}

fn hash32_from_bytes(bytes: Vec<u8>) -> std::result::Result<[u8; 32], InfraError> {
    bytes
        .try_into()
        .map_err(|_| InfraError::Database(sqlx::Error::Decode("invalid hash length in DB".into())))
}

fn b256_from_bytes(bytes: Vec<u8>) -> std::result::Result<B256, InfraError> {
    hash32_from_bytes(bytes).map(B256::from)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEDGER STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct AccountRow {
    user_id: Vec<u8>,
    available: sqlx::types::BigDecimal,
    locked: sqlx::types::BigDecimal,
    version: i64,
}

impl TryFrom<AccountRow> for Account {
    type Error = InfraError;

    fn try_from(row: AccountRow) -> std::result::Result<Self, Self::Error> {
        Ok(Account {
            user_id: address_from_bytes(row.user_id)?,
            available: Wei::from_bigdecimal(&row.available),
            locked: Wei::from_bigdecimal(&row.locked),
            version: row.version as u64,
        })
    }
}

#[derive(Debug, FromRow)]
struct LedgerEntryRow {
    id: Uuid,
    user_id: Vec<u8>,
    op_type: i16,
    amount: sqlx::types::BigDecimal,
    reference: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = InfraError;

    fn try_from(row: LedgerEntryRow) -> std::result::Result<Self, Self::Error> {
        let reference: BTreeMap<String, String> =
            serde_json::from_value(row.reference).map_err(InfraError::Serialization)?;
        Ok(LedgerEntry {
            id: row.id,
            user_id: address_from_bytes(row.user_id)?,
            op_type: OpType::try_from(row.op_type as u8).map_err(|e| {
                InfraError::Database(sqlx::Error::Decode(format!("invalid op_type in DB: {e}").into()))
            })?,
            amount: Wei::from_bigdecimal(&row.amount),
            reference,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn get_account(&self, user_id: &EthAddress) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT user_id, available, locked, version FROM accounts WHERE user_id = $1",
        )
        .bind(user_id.as_bytes())
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn get_or_create_account(&self, user_id: &EthAddress) -> Result<Account> {
        if let Some(account) = self.get_account(user_id).await? {
            return Ok(account);
        }

        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO accounts (user_id, available, locked, version)
            VALUES ($1, 0, 0, 0)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING user_id, available, locked, version
            "#,
        )
        .bind(user_id.as_bytes())
        .fetch_one(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        row.try_into().map_err(AppError::from)
    }

    #[instrument(skip(self, account, entry), fields(user_id = %account.user_id, op = entry.op_type.name()))]
    async fn apply_entry(&self, account: &Account, entry: &LedgerEntry) -> Result<Account> {
        // `account` carries the next `available`/`locked` balances computed
        // against the version the caller fetched; `account.version` itself
        // is still that fetched value. We verify the stored row is still at
        // that version before writing the new balances under `version + 1`,
        // which is what makes concurrent mutations on the same account
        // serialize instead of silently clobbering.
        let expected_version = account.version as i64;
        let next_version = (account.version + 1) as i64;

        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;

        let reference_json =
            serde_json::to_value(&entry.reference).map_err(InfraError::Serialization)?;

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, user_id, op_type, amount, reference, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(account.user_id.as_bytes())
        .bind(i16::from(entry.op_type))
        .bind(entry.amount.to_bigdecimal())
        .bind(reference_json)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Domain(DomainError::Contention(account.user_id.to_string()))
            } else {
                AppError::from(InfraError::Database(e))
            }
        })?;

        let result = sqlx::query(
            r#"
            UPDATE accounts SET available = $1, locked = $2, version = $3
            WHERE user_id = $4 AND version = $5
            "#,
        )
        .bind(account.available.to_bigdecimal())
        .bind(account.locked.to_bigdecimal())
        .bind(next_version)
        .bind(account.user_id.as_bytes())
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .map_err(InfraError::Database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::Domain(DomainError::Contention(
                account.user_id.to_string(),
            )));
        }

        tx.commit().await.map_err(InfraError::Database)?;

        let updated = Account { version: account.version + 1, ..account.clone() };
        debug!(version = updated.version, "Ledger entry applied");
        Ok(updated)
    }

    #[instrument(skip(self), fields(user_id = %user_id, client_id = client_id))]
    async fn find_entry_by_client_id(
        &self,
        user_id: &EthAddress,
        client_id: &str,
    ) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, LedgerEntryRow>(
            r#"
            SELECT id, user_id, op_type, amount, reference, created_at
            FROM ledger_entries
            WHERE user_id = $1 AND reference->>'client_id' = $2
            LIMIT 1
            "#,
        )
        .bind(user_id.as_bytes())
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(tx_hash = %tx_hash, log_index = log_index))]
    async fn find_deposit_entry(
        &self,
        tx_hash: B256,
        log_index: u64,
    ) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, LedgerEntryRow>(
            r#"
            SELECT id, user_id, op_type, amount, reference, created_at
            FROM ledger_entries
            WHERE reference->>'tx_hash' = $1 AND reference->>'log_index' = $2
            LIMIT 1
            "#,
        )
        .bind(tx_hash.to_string())
        .bind(log_index.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn total_liabilities(&self) -> Result<Wei> {
        let total: sqlx::types::BigDecimal =
            sqlx::query_scalar("SELECT COALESCE(SUM(available + locked), 0) FROM accounts")
                .fetch_one(&self.pool)
                .await
                .map_err(InfraError::Database)?;

        Ok(Wei::from_bigdecimal(&total))
    }

    #[instrument(skip(self), fields(user_id = %user_id, limit = limit))]
    async fn get_entries_for_user(
        &self,
        user_id: &EthAddress,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(
            r#"
            SELECT id, user_id, op_type, amount, reference, created_at
            FROM ledger_entries
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.as_bytes())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        rows.into_iter()
            .map(|r| LedgerEntry::try_from(r).map_err(Into::into))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUND STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct RoundRow {
    id: i64,
    commit_hash: Vec<u8>,
    server_seed: Option<String>,
    client_seed: String,
    nonce: i64,
    crash_point_ppm: i64,
    status: i16,
    started_at: Option<DateTime<Utc>>,
    settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<RoundRow> for Round {
    type Error = InfraError;

    fn try_from(row: RoundRow) -> std::result::Result<Self, Self::Error> {
        Ok(Round {
            id: row.id as u64,
            commit_hash: hash32_from_bytes(row.commit_hash)?,
            server_seed: row.server_seed,
            client_seed: row.client_seed,
            nonce: row.nonce as u64,
            crash_point_ppm: row.crash_point_ppm as u64,
            status: RoundStatus::try_from(row.status as u8).map_err(|e| {
                InfraError::Database(sqlx::Error::Decode(
                    format!("invalid round status in DB: {e}").into(),
                ))
            })?,
            started_at: row.started_at,
            settled_at: row.settled_at,
        })
    }
}

#[async_trait]
impl RoundStore for PostgresStore {
    #[instrument(skip(self))]
    async fn next_round_id(&self) -> Result<u64> {
        let id: i64 = sqlx::query_scalar("SELECT nextval('round_id_seq')")
            .fetch_one(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        Ok(id as u64)
    }

    #[instrument(skip(self, round), fields(round_id = round.id))]
    async fn save_round(&self, round: &Round) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rounds (
                id, commit_hash, server_seed, client_seed, nonce,
                crash_point_ppm, status, started_at, settled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(round.id as i64)
        .bind(round.commit_hash.as_slice())
        .bind(&round.server_seed)
        .bind(&round.client_seed)
        .bind(round.nonce as i64)
        .bind(round.crash_point_ppm as i64)
        .bind(i16::from(round.status))
        .bind(round.started_at)
        .bind(round.settled_at)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        debug!("Round saved");
        Ok(())
    }

    #[instrument(skip(self), fields(round_id = round_id, status = status.name()))]
    async fn update_round_status(&self, round_id: u64, status: RoundStatus) -> Result<()> {
        let result = sqlx::query("UPDATE rounds SET status = $1 WHERE id = $2")
            .bind(i16::from(status))
            .bind(round_id as i64)
            .execute(&self.pool)
            .await
            .map_err(InfraError::Database)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::RoundNotFound(round_id.to_string()).into());
        }
        Ok(())
    }

    #[instrument(skip(self, server_seed), fields(round_id = round_id))]
    async fn reveal_round(
        &self,
        round_id: u64,
        server_seed: &str,
        settled_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE rounds SET server_seed = $1, status = $2, settled_at = $3
            WHERE id = $4 AND status = $5
            "#,
        )
        .bind(server_seed)
        .bind(i16::from(RoundStatus::Settled))
        .bind(settled_at)
        .bind(round_id as i64)
        .bind(i16::from(RoundStatus::Running))
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::RoundAlreadyResolved(round_id.to_string()).into());
        }

        debug!("Round revealed");
        Ok(())
    }

    #[instrument(skip(self), fields(round_id = round_id))]
    async fn get_round(&self, round_id: u64) -> Result<Option<Round>> {
        let row = sqlx::query_as::<_, RoundRow>(
            r#"
            SELECT id, commit_hash, server_seed, client_seed, nonce,
                   crash_point_ppm, status, started_at, settled_at
            FROM rounds WHERE id = $1
            "#,
        )
        .bind(round_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(limit = limit))]
    async fn get_recent_rounds(&self, limit: u32) -> Result<Vec<Round>> {
        let rows = sqlx::query_as::<_, RoundRow>(
            r#"
            SELECT id, commit_hash, server_seed, client_seed, nonce,
                   crash_point_ppm, status, started_at, settled_at
            FROM rounds
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        rows.into_iter()
            .map(|r| Round::try_from(r).map_err(Into::into))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BET STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct BetRow {
    round_id: i64,
    user_id: Vec<u8>,
    stake: sqlx::types::BigDecimal,
    auto_cashout_ppm: Option<i64>,
    status: i16,
    cashout_ppm: Option<i64>,
    client_id: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<BetRow> for Bet {
    type Error = InfraError;

    fn try_from(row: BetRow) -> std::result::Result<Self, Self::Error> {
        Ok(Bet {
            round_id: row.round_id as u64,
            user_id: address_from_bytes(row.user_id)?,
            stake: Wei::from_bigdecimal(&row.stake),
            auto_cashout_ppm: row.auto_cashout_ppm.map(|v| v as u64),
            status: BetStatus::try_from(row.status as u8).map_err(|e| {
                InfraError::Database(sqlx::Error::Decode(
                    format!("invalid bet status in DB: {e}").into(),
                ))
            })?,
            cashout_ppm: row.cashout_ppm.map(|v| v as u64),
            client_id: ClientId::new(row.client_id).map_err(|e| {
                InfraError::Database(sqlx::Error::Decode(
                    format!("invalid client_id in DB: {e}").into(),
                ))
            })?,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl BetStore for PostgresStore {
    #[instrument(skip(self, bet), fields(round_id = bet.round_id, user_id = %bet.user_id))]
    async fn place_bet(&self, bet: &Bet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bets (
                round_id, user_id, stake, auto_cashout_ppm, status,
                cashout_ppm, client_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(bet.round_id as i64)
        .bind(bet.user_id.as_bytes())
        .bind(bet.stake.to_bigdecimal())
        .bind(bet.auto_cashout_ppm.map(|v| v as i64))
        .bind(i16::from(bet.status))
        .bind(bet.cashout_ppm.map(|v| v as i64))
        .bind(bet.client_id.as_str())
        .bind(bet.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Domain(DomainError::DuplicateBet(bet.client_id.as_str().to_string()))
            } else {
                AppError::from(InfraError::Database(e))
            }
        })?;

        debug!("Bet placed");
        Ok(())
    }

    #[instrument(skip(self), fields(round_id = round_id, user_id = %user_id))]
    async fn get_bet(&self, round_id: u64, user_id: &EthAddress) -> Result<Option<Bet>> {
        let row = sqlx::query_as::<_, BetRow>(
            r#"
            SELECT round_id, user_id, stake, auto_cashout_ppm, status,
                   cashout_ppm, client_id, created_at
            FROM bets WHERE round_id = $1 AND user_id = $2
            "#,
        )
        .bind(round_id as i64)
        .bind(user_id.as_bytes())
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(round_id = round_id))]
    async fn get_bets_for_round(&self, round_id: u64) -> Result<Vec<Bet>> {
        let rows = sqlx::query_as::<_, BetRow>(
            r#"
            SELECT round_id, user_id, stake, auto_cashout_ppm, status,
                   cashout_ppm, client_id, created_at
            FROM bets WHERE round_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(round_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        rows.into_iter()
            .map(|r| Bet::try_from(r).map_err(Into::into))
            .collect()
    }

    #[instrument(skip(self), fields(round_id = round_id, user_id = %user_id, status = status.name()))]
    async fn update_bet_status(
        &self,
        round_id: u64,
        user_id: &EthAddress,
        status: BetStatus,
        cashout_ppm: Option<u64>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE bets SET status = $1, cashout_ppm = $2 WHERE round_id = $3 AND user_id = $4",
        )
        .bind(i16::from(status))
        .bind(cashout_ppm.map(|v| v as i64))
        .bind(round_id as i64)
        .bind(user_id.as_bytes())
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NoActiveBet(user_id.to_string()).into());
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, limit = limit))]
    async fn get_user_bets(&self, user_id: &EthAddress, limit: u32) -> Result<Vec<Bet>> {
        let rows = sqlx::query_as::<_, BetRow>(
            r#"
            SELECT round_id, user_id, stake, auto_cashout_ppm, status,
                   cashout_ppm, client_id, created_at
            FROM bets WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.as_bytes())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        rows.into_iter()
            .map(|r| Bet::try_from(r).map_err(Into::into))
            .collect()
    }

    #[instrument(skip(self), fields(client_id = client_id))]
    async fn find_bet_by_client_id(&self, client_id: &str) -> Result<Option<Bet>> {
        let row = sqlx::query_as::<_, BetRow>(
            r#"
            SELECT round_id, user_id, stake, auto_cashout_ppm, status,
                   cashout_ppm, client_id, created_at
            FROM bets WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEPOSIT STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, FromRow)]
struct DepositRow {
    tx_hash: Vec<u8>,
    log_index: i64,
    block_number: i64,
    from_address: Vec<u8>,
    amount: sqlx::types::BigDecimal,
    processed_at: DateTime<Utc>,
}

impl TryFrom<DepositRow> for DepositSeen {
    type Error = InfraError;

    fn try_from(row: DepositRow) -> std::result::Result<Self, Self::Error> {
        Ok(DepositSeen {
            tx_hash: b256_from_bytes(row.tx_hash)?,
            log_index: row.log_index as u64,
            block_number: BlockNumber::new(row.block_number as u64),
            from_address: address_from_bytes(row.from_address)?,
            amount: Wei::from_bigdecimal(&row.amount),
            processed_at: row.processed_at,
        })
    }
}

#[async_trait]
impl DepositStore for PostgresStore {
    #[instrument(skip(self, deposit), fields(tx_hash = %deposit.tx_hash, log_index = deposit.log_index))]
    async fn record_deposit(&self, deposit: &DepositSeen) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO deposits_seen (
                tx_hash, log_index, block_number, from_address, amount, processed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(deposit.tx_hash.as_slice())
        .bind(deposit.log_index as i64)
        .bind(deposit.block_number.get() as i64)
        .bind(deposit.from_address.as_bytes())
        .bind(deposit.amount.to_bigdecimal())
        .bind(deposit.processed_at)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(tx_hash = %tx_hash, log_index = log_index))]
    async fn get_deposit(&self, tx_hash: B256, log_index: u64) -> Result<Option<DepositSeen>> {
        let row = sqlx::query_as::<_, DepositRow>(
            r#"
            SELECT tx_hash, log_index, block_number, from_address, amount, processed_at
            FROM deposits_seen WHERE tx_hash = $1 AND log_index = $2
            "#,
        )
        .bind(tx_hash.as_slice())
        .bind(log_index as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn get_checkpoint(&self) -> Result<IndexerCheckpoint> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT last_scanned_block, last_finalized_block FROM indexer_checkpoint WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(match row {
            Some((scanned, finalized)) => IndexerCheckpoint {
                last_scanned_block: BlockNumber::new(scanned as u64),
                last_finalized_block: BlockNumber::new(finalized as u64),
            },
            None => IndexerCheckpoint::genesis(),
        })
    }

    #[instrument(skip(self), fields(scanned = %checkpoint.last_scanned_block, finalized = %checkpoint.last_finalized_block))]
    async fn set_checkpoint(&self, checkpoint: IndexerCheckpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO indexer_checkpoint (id, last_scanned_block, last_finalized_block)
            VALUES (1, $1, $2)
            ON CONFLICT (id) DO UPDATE SET
                last_scanned_block = EXCLUDED.last_scanned_block,
                last_finalized_block = EXCLUDED.last_finalized_block
            "#,
        )
        .bind(checkpoint.last_scanned_block.get() as i64)
        .bind(checkpoint.last_finalized_block.get() as i64)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    // Full integration tests require a PostgreSQL database and live in
    // tests/store_integration.rs.

    #[test]
    fn postgres_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresStore>();
    }
}
