//! Integration tests for `PostgresStore` against a real Postgres instance.

mod common;

use alloy::primitives::B256;
use chrono::Utc;
use common::fixtures::TestDb;
use crash_engine::ports::{BetStore, DepositStore, LedgerStore, RoundStore};
use crash_engine::types::entities::{Account, Bet, DepositSeen, IndexerCheckpoint, LedgerEntry, Round};
use crash_engine::types::enums::{BetStatus, OpType, RoundStatus};
use crash_engine::types::primitives::{BlockNumber, ClientId, EthAddress, Wei};

fn sample_address(byte: u8) -> EthAddress {
    let mut bytes = [0u8; 20];
    bytes[19] = byte;
    EthAddress::from_slice(&bytes).expect("valid address")
}

fn sample_round(id: u64) -> Round {
    Round {
        id,
        commit_hash: [id as u8; 32],
        server_seed: None,
        client_seed: "client-seed".to_string(),
        nonce: id,
        crash_point_ppm: 2_000_000,
        status: RoundStatus::Pending,
        started_at: None,
        settled_at: None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEDGER STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn get_or_create_account_is_idempotent() {
    let db = TestDb::new().await;
    let user = sample_address(1);

    let first = db.store.get_or_create_account(&user).await.unwrap();
    let second = db.store.get_or_create_account(&user).await.unwrap();

    assert_eq!(first, second);
    assert!(first.total().is_zero());
}

#[tokio::test]
async fn apply_entry_persists_new_balance_and_bumps_version() {
    let db = TestDb::new().await;
    let user = sample_address(2);
    let account = db.store.get_or_create_account(&user).await.unwrap();

    let mut reference = std::collections::BTreeMap::new();
    reference.insert("tx_hash".to_string(), "0xabc".to_string());
    reference.insert("log_index".to_string(), "0".to_string());
    let entry = LedgerEntry {
        id: uuid::Uuid::now_v7(),
        user_id: user,
        op_type: OpType::Deposit,
        amount: Wei::from_u128(1_000),
        reference,
        created_at: Utc::now(),
    };
    let mut updated = account.clone();
    updated.available = updated.available.saturating_add(entry.amount);

    let persisted = db.store.apply_entry(&updated, &entry).await.unwrap();
    assert_eq!(persisted.available, Wei::from_u128(1_000));
    assert_eq!(persisted.version, account.version + 1);

    let reread = db.store.get_account(&user).await.unwrap().expect("account exists");
    assert_eq!(reread.available, Wei::from_u128(1_000));
}

#[tokio::test]
async fn apply_entry_rejects_stale_version() {
    let db = TestDb::new().await;
    let user = sample_address(3);
    let account = db.store.get_or_create_account(&user).await.unwrap();

    let mut reference = std::collections::BTreeMap::new();
    reference.insert("client_id".to_string(), "lock-1".to_string());
    let entry = LedgerEntry {
        id: uuid::Uuid::now_v7(),
        user_id: user,
        op_type: OpType::LockBet,
        amount: Wei::from_u128(10),
        reference,
        created_at: Utc::now(),
    };
    let mut updated = account.clone();
    updated.locked = updated.locked.saturating_add(entry.amount);

    db.store.apply_entry(&updated, &entry).await.unwrap();

    // Retrying against the now-stale `account` snapshot must fail the
    // optimistic concurrency check rather than silently overwrite.
    let stale_result = db.store.apply_entry(&updated, &entry).await;
    assert!(stale_result.is_err());
}

#[tokio::test]
async fn ledger_entries_enforce_client_id_idempotency_per_user() {
    let db = TestDb::new().await;
    let user = sample_address(4);
    let account = db.store.get_or_create_account(&user).await.unwrap();

    let mut reference = std::collections::BTreeMap::new();
    reference.insert("client_id".to_string(), "withdraw-1".to_string());
    let entry = LedgerEntry {
        id: uuid::Uuid::now_v7(),
        user_id: user,
        op_type: OpType::Withdraw,
        amount: Wei::from_u128(5),
        reference: reference.clone(),
        created_at: Utc::now(),
    };
    db.store.apply_entry(&account, &entry).await.unwrap();

    let found = db.store.find_entry_by_client_id(&user, "withdraw-1").await.unwrap();
    assert!(found.is_some());
    assert_eq!(found.unwrap().id, entry.id);

    // A second entry with the same (user, client_id) must violate the
    // partial unique index rather than be silently accepted.
    let duplicate = LedgerEntry { id: uuid::Uuid::now_v7(), ..entry };
    let result = db.store.apply_entry(&account, &duplicate).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn ledger_entries_enforce_deposit_idempotency_on_tx_and_log_index() {
    let db = TestDb::new().await;
    let user = sample_address(5);
    let account = db.store.get_or_create_account(&user).await.unwrap();

    let mut reference = std::collections::BTreeMap::new();
    reference.insert("tx_hash".to_string(), "0xdeadbeef".to_string());
    reference.insert("log_index".to_string(), "2".to_string());
    let entry = LedgerEntry {
        id: uuid::Uuid::now_v7(),
        user_id: user,
        op_type: OpType::Deposit,
        amount: Wei::from_u128(500),
        reference,
        created_at: Utc::now(),
    };
    db.store.apply_entry(&account, &entry).await.unwrap();

    let found = db.store.find_deposit_entry(B256::ZERO, 2).await.unwrap();
    // find_deposit_entry matches on the reference fields, not tx_hash
    // equality against a zero hash, so this only confirms the lookup runs
    // without error; the duplicate-insert check below is the real assertion.
    let _ = found;

    let duplicate = LedgerEntry { id: uuid::Uuid::now_v7(), ..entry };
    let result = db.store.apply_entry(&account, &duplicate).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn total_liabilities_sums_locked_balances() {
    let db = TestDb::new().await;
    let a = sample_address(6);
    let b = sample_address(7);

    let account_a = db.store.get_or_create_account(&a).await.unwrap();
    let mut reference = std::collections::BTreeMap::new();
    reference.insert("client_id".to_string(), "lock-a".to_string());
    let entry_a = LedgerEntry {
        id: uuid::Uuid::now_v7(),
        user_id: a,
        op_type: OpType::LockBet,
        amount: Wei::from_u128(100),
        reference,
        created_at: Utc::now(),
    };
    let mut updated_a = account_a.clone();
    updated_a.locked = Wei::from_u128(100);
    db.store.apply_entry(&updated_a, &entry_a).await.unwrap();

    let account_b = db.store.get_or_create_account(&b).await.unwrap();
    let mut reference_b = std::collections::BTreeMap::new();
    reference_b.insert("client_id".to_string(), "lock-b".to_string());
    let entry_b = LedgerEntry {
        id: uuid::Uuid::now_v7(),
        user_id: b,
        op_type: OpType::LockBet,
        amount: Wei::from_u128(250),
        reference: reference_b,
        created_at: Utc::now(),
    };
    let mut updated_b = account_b.clone();
    updated_b.locked = Wei::from_u128(250);
    db.store.apply_entry(&updated_b, &entry_b).await.unwrap();

    let total = db.store.total_liabilities().await.unwrap();
    assert_eq!(total, Wei::from_u128(350));
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUND STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn next_round_id_is_strictly_increasing() {
    let db = TestDb::new().await;
    let first = db.store.next_round_id().await.unwrap();
    let second = db.store.next_round_id().await.unwrap();
    assert!(second > first);
}

#[tokio::test]
async fn save_and_get_round_round_trips() {
    let db = TestDb::new().await;
    let id = db.store.next_round_id().await.unwrap();
    let round = sample_round(id);
    db.store.save_round(&round).await.unwrap();

    let fetched = db.store.get_round(id).await.unwrap().expect("round exists");
    assert_eq!(fetched.commit_hash, round.commit_hash);
    assert_eq!(fetched.status, RoundStatus::Pending);
    assert!(fetched.server_seed.is_none());
}

#[tokio::test]
async fn reveal_round_sets_seed_and_settles_only_from_running() {
    let db = TestDb::new().await;
    let id = db.store.next_round_id().await.unwrap();
    let mut round = sample_round(id);
    round.status = RoundStatus::Running;
    db.store.save_round(&round).await.unwrap();

    db.store.reveal_round(id, "revealed-seed", Utc::now()).await.unwrap();

    let fetched = db.store.get_round(id).await.unwrap().expect("round exists");
    assert_eq!(fetched.server_seed.as_deref(), Some("revealed-seed"));
    assert_eq!(fetched.status, RoundStatus::Settled);
}

#[tokio::test]
async fn reveal_round_twice_fails_on_second_attempt() {
    let db = TestDb::new().await;
    let id = db.store.next_round_id().await.unwrap();
    let mut round = sample_round(id);
    round.status = RoundStatus::Running;
    db.store.save_round(&round).await.unwrap();

    db.store.reveal_round(id, "seed-1", Utc::now()).await.unwrap();
    let second = db.store.reveal_round(id, "seed-2", Utc::now()).await;
    assert!(second.is_err());
}

// ═══════════════════════════════════════════════════════════════════════════════
// BET STORE
// ═══════════════════════════════════════════════════════════════════════════════

fn sample_bet(round_id: u64, user_id: EthAddress, client_id: &str) -> Bet {
    Bet {
        round_id,
        user_id,
        stake: Wei::from_u128(1_000_000_000_000_000_000),
        auto_cashout_ppm: None,
        status: BetStatus::Active,
        cashout_ppm: None,
        client_id: ClientId::new(client_id).unwrap(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn place_bet_and_get_bet_round_trip() {
    let db = TestDb::new().await;
    let round_id = db.store.next_round_id().await.unwrap();
    db.store.save_round(&sample_round(round_id)).await.unwrap();
    let user = sample_address(8);
    db.store.get_or_create_account(&user).await.unwrap();

    let bet = sample_bet(round_id, user, "bet-1");
    db.store.place_bet(&bet).await.unwrap();

    let fetched = db.store.get_bet(round_id, &user).await.unwrap().expect("bet exists");
    assert_eq!(fetched.stake, bet.stake);
    assert_eq!(fetched.status, BetStatus::Active);
}

#[tokio::test]
async fn duplicate_client_id_rejected_across_different_rounds() {
    let db = TestDb::new().await;
    let round_one = db.store.next_round_id().await.unwrap();
    db.store.save_round(&sample_round(round_one)).await.unwrap();
    let round_two = db.store.next_round_id().await.unwrap();
    db.store.save_round(&sample_round(round_two)).await.unwrap();

    let user_a = sample_address(9);
    let user_b = sample_address(10);
    db.store.get_or_create_account(&user_a).await.unwrap();
    db.store.get_or_create_account(&user_b).await.unwrap();

    db.store.place_bet(&sample_bet(round_one, user_a, "shared-client-id")).await.unwrap();
    let result = db.store.place_bet(&sample_bet(round_two, user_b, "shared-client-id")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn update_bet_status_transitions_and_records_cashout() {
    let db = TestDb::new().await;
    let round_id = db.store.next_round_id().await.unwrap();
    db.store.save_round(&sample_round(round_id)).await.unwrap();
    let user = sample_address(11);
    db.store.get_or_create_account(&user).await.unwrap();
    db.store.place_bet(&sample_bet(round_id, user, "bet-cashout")).await.unwrap();

    db.store.update_bet_status(round_id, &user, BetStatus::Won, Some(2_500_000)).await.unwrap();

    let fetched = db.store.get_bet(round_id, &user).await.unwrap().expect("bet exists");
    assert_eq!(fetched.status, BetStatus::Won);
    assert_eq!(fetched.cashout_ppm, Some(2_500_000));
}

#[tokio::test]
async fn find_bet_by_client_id_finds_existing_placement() {
    let db = TestDb::new().await;
    let round_id = db.store.next_round_id().await.unwrap();
    db.store.save_round(&sample_round(round_id)).await.unwrap();
    let user = sample_address(12);
    db.store.get_or_create_account(&user).await.unwrap();
    db.store.place_bet(&sample_bet(round_id, user, "findable")).await.unwrap();

    let found = db.store.find_bet_by_client_id("findable").await.unwrap();
    assert!(found.is_some());
    assert!(db.store.find_bet_by_client_id("does-not-exist").await.unwrap().is_none());
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEPOSIT STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn record_deposit_dedups_on_tx_hash_and_log_index() {
    let db = TestDb::new().await;
    let deposit = DepositSeen {
        tx_hash: B256::repeat_byte(0x11),
        log_index: 0,
        block_number: BlockNumber::new(100),
        from_address: sample_address(13),
        amount: Wei::from_u128(42),
        processed_at: Utc::now(),
    };

    let first = db.store.record_deposit(&deposit).await.unwrap();
    assert!(first, "first observation should be newly recorded");

    let second = db.store.record_deposit(&deposit).await.unwrap();
    assert!(!second, "repeat observation must be reported as already seen");

    let fetched = db.store.get_deposit(deposit.tx_hash, deposit.log_index).await.unwrap();
    assert!(fetched.is_some());
}

#[tokio::test]
async fn checkpoint_round_trips_and_advances() {
    let db = TestDb::new().await;
    let genesis = db.store.get_checkpoint().await.unwrap();
    assert_eq!(genesis, IndexerCheckpoint::genesis());

    let advanced = IndexerCheckpoint {
        last_scanned_block: BlockNumber::new(500),
        last_finalized_block: BlockNumber::new(480),
    };
    db.store.set_checkpoint(advanced).await.unwrap();

    let fetched = db.store.get_checkpoint().await.unwrap();
    assert_eq!(fetched, advanced);
}
