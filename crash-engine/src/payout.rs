//! Payout Dispatcher (C9): submits on-chain transfers for approved
//! withdrawals.
//!
//! By the time a [`PayoutRequest`] reaches this module the ledger debit has
//! already committed (`Ledger::withdraw` in [`crate::api`]'s `withdraw`
//! handler runs first); a failed or stuck on-chain submission never rolls
//! the debit back. Recovery from a failed payout is an explicit admin
//! `adjustment`, never an automatic re-credit, so the same funds can never
//! be paid out twice from one withdrawal request.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::api::PayoutRequest;
use crate::ports::{ChainClient, EventBus};
use crate::types::events::{GameEvent, PayoutFailedEvent, PayoutSuccessEvent};
use crate::types::primitives::{EthAddress, Wei};

/// Maximum attempts before a payout is abandoned and surfaced as
/// permanently failed. A stuck nonce or an RPC outage should not retry
/// forever and starve the queue behind it.
const MAX_ATTEMPTS: u32 = 5;

/// Backoff between retries of the same payout.
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Drives the withdraw-to-on-chain-transfer pipeline from the receiving end
/// of [`AppState::payouts`](crate::api::AppState::payouts).
pub struct PayoutDispatcher<CC, EB> {
    receiver: mpsc::Receiver<PayoutRequest>,
    chain: CC,
    events: EB,
    hot_wallet: EthAddress,
    min_reserve_wei: Wei,
}

impl<CC, EB> PayoutDispatcher<CC, EB>
where
    CC: ChainClient,
    EB: EventBus,
{
    /// Construct a dispatcher around the receiving half of the payout
    /// channel whose sender lives in `AppState`. `hot_wallet` is the
    /// address `chain` signs payouts from, used only to poll its own
    /// reserve balance after each successful send.
    #[must_use]
    pub fn new(
        receiver: mpsc::Receiver<PayoutRequest>,
        chain: CC,
        events: EB,
        hot_wallet: EthAddress,
        min_reserve_wei: Wei,
    ) -> Self {
        Self { receiver, chain, events, hot_wallet, min_reserve_wei }
    }

    /// Drain the queue until the channel's sender half is dropped (process
    /// shutdown). Intended to be spawned as a long-lived background task.
    pub async fn run(mut self) {
        while let Some(request) = self.receiver.recv().await {
            self.dispatch(request).await;
        }
        info!("payout dispatcher shutting down, channel closed");
    }

    /// Submit one payout, retrying transient failures up to `MAX_ATTEMPTS`
    /// times before surfacing it as failed.
    #[instrument(skip(self), fields(user = %request.user_id, amount = %request.amount))]
    async fn dispatch(&self, request: PayoutRequest) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.chain.send_transfer(request.user_id, request.amount).await {
                Ok(tx_hash) => {
                    info!(tx_hash = %tx_hash, attempt, "payout submitted");
                    let _ = self
                        .events
                        .publish(GameEvent::PayoutSuccess(PayoutSuccessEvent {
                            user_id: request.user_id,
                            amount: request.amount,
                            tx_hash: tx_hash.to_string(),
                        }))
                        .await;
                    self.check_reserve().await;
                    return;
                }
                Err(err) if attempt < MAX_ATTEMPTS => {
                    warn!(error = %err, attempt, "payout submission failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(err) => {
                    error!(error = %err, attempt, "payout submission exhausted retries, abandoning");
                    let _ = self
                        .events
                        .publish(GameEvent::PayoutFailed(PayoutFailedEvent {
                            user_id: request.user_id,
                            amount: request.amount,
                            reason: "PAYOUT_FAILED".to_string(),
                        }))
                        .await;
                    return;
                }
            }
        }
    }

    /// Compare the hot wallet's live balance against `min_reserve_wei`.
    ///
    /// There is no automated cross-wallet top-up transfer here: this
    /// process holds only the hot wallet's key, never the house wallet's,
    /// so replenishment cannot be self-service. A reserve breach is
    /// therefore an operational alert, not a silent remediation.
    async fn check_reserve(&self) {
        let Ok(balance) = self.chain.balance_of(self.hot_wallet).await else {
            return;
        };
        metrics::gauge!("crash_engine_hot_wallet_balance_wei").set(wei_to_f64(balance));
        if balance < self.min_reserve_wei {
            warn!(
                balance = %balance,
                min_reserve = %self.min_reserve_wei,
                "hot wallet reserve below configured floor, top-up required"
            );
        }
    }
}

fn wei_to_f64(amount: Wei) -> f64 {
    // Lossy by design: this feeds a gauge for dashboards, never ledger math.
    amount.as_u256().to_string().parse().unwrap_or(f64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ports::chain::mocks::MockChainClient;
    use crate::ports::streaming::mocks::MockEventBus;
    use crate::types::primitives::{BlockNumber, ClientId, EthAddress};

    fn sample_address() -> EthAddress {
        EthAddress::from_hex("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap()
    }

    #[tokio::test]
    async fn successful_payout_publishes_success_event() {
        let chain = MockChainClient::new(BlockNumber::new(1), Wei::from_u128(1_000_000_000_000_000_000_000));
        let events = MockEventBus::default();
        let mut subscriber = events.subscribe();
        let (tx, rx) = mpsc::channel(8);
        let dispatcher = PayoutDispatcher::new(rx, chain, events, sample_address(), Wei::from_u128(10));

        tx.send(PayoutRequest {
            user_id: sample_address(),
            amount: Wei::from_u128(500),
            client_id: ClientId::new("withdraw-1").unwrap(),
        })
        .await
        .unwrap();
        drop(tx);

        dispatcher.run().await;

        let envelope = subscriber.recv().await.expect("event delivered");
        assert!(matches!(envelope.event, GameEvent::PayoutSuccess(_)));
    }
}
