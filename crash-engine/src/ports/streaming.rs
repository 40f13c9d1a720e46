//! Streaming port for the in-process event fan-out bus.
//!
//! Defines the contract for broadcasting round-engine and ledger events to
//! connected WebSocket sessions (C6). Unlike the teacher's Iggy-backed
//! publisher, this fan-out never leaves the process: a crash round ticks
//! tens of times a second and every event must reach every open session
//! with sub-tick latency, which a broker round-trip would not give us.
//! Durability across process restarts is not required — a reconnecting
//! client resumes from its last seen `seq`, or falls back to a fresh
//! snapshot if the bus can no longer supply the gap.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::events::{EventEnvelope, GameEvent};
use crate::types::primitives::EthAddress;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT BUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for the in-process event fan-out bus.
///
/// # Resume Semantics
///
/// Every published event is assigned a monotonically increasing `seq` and
/// kept in a bounded ring buffer. A session that disconnects and
/// reconnects supplies the last `seq` it saw:
/// - If that `seq` is still in the ring buffer, `resume_since` replays
///   exactly the missed events.
/// - If it has already been evicted, `resume_since` returns `None` and the
///   caller must instead fetch a fresh snapshot (current round state, live
///   balances) and resubscribe from `current_seq()`.
///
/// # Implementation Notes
///
/// Implementations should:
/// - Use a single `tokio::sync::broadcast` channel (or equivalent) per
///   process so every subscriber observes the same total order
/// - Size the backing ring buffer so that the event volume of one crash
///   round's `running_phase` (a tick every `TICK_INTERVAL_MS`) comfortably
///   fits, per the configured retention window
/// - Route private events (see `GameEvent::is_private`) only to the
///   subscriber whose `user_id` matches, never onto the public stream
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event, assigning it the next sequence number.
    ///
    /// Returns the assigned `seq`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus has no capacity to accept the event
    /// (e.g. the underlying channel was dropped).
    async fn publish(&self, event: GameEvent) -> Result<u64>;

    /// Subscribe to the live event stream from this point forward.
    ///
    /// The returned receiver starts delivering events published after the
    /// call to `subscribe` returns.
    fn subscribe(&self) -> broadcast::Receiver<EventEnvelope>;

    /// The sequence number that will be assigned to the next published
    /// event.
    fn current_seq(&self) -> u64;

    /// Replay events after `last_seq`, if they are still retained.
    ///
    /// Returns `None` if `last_seq` is older than the bus's retention
    /// window and the caller should fall back to a snapshot instead.
    fn resume_since(&self, last_seq: u64) -> Option<Vec<EventEnvelope>>;

    /// Whether the bus currently has at least one active subscriber.
    fn has_subscribers(&self) -> bool;
}

#[async_trait]
impl<T: EventBus + ?Sized> EventBus for std::sync::Arc<T> {
    async fn publish(&self, event: GameEvent) -> Result<u64> {
        (**self).publish(event).await
    }

    fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        (**self).subscribe()
    }

    fn current_seq(&self) -> u64 {
        (**self).current_seq()
    }

    fn resume_since(&self, last_seq: u64) -> Option<Vec<EventEnvelope>> {
        (**self).resume_since(last_seq)
    }

    fn has_subscribers(&self) -> bool {
        (**self).has_subscribers()
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks {
    //! Mock implementations for testing.

    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory event bus for tests: a `tokio::sync::broadcast` channel
    /// plus an unbounded history vector standing in for the ring buffer.
    #[derive(Debug)]
    pub struct MockEventBus {
        sender: broadcast::Sender<EventEnvelope>,
        seq: AtomicU64,
        history: Mutex<Vec<EventEnvelope>>,
    }

    impl MockEventBus {
        /// Create a new mock bus with the given channel capacity.
        #[must_use]
        pub fn new(capacity: usize) -> Self {
            let (sender, _) = broadcast::channel(capacity);
            Self {
                sender,
                seq: AtomicU64::new(0),
                history: Mutex::new(Vec::new()),
            }
        }
    }

    impl Default for MockEventBus {
        fn default() -> Self {
            Self::new(1024)
        }
    }

    #[async_trait]
    impl EventBus for MockEventBus {
        async fn publish(&self, event: GameEvent) -> Result<u64> {
            let seq = self.seq.fetch_add(1, Ordering::SeqCst);
            let envelope = EventEnvelope {
                seq,
                emitted_at: chrono::Utc::now(),
                event,
            };
            self.history
                .lock()
                .expect("lock poisoned")
                .push(envelope.clone());
            // A broadcast send errors only when there are zero receivers,
            // which is a normal idle state, not a failure to report.
            let _ = self.sender.send(envelope);
            Ok(seq)
        }

        fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
            self.sender.subscribe()
        }

        fn current_seq(&self) -> u64 {
            self.seq.load(Ordering::SeqCst)
        }

        fn resume_since(&self, last_seq: u64) -> Option<Vec<EventEnvelope>> {
            let history = self.history.lock().expect("lock poisoned");
            Some(
                history
                    .iter()
                    .filter(|e| e.seq > last_seq)
                    .cloned()
                    .collect(),
            )
        }

        fn has_subscribers(&self) -> bool {
            self.sender.receiver_count() > 0
        }
    }
}
