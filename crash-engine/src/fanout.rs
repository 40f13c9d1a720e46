//! Production event fan-out (C6): a process-wide broadcast of [`GameEvent`]s
//! to every connected session, with a bounded resume buffer for
//! reconnecting clients.
//!
//! Grounded on [`crate::ports::streaming::mocks::MockEventBus`]'s shape —
//! one `tokio::sync::broadcast::Sender` shared by every subscriber, plus a
//! history buffer standing in for the wire-level resume log. The only
//! difference here is that the history is pruned by wall-clock age rather
//! than kept forever, since a real process runs for days and an unbounded
//! `Vec` would not do.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::Result;
use crate::ports::EventBus;
use crate::types::events::{EventEnvelope, GameEvent};

/// `tokio::sync::broadcast`'s own channel capacity. Sized generously above
/// any single tick's fan-out burst (`LiveBettingTable` plus a handful of
/// bet-lifecycle events) so a momentarily slow subscriber lags rather than
/// drops a live event outright; `resume_since` is the real safety net for
/// that case.
const CHANNEL_CAPACITY: usize = 4096;

/// In-process event bus with a time-bounded resume buffer.
///
/// A subscriber that falls behind the broadcast channel's own lag window
/// will see `RecvError::Lagged` from `subscribe()`'s receiver; the caller
/// is expected to fall back to `resume_since` (or a full snapshot) in that
/// case, the same as it would for a cold reconnect.
#[derive(Debug)]
pub struct EventFanout {
    sender: broadcast::Sender<EventEnvelope>,
    seq: AtomicU64,
    history: Mutex<VecDeque<EventEnvelope>>,
    retention: Duration,
}

impl EventFanout {
    /// Construct a fan-out bus retaining published events for `retention`.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            seq: AtomicU64::new(0),
            history: Mutex::new(VecDeque::new()),
            retention,
        }
    }

    /// Drop history entries older than `retention`. Called opportunistically
    /// on every publish rather than on a timer, since publish frequency
    /// during `running_phase` is already high enough to keep the buffer
    /// tight without a separate sweep task.
    fn prune(&self, history: &mut VecDeque<EventEnvelope>) {
        let cutoff = Utc::now() - self.retention;
        let mut dropped = 0usize;
        while let Some(front) = history.front() {
            if front.emitted_at < cutoff {
                history.pop_front();
                dropped += 1;
            } else {
                break;
            }
        }
        if dropped > 0 {
            debug!(dropped, "pruned aged-out events from resume buffer");
        }
    }
}

#[async_trait]
impl EventBus for EventFanout {
    async fn publish(&self, event: GameEvent) -> Result<u64> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            seq,
            emitted_at: Utc::now(),
            event,
        };

        {
            let mut history = self.history.lock().expect("lock poisoned");
            self.prune(&mut history);
            history.push_back(envelope.clone());
        }

        // Zero receivers is the normal idle state between sessions, not a
        // failure worth surfacing to the caller.
        if self.sender.send(envelope).is_err() && self.sender.receiver_count() > 0 {
            warn!("event bus send failed despite active receivers");
        }

        Ok(seq)
    }

    fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    fn resume_since(&self, last_seq: u64) -> Option<Vec<EventEnvelope>> {
        let mut history = self.history.lock().expect("lock poisoned");
        self.prune(&mut history);

        if let Some(oldest) = history.front() {
            if oldest.seq > last_seq + 1 {
                // The gap starts before our retained window; the caller
                // needs a fresh snapshot instead of a partial replay.
                return None;
            }
        } else if last_seq + 1 < self.current_seq() {
            // History is empty (or just pruned to empty) but events have
            // been published since `last_seq` — the gap can't be filled.
            return None;
        }

        Some(history.iter().filter(|e| e.seq > last_seq).cloned().collect())
    }

    fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
