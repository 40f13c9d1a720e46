//! Solvency Gate (C4): bounds the house's aggregate potential liability
//! against hot-wallet reserves.
//!
//! State lives entirely in memory — a crash restart rebuilds it from every
//! currently `active`/`queued` bet, never from a persisted aggregate. The gate
//! has exactly one writer in practice (the Round Engine's bet-intake and
//! settlement paths), but is `Send + Sync` so it can be shared behind an
//! `Arc` without the engine needing to serialize access itself.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{instrument, warn};

use crate::error::{AppError, DomainError, Result};
use crate::types::primitives::{EthAddress, Ppm, Wei};

/// Inner state, mutated as one unit so `total` never drifts from the sum of
/// `liability`'s values.
#[derive(Debug, Default)]
struct SolvencyState {
    liability: HashMap<EthAddress, Wei>,
    total: Wei,
    emergency_mode: bool,
}

/// Thresholds the gate evaluates admission against, read from
/// `GameSettings`.
#[derive(Debug, Clone, Copy)]
pub struct SolvencyLimits {
    /// Wei that must remain in the hot wallet beyond any admitted liability.
    pub min_reserve_wei: Wei,
    /// `new_total <= reserves * max_liability_ratio` is required to admit a
    /// bet.
    pub max_liability_ratio: f64,
    /// `new_total > reserves * emergency_threshold` flips `emergency_mode`.
    pub emergency_threshold: f64,
}

/// In-memory liability ledger and bet-admission policy.
#[derive(Debug, Default)]
pub struct SolvencyGate {
    state: RwLock<SolvencyState>,
    limits: SolvencyLimits,
}

impl Default for SolvencyLimits {
    fn default() -> Self {
        Self {
            min_reserve_wei: Wei::ZERO,
            max_liability_ratio: 0.8,
            emergency_threshold: 0.95,
        }
    }
}

impl SolvencyGate {
    /// Construct a gate with the given limits and zero liability.
    #[must_use]
    pub fn new(limits: SolvencyLimits) -> Self {
        Self {
            state: RwLock::new(SolvencyState::default()),
            limits,
        }
    }

    /// Current aggregate liability across every open bet.
    #[must_use]
    pub fn total_liability(&self) -> Wei {
        self.state.read().expect("lock poisoned").total
    }

    /// Whether the gate is currently in emergency mode (all admissions
    /// blocked).
    #[must_use]
    pub fn is_emergency(&self) -> bool {
        self.state.read().expect("lock poisoned").emergency_mode
    }

    /// Evaluate whether a new bet can be admitted, without mutating state.
    ///
    /// `target_multiplier_ppm` is the multiplier the bet's maximum possible
    /// payout is computed against: the bet's `auto_cashout_ppm` if set,
    /// otherwise `MAX_CRASH` — the worst case the house could be on the hook
    /// for.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SolvencyRejected` if admitting this bet would
    /// push aggregate liability beyond `max_liability_ratio` of reserves, or
    /// if the gate is already in emergency mode.
    #[instrument(skip(self), fields(user = %user_id, stake = %stake, target_multiplier_ppm))]
    pub fn can_accept_bet(
        &self,
        user_id: &EthAddress,
        stake: Wei,
        target_multiplier_ppm: u64,
        hot_wallet_balance: Wei,
    ) -> Result<()> {
        let _ = user_id;
        let potential_payout = stake.scale_ppm(target_multiplier_ppm);
        let state = self.state.read().expect("lock poisoned");

        if state.emergency_mode {
            return Err(AppError::Domain(DomainError::SolvencyRejected {
                amount: potential_payout.to_string(),
            }));
        }

        let new_total = state.total.saturating_add(potential_payout);
        let reserves = hot_wallet_balance.saturating_sub(self.limits.min_reserve_wei);
        let ceiling = reserves.scale_ppm(Ppm::from_f64(self.limits.max_liability_ratio).raw());

        if new_total > ceiling {
            return Err(AppError::Domain(DomainError::SolvencyRejected {
                amount: potential_payout.to_string(),
            }));
        }

        Ok(())
    }

    /// Record a bet's potential liability, immediately after `lock_bet`
    /// succeeds. Re-evaluates `emergency_mode` against the new total.
    #[instrument(skip(self), fields(user = %user_id, stake = %stake, target_multiplier_ppm))]
    pub fn add_liability(
        &self,
        user_id: EthAddress,
        stake: Wei,
        target_multiplier_ppm: u64,
        hot_wallet_balance: Wei,
    ) -> Wei {
        let potential_payout = stake.scale_ppm(target_multiplier_ppm);
        let mut state = self.state.write().expect("lock poisoned");

        let entry = state.liability.entry(user_id).or_insert(Wei::ZERO);
        *entry = entry.saturating_add(potential_payout);
        state.total = state.total.saturating_add(potential_payout);

        let reserves = hot_wallet_balance.saturating_sub(self.limits.min_reserve_wei);
        let emergency_ceiling = reserves.scale_ppm(Ppm::from_f64(self.limits.emergency_threshold).raw());
        if state.total > emergency_ceiling {
            if !state.emergency_mode {
                warn!(total = %state.total, "solvency gate entering emergency mode");
            }
            state.emergency_mode = true;
        }

        potential_payout
    }

    /// Release a bet's liability once it settles (win or lose). Never flips
    /// `emergency_mode` back off by itself — that only happens once the
    /// ratio is re-evaluated on the next `add_liability` call and found
    /// healthy, or via [`Self::clear_emergency_mode`] from the health
    /// surface.
    #[instrument(skip(self), fields(user = %user_id, amount = %amount))]
    pub fn remove_liability(&self, user_id: &EthAddress, amount: Wei) {
        let mut state = self.state.write().expect("lock poisoned");
        state.total = state.total.saturating_sub(amount);
        if let Some(entry) = state.liability.get_mut(user_id) {
            *entry = entry.saturating_sub(amount);
            if entry.is_zero() {
                state.liability.remove(user_id);
            }
        }
    }

    /// Re-evaluate emergency mode against current reserves and clear it if
    /// the ratio has recovered. Called by the Round Engine after a round
    /// settles and liabilities have been released.
    #[instrument(skip(self))]
    pub fn reevaluate_emergency_mode(&self, hot_wallet_balance: Wei) {
        let mut state = self.state.write().expect("lock poisoned");
        let reserves = hot_wallet_balance.saturating_sub(self.limits.min_reserve_wei);
        let emergency_ceiling = reserves.scale_ppm(Ppm::from_f64(self.limits.emergency_threshold).raw());
        if state.emergency_mode && state.total <= emergency_ceiling {
            state.emergency_mode = false;
        }
    }

    /// Force emergency mode on, bypassing the ratio check. Called by the
    /// health surface when a ledger invariant violation is detected —
    /// those are critical regardless of what the liability ratio says.
    pub fn trip_emergency(&self) {
        let mut state = self.state.write().expect("lock poisoned");
        if !state.emergency_mode {
            warn!("health surface tripped emergency mode");
        }
        state.emergency_mode = true;
    }

    /// Liability currently recorded for a single user.
    #[must_use]
    pub fn liability_for(&self, user_id: &EthAddress) -> Wei {
        self.state
            .read()
            .expect("lock poisoned")
            .liability
            .get(user_id)
            .copied()
            .unwrap_or(Wei::ZERO)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
