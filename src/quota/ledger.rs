use crate::error::QuotaError;
use crate::models::config::QuotaConfig;
use crate::models::Tier;
use crate::quota::period;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

const HELD: u8 = 0;
const COMMITTED: u8 = 1;
const RELEASED: u8 = 2;

/// A provisional quota charge. The state cell only moves one way,
/// Held -> Committed or Held -> Released, so settling twice is a no-op
/// and commit-xor-release holds per reservation by construction.
pub struct ReservationHandle {
    account_id: String,
    amount: u32,
    period: u64,
    state: AtomicU8,
}

impl ReservationHandle {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn is_held(&self) -> bool {
        self.state.load(Ordering::Acquire) == HELD
    }

    pub fn is_committed(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMMITTED
    }
}

struct AccountUsage {
    limit: u32,
    consumed: AtomicU32,
    period: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaSnapshot {
    pub limit: u32,
    pub consumed: u32,
    pub remaining: u32,
    pub reset_at: i64,
}

/// Per-account, per-period usage counters. Reserve is a compare-and-
/// increment on an atomic counter, so concurrent callers for one
/// account serialize on the CAS and consumed can never pass the limit.
pub struct QuotaLedger {
    accounts: DashMap<String, AccountUsage>,
    config: QuotaConfig,
}

impl QuotaLedger {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            accounts: DashMap::new(),
            config,
        }
    }

    pub fn reserve(
        &self,
        account_id: &str,
        tier: Tier,
        amount: u32,
    ) -> Result<Arc<ReservationHandle>, QuotaError> {
        self.reserve_at(account_id, tier, amount, chrono::Utc::now().timestamp())
    }

    pub(crate) fn reserve_at(
        &self,
        account_id: &str,
        tier: Tier,
        amount: u32,
        now: i64,
    ) -> Result<Arc<ReservationHandle>, QuotaError> {
        let limit = self.config.policy(tier).generation_limit;
        let current_period = period::period_index(now, self.config.period_days);

        let mut entry = self
            .accounts
            .entry(account_id.to_string())
            .or_insert_with(|| AccountUsage {
                limit,
                consumed: AtomicU32::new(0),
                period: AtomicU64::new(current_period),
            });
        // Tier changes take effect on the next reserve.
        entry.limit = limit;
        if entry.period.load(Ordering::Acquire) != current_period {
            entry.period.store(current_period, Ordering::Release);
            entry.consumed.store(0, Ordering::Release);
        }

        entry
            .consumed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |consumed| {
                let next = consumed.checked_add(amount)?;
                (next <= limit).then_some(next)
            })
            .map_err(|_| QuotaError::Exceeded)?;

        Ok(Arc::new(ReservationHandle {
            account_id: account_id.to_string(),
            amount,
            period: current_period,
            state: AtomicU8::new(HELD),
        }))
    }

    /// Marks the reservation permanent. No-op when already settled.
    pub fn commit(&self, handle: &ReservationHandle) {
        let _ = handle
            .state
            .compare_exchange(HELD, COMMITTED, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Returns the reserved units unless the reservation was committed
    /// or already released. A reservation that outlived its period is
    /// settled without touching the rolled-over counter.
    pub fn release(&self, handle: &ReservationHandle) {
        self.release_at(handle, chrono::Utc::now().timestamp());
    }

    pub(crate) fn release_at(&self, handle: &ReservationHandle, now: i64) {
        if handle
            .state
            .compare_exchange(HELD, RELEASED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // Exclusive entry access so the period check and the decrement
        // cannot interleave with a rollover in reserve_at.
        let Some(usage) = self.accounts.get_mut(&handle.account_id) else {
            return;
        };
        let current_period = period::period_index(now, self.config.period_days);
        if handle.period != current_period
            || usage.period.load(Ordering::Acquire) != handle.period
        {
            return;
        }
        let _ = usage
            .consumed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |consumed| {
                Some(consumed.saturating_sub(handle.amount))
            });
    }

    /// Retry gate: a held reservation is only still good while its
    /// period is the current one.
    pub fn reservation_valid(&self, handle: &ReservationHandle) -> bool {
        handle.is_held()
            && handle.period
                == period::period_index(chrono::Utc::now().timestamp(), self.config.period_days)
    }

    pub fn snapshot(&self, account_id: &str, tier: Tier) -> QuotaSnapshot {
        self.snapshot_at(account_id, tier, chrono::Utc::now().timestamp())
    }

    pub(crate) fn snapshot_at(&self, account_id: &str, tier: Tier, now: i64) -> QuotaSnapshot {
        let limit = self.config.policy(tier).generation_limit;
        let current_period = period::period_index(now, self.config.period_days);
        let consumed = self
            .accounts
            .get(account_id)
            .filter(|usage| usage.period.load(Ordering::Acquire) == current_period)
            .map(|usage| usage.consumed.load(Ordering::Acquire))
            .unwrap_or(0);
        QuotaSnapshot {
            limit,
            consumed,
            remaining: limit.saturating_sub(consumed),
            reset_at: period::next_reset(now, self.config.period_days),
        }
    }

    /// Scheduled rollover: reset any counter whose window has passed.
    /// Idempotent; reserves that race it resolve through the same
    /// per-entry exclusivity.
    pub fn roll_over(&self) -> usize {
        self.roll_over_at(chrono::Utc::now().timestamp())
    }

    pub(crate) fn roll_over_at(&self, now: i64) -> usize {
        let current_period = period::period_index(now, self.config.period_days);
        let mut rolled = 0;
        for mut entry in self.accounts.iter_mut() {
            if entry.period.load(Ordering::Acquire) != current_period {
                entry.period.store(current_period, Ordering::Release);
                entry.consumed.store(0, Ordering::Release);
                rolled += 1;
            }
        }
        if rolled > 0 {
            tracing::info!("Quota rollover reset {} account counter(s)", rolled);
        }
        rolled
    }

    pub fn period_days(&self) -> u32 {
        self.config.period_days
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> Arc<QuotaLedger> {
        Arc::new(QuotaLedger::new(QuotaConfig::default()))
    }

    #[test]
    fn concurrent_reserves_never_pass_the_limit() {
        let ledger = ledger();
        // Starter limit is 50; hammer it with 200 threads.
        let mut handles = Vec::new();
        for _ in 0..200 {
            let ledger = ledger.clone();
            handles.push(std::thread::spawn(move || {
                ledger.reserve("acc-1", Tier::Starter, 1).is_ok()
            }));
        }
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap_or(false))
            .filter(|&ok| ok)
            .count();

        assert_eq!(granted, 50);
        assert_eq!(ledger.snapshot("acc-1", Tier::Starter).consumed, 50);
        assert!(ledger.reserve("acc-1", Tier::Starter, 1).is_err());
    }

    #[test]
    fn release_is_idempotent_and_commit_wins() {
        let ledger = ledger();
        let first = ledger.reserve("acc-1", Tier::Starter, 1).unwrap();
        let second = ledger.reserve("acc-1", Tier::Starter, 1).unwrap();
        assert_eq!(ledger.snapshot("acc-1", Tier::Starter).consumed, 2);

        ledger.release(&first);
        ledger.release(&first);
        assert_eq!(ledger.snapshot("acc-1", Tier::Starter).consumed, 1);

        ledger.commit(&second);
        ledger.release(&second);
        assert_eq!(ledger.snapshot("acc-1", Tier::Starter).consumed, 1);
        assert!(second.is_committed());
    }

    #[test]
    fn quota_frees_up_after_release() {
        let ledger = ledger();
        let mut held = Vec::new();
        for _ in 0..50 {
            held.push(ledger.reserve("acc-1", Tier::Starter, 1).unwrap());
        }
        assert!(ledger.reserve("acc-1", Tier::Starter, 1).is_err());

        ledger.release(&held.pop().unwrap());
        assert!(ledger.reserve("acc-1", Tier::Starter, 1).is_ok());
    }

    #[test]
    fn rollover_resets_counters_and_ignores_stale_releases() {
        let ledger = ledger();
        let day = 86_400;
        let t0 = 100 * 30 * day;

        let handle = ledger.reserve_at("acc-1", Tier::Starter, 1, t0).unwrap();
        assert_eq!(ledger.snapshot_at("acc-1", Tier::Starter, t0).consumed, 1);

        // Next window: counter resets, the old reservation must not
        // subtract from it.
        let t1 = t0 + 31 * day;
        assert_eq!(ledger.roll_over_at(t1), 1);
        assert_eq!(ledger.snapshot_at("acc-1", Tier::Starter, t1).consumed, 0);

        let other = ledger.reserve_at("acc-1", Tier::Starter, 1, t1).unwrap();
        ledger.release_at(&handle, t1);
        assert_eq!(ledger.snapshot_at("acc-1", Tier::Starter, t1).consumed, 1);
        ledger.release_at(&other, t1);
        assert_eq!(ledger.snapshot_at("acc-1", Tier::Starter, t1).consumed, 0);
    }

    #[test]
    fn tier_limits_apply_per_account() {
        let ledger = ledger();
        for _ in 0..200 {
            ledger.reserve("pro", Tier::Professional, 1).unwrap();
        }
        assert!(ledger.reserve("pro", Tier::Professional, 1).is_err());
        assert!(ledger.reserve("other", Tier::Starter, 1).is_ok());
    }
}
