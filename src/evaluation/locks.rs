//! Per-target mutual exclusion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One mutex per target, created on first use.
///
/// Evaluations of the same target queue up on its mutex; evaluations of
/// different targets never contend beyond the brief map lookup.
#[derive(Default)]
pub struct TargetLocks {
    slots: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding `target_id`.
    pub fn slot(&self, target_id: i64) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(target_id).or_default().clone()
    }

    /// Drop the slot of a target that is no longer monitored.
    ///
    /// A slot still shared with a running or queued evaluation is kept, so
    /// later callers keep queueing on the same mutex.
    pub fn forget(&self, target_id: i64) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&target_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&target_id);
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lock a slot. A panic in an earlier holder leaves nothing to repair.
pub fn hold(slot: &Mutex<()>) -> MutexGuard<'_, ()> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_target_shares_a_slot() {
        let locks = TargetLocks::new();
        let a = locks.slot(1);
        let b = locks.slot(1);
        let c = locks.slot(2);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);

        drop((a, b));
        locks.forget(1);
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn test_forget_keeps_a_slot_that_is_held() {
        let locks = TargetLocks::new();
        let held = locks.slot(7);
        let guard = hold(&held);

        locks.forget(7);
        assert_eq!(locks.len(), 1);

        let again = locks.slot(7);
        assert!(Arc::ptr_eq(&held, &again));
        assert!(again.try_lock().is_err());

        drop(guard);
        drop((held, again));
        locks.forget(7);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_holding_one_target_does_not_block_another() {
        let locks = TargetLocks::new();
        let one = locks.slot(1);
        let _held = hold(&one);

        let two = locks.slot(2);
        assert!(two.try_lock().is_ok());
        assert!(one.try_lock().is_err());
    }
}
