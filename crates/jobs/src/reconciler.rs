//! Grace-counter reconciliation of optimistic deletes.
//!
//! A delete marks its item as pending. Every authoritative snapshot then
//! either confirms it (item gone) or counts one more cycle; an item still
//! present after `grace_cycles` cycles is restored. Live job activity for
//! the item resets its counter.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{debug, info};

use geoqueue_protocol::ItemId;

/// Default number of snapshots a pending delete may survive.
pub const DEFAULT_GRACE_CYCLES: u32 = 2;

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Snapshots an item may still appear in before its delete is
    /// considered lost.
    pub grace_cycles: u32,
    /// Cadence of the optional periodic refresh. `None` disables it.
    pub refresh_interval: Option<Duration>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            grace_cycles: DEFAULT_GRACE_CYCLES,
            refresh_interval: None,
        }
    }
}

/// What one snapshot resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Pending deletes whose items are gone.
    pub confirmed: BTreeSet<ItemId>,
    /// Pending deletes given up on; the items return to normal.
    pub restored: BTreeSet<ItemId>,
}

impl ReconcileOutcome {
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.restored.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    config: ReconcileConfig,
    pending: BTreeMap<ItemId, u32>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ReconcileConfig::default())
    }
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            pending: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Starts tracking a delete. Re-tracking keeps the current counter.
    pub fn track_delete(&mut self, item: ItemId) {
        self.pending.entry(item).or_insert(0);
    }

    pub fn is_pending(&self, item: ItemId) -> bool {
        self.pending.contains_key(&item)
    }

    /// Cycles counted so far for a pending delete.
    pub fn grace(&self, item: ItemId) -> Option<u32> {
        self.pending.get(&item).copied()
    }

    pub fn pending(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.pending.keys().copied()
    }

    /// The server reported activity for these items; start counting again.
    ///
    /// A delete the server is still working on is not lost, so live
    /// `started`/`status_updated` events restart its grace window (see the
    /// reconciliation decisions in DESIGN.md).
    pub fn touch(&mut self, items: &BTreeSet<ItemId>) {
        for id in items {
            if let Some(grace) = self.pending.get_mut(id) {
                *grace = 0;
            }
        }
    }

    pub fn forget(&mut self, items: &BTreeSet<ItemId>) {
        for id in items {
            self.pending.remove(id);
        }
    }

    /// Resolves pending deletes against the ids of an authoritative
    /// snapshot.
    pub fn reconcile(&mut self, present: &BTreeSet<ItemId>) -> ReconcileOutcome {
        let limit = self.config.grace_cycles;
        let mut outcome = ReconcileOutcome::default();

        self.pending.retain(|&id, grace| {
            if !present.contains(&id) {
                outcome.confirmed.insert(id);
                return false;
            }
            if *grace >= limit {
                outcome.restored.insert(id);
                return false;
            }
            *grace += 1;
            true
        });

        if !outcome.is_empty() {
            info!(
                confirmed = outcome.confirmed.len(),
                restored = outcome.restored.len(),
                "reconciled pending deletes"
            );
        } else if !self.pending.is_empty() {
            debug!(pending = self.pending.len(), "pending deletes still waiting");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_present_for_three_refreshes_is_restored() {
        let mut r = Reconciler::default();
        r.track_delete(42);
        let present = BTreeSet::from([42]);

        assert!(r.reconcile(&present).is_empty());
        assert_eq!(r.grace(42), Some(1));
        assert!(r.reconcile(&present).is_empty());
        assert_eq!(r.grace(42), Some(2));

        let outcome = r.reconcile(&present);
        assert_eq!(outcome.restored, BTreeSet::from([42]));
        assert!(!r.is_pending(42));
    }

    #[test]
    fn absent_item_is_confirmed() {
        let mut r = Reconciler::default();
        r.track_delete(1);
        r.track_delete(2);

        let outcome = r.reconcile(&BTreeSet::from([2]));
        assert_eq!(outcome.confirmed, BTreeSet::from([1]));
        assert!(r.is_pending(2));
    }

    #[test]
    fn touch_resets_the_counter() {
        let mut r = Reconciler::default();
        r.track_delete(7);
        let present = BTreeSet::from([7]);
        r.reconcile(&present);
        r.reconcile(&present);

        r.touch(&present);
        assert_eq!(r.grace(7), Some(0));
        assert!(r.reconcile(&present).is_empty());
    }

    #[test]
    fn grace_limit_is_configurable() {
        let mut r = Reconciler::new(ReconcileConfig {
            grace_cycles: 0,
            refresh_interval: None,
        });
        r.track_delete(3);
        let outcome = r.reconcile(&BTreeSet::from([3]));
        assert_eq!(outcome.restored, BTreeSet::from([3]));
    }

    #[test]
    fn retracking_keeps_progress() {
        let mut r = Reconciler::default();
        r.track_delete(5);
        r.reconcile(&BTreeSet::from([5]));
        r.track_delete(5);
        assert_eq!(r.grace(5), Some(1));
    }
}
