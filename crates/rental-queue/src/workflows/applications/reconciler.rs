use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use super::domain::{ApplicationId, ApplicationRecord, ListingId};
use super::error::QueueError;
use super::repository::{ApplicationStore, PositionAssignment, StoreError};

/// Registry of per-listing exclusive sections. Unrelated listings never share a lock.
#[derive(Debug, Default, Clone)]
pub struct ListingLocks {
    inner: Arc<Mutex<HashMap<ListingId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ListingLocks {
    /// Take the listing's section without waiting; `None` if someone else holds it.
    pub fn try_acquire(&self, listing_id: &ListingId) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            registry.entry(listing_id.clone()).or_default().clone()
        };
        lock.try_lock_owned().ok()
    }

    /// Forget listings nobody holds or is about to lock. Returns how many entries were dropped.
    pub fn prune(&self) -> usize {
        let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = registry.len();
        registry.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - registry.len()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consistency snapshot of one listing's pending queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    pub listing_id: ListingId,
    pub pending: usize,
    pub duplicate_positions: Vec<u32>,
    pub missing_positions: Vec<u32>,
    pub out_of_order: bool,
}

impl QueueHealth {
    /// Pending positions are exactly `1..=N` and follow submission order.
    pub fn is_consistent(&self) -> bool {
        self.duplicate_positions.is_empty() && self.missing_positions.is_empty() && !self.out_of_order
    }
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub listing_id: ListingId,
    pub pending: usize,
    pub renumbered: usize,
    pub assignments: Vec<(ApplicationId, u32)>,
}

/// Totals from a scheduled sweep over every listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub audited: usize,
    pub reconciled: usize,
    pub conflicts: usize,
}

/// Renumbers pending applications of a listing into `1..=N` by submission time.
///
/// Terminal applications keep whatever position they last held.
pub struct QueueReconciler<S> {
    store: Arc<S>,
    locks: ListingLocks,
}

fn submission_order(mut pending: Vec<ApplicationRecord>) -> Vec<ApplicationRecord> {
    pending.sort_by(|a, b| {
        a.applied_at
            .cmp(&b.applied_at)
            .then(a.sequence.cmp(&b.sequence))
    });
    pending
}

impl<S> QueueReconciler<S>
where
    S: ApplicationStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self::with_locks(store, ListingLocks::default())
    }

    pub fn with_locks(store: Arc<S>, locks: ListingLocks) -> Self {
        Self { store, locks }
    }

    pub fn locks(&self) -> &ListingLocks {
        &self.locks
    }

    fn pending_in_submission_order(
        &self,
        listing_id: &ListingId,
    ) -> Result<Vec<ApplicationRecord>, StoreError> {
        let pending = self
            .store
            .list_for_listing(listing_id)?
            .into_iter()
            .filter(ApplicationRecord::is_pending)
            .collect();
        Ok(submission_order(pending))
    }

    pub fn audit(&self, listing_id: &ListingId) -> Result<QueueHealth, QueueError> {
        let pending = self.pending_in_submission_order(listing_id)?;

        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for record in &pending {
            if !seen.insert(record.position) {
                duplicates.insert(record.position);
            }
        }
        let expected = u32::try_from(pending.len()).unwrap_or(u32::MAX);
        let missing = (1..=expected)
            .filter(|position| !seen.contains(position))
            .collect();
        let out_of_order = pending
            .windows(2)
            .any(|pair| pair[0].position >= pair[1].position);

        Ok(QueueHealth {
            listing_id: listing_id.clone(),
            pending: pending.len(),
            duplicate_positions: duplicates.into_iter().collect(),
            missing_positions: missing,
            out_of_order,
        })
    }

    /// Renumber the listing's pending queue. Idempotent; writes nothing when already ordered.
    pub fn reconcile(&self, listing_id: &ListingId) -> Result<ReconcileOutcome, QueueError> {
        let _section = self
            .locks
            .try_acquire(listing_id)
            .ok_or_else(|| QueueError::ReconciliationConflict {
                listing_id: listing_id.clone(),
            })?;

        let pending = self.pending_in_submission_order(listing_id)?;
        let writes: Vec<PositionAssignment> = pending
            .iter()
            .zip(1u32..)
            .map(|(record, position)| PositionAssignment {
                id: record.id.clone(),
                version: record.version,
                position,
            })
            .collect();
        let renumbered = pending
            .iter()
            .zip(&writes)
            .filter(|(record, write)| record.position != write.position)
            .count();
        let assignments: Vec<(ApplicationId, u32)> = writes
            .iter()
            .map(|write| (write.id.clone(), write.position))
            .collect();

        if renumbered > 0 {
            self.store
                .renumber(listing_id, &writes)
                .map_err(|err| match err {
                    StoreError::Conflict(_) => QueueError::ReconciliationConflict {
                        listing_id: listing_id.clone(),
                    },
                    other => QueueError::Store(other),
                })?;
            info!(
                listing_id = %listing_id,
                pending = assignments.len(),
                renumbered,
                "listing queue reconciled"
            );
        }

        Ok(ReconcileOutcome {
            listing_id: listing_id.clone(),
            pending: assignments.len(),
            renumbered,
            assignments,
        })
    }

    /// Audit every listing and reconcile the inconsistent ones.
    pub fn sweep(&self) -> Result<SweepReport, QueueError> {
        let mut report = SweepReport::default();

        for listing_id in self.store.listings()? {
            report.audited += 1;
            if self.audit(&listing_id)?.is_consistent() {
                continue;
            }
            match self.reconcile(&listing_id) {
                Ok(_) => report.reconciled += 1,
                Err(QueueError::ReconciliationConflict { .. }) => {
                    warn!(listing_id = %listing_id, "skipping listing busy with another writer");
                    report.conflicts += 1;
                }
                Err(other) => return Err(other),
            }
        }

        self.locks.prune();
        Ok(report)
    }
}
