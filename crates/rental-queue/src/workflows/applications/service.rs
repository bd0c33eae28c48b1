use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::allocator::{PositionAllocator, RetryPolicy};
use super::domain::{
    ApplicationId, ApplicationRecord, ApplicationStatus, ApplicationSubmission, ListingId, UserId,
};
use super::error::{MissingEntity, QueueError};
use super::lifecycle::{self, TransitionRequest};
use super::reconciler::{QueueHealth, QueueReconciler, ReconcileOutcome, SweepReport};
use super::repository::{ApplicationStore, ConflictKind, ListingDirectory, StoreError};

/// Entry point for submissions, status changes, and queue maintenance.
pub struct ApplicationQueueService<S, D> {
    store: Arc<S>,
    directory: Arc<D>,
    allocator: PositionAllocator<S>,
    reconciler: QueueReconciler<S>,
}

impl<S, D> ApplicationQueueService<S, D>
where
    S: ApplicationStore + 'static,
    D: ListingDirectory + 'static,
{
    pub fn new(store: Arc<S>, directory: Arc<D>, policy: RetryPolicy) -> Self {
        let allocator = PositionAllocator::new(store.clone(), policy);
        let reconciler = QueueReconciler::new(store.clone());
        Self {
            store,
            directory,
            allocator,
            reconciler,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn reconciler(&self) -> &QueueReconciler<S> {
        &self.reconciler
    }

    fn listing_owner(&self, listing_id: &ListingId) -> Result<UserId, QueueError> {
        self.directory
            .owner_of(listing_id)?
            .ok_or_else(|| QueueError::NotFound(MissingEntity::Listing(listing_id.clone())))
    }

    fn fetch(&self, application_id: &ApplicationId) -> Result<ApplicationRecord, QueueError> {
        self.store.fetch(application_id)?.ok_or_else(|| {
            QueueError::NotFound(MissingEntity::Application(application_id.clone()))
        })
    }

    fn require_owner(
        &self,
        listing_id: &ListingId,
        actor: &UserId,
        action: &'static str,
    ) -> Result<(), QueueError> {
        if self.listing_owner(listing_id)? == *actor {
            Ok(())
        } else {
            Err(QueueError::Unauthorized {
                actor: actor.clone(),
                action,
            })
        }
    }

    /// Queue a new application or reactivate a rejected/withdrawn one.
    ///
    /// Each allocator attempt re-reads the applicant's existing record, so a concurrent
    /// double-submit by the same applicant resolves to one record and one
    /// [`QueueError::DuplicatePendingApplication`].
    pub async fn submit(
        &self,
        listing_id: &ListingId,
        applicant_id: &UserId,
        submission: ApplicationSubmission,
    ) -> Result<ApplicationRecord, QueueError> {
        self.listing_owner(listing_id)?;

        let record = self
            .allocator
            .allocate(listing_id, |position| {
                let now = Utc::now();
                match self.store.find_by_applicant(listing_id, applicant_id)? {
                    Some(existing) if existing.is_pending() => {
                        Err(QueueError::DuplicatePendingApplication {
                            listing_id: listing_id.clone(),
                            applicant_id: applicant_id.clone(),
                            application_id: existing.id,
                        })
                    }
                    Some(existing) if !existing.status.is_reactivatable() => {
                        Err(QueueError::InvalidStatusTransition {
                            from: existing.status,
                            to: ApplicationStatus::Pending,
                        })
                    }
                    Some(mut existing) => {
                        let expected = existing.status;
                        existing.reactivate(submission.clone(), now);
                        existing.position = position;
                        Ok(self.store.update(existing, expected)?)
                    }
                    None => {
                        let mut record = ApplicationRecord::new_pending(
                            listing_id.clone(),
                            applicant_id.clone(),
                            submission.clone(),
                            now,
                        );
                        record.position = position;
                        Ok(self.store.insert(record)?)
                    }
                }
            })
            .await?;

        info!(
            application_id = %record.id,
            listing_id = %listing_id,
            position = record.position,
            "application queued"
        );
        Ok(record)
    }

    /// Move an application along one of the public state machine edges.
    pub fn transition(
        &self,
        application_id: &ApplicationId,
        actor: &UserId,
        request: TransitionRequest,
    ) -> Result<ApplicationRecord, QueueError> {
        let attempts = self.allocator.policy().max_attempts.max(1);

        for _ in 0..attempts {
            let mut record = self.fetch(application_id)?;
            let owner = self.listing_owner(&record.listing_id)?;
            let rule = lifecycle::authorize(&record, &owner, actor, request.status)?;

            lifecycle::apply(&mut record, rule, request.review_notes.clone(), Utc::now());
            match self.store.update(record, rule.from) {
                Ok(updated) => {
                    info!(
                        application_id = %updated.id,
                        status = %updated.status,
                        actor = %actor,
                        "application status changed"
                    );
                    return Ok(updated);
                }
                // Lost a race with another transition; re-evaluate against the fresh status.
                Err(StoreError::Conflict(ConflictKind::StaleWrite)) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        // Errors reflect the final stored state.
        let current = self.fetch(application_id)?;
        let owner = self.listing_owner(&current.listing_id)?;
        lifecycle::authorize(&current, &owner, actor, request.status)?;
        Err(QueueError::Store(StoreError::Conflict(ConflictKind::StaleWrite)))
    }

    /// Single application, visible to its applicant and the listing owner.
    pub fn get(
        &self,
        application_id: &ApplicationId,
        actor: &UserId,
    ) -> Result<ApplicationRecord, QueueError> {
        let record = self.fetch(application_id)?;
        if record.applicant_id == *actor {
            return Ok(record);
        }
        self.require_owner(&record.listing_id, actor, "view this application")?;
        Ok(record)
    }

    /// Listing queue ordered by position, for the listing owner.
    pub fn listing_applications(
        &self,
        listing_id: &ListingId,
        actor: &UserId,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<ApplicationRecord>, QueueError> {
        self.require_owner(listing_id, actor, "view this listing's applications")?;
        let records = self.store.list_for_listing(listing_id)?;
        Ok(match status {
            Some(status) => records
                .into_iter()
                .filter(|record| record.status == status)
                .collect(),
            None => records,
        })
    }

    /// Owner-triggered repair of a listing queue.
    pub fn reconcile(
        &self,
        listing_id: &ListingId,
        actor: &UserId,
    ) -> Result<ReconcileOutcome, QueueError> {
        self.require_owner(listing_id, actor, "reconcile this listing's queue")?;
        self.reconciler.reconcile(listing_id)
    }

    pub fn audit(&self, listing_id: &ListingId) -> Result<QueueHealth, QueueError> {
        self.reconciler.audit(listing_id)
    }

    pub fn sweep(&self) -> Result<SweepReport, QueueError> {
        self.reconciler.sweep()
    }
}
