//! Listing application queue: first-come positions and the status lifecycle.
//!
//! Submissions obtain a position through an optimistic allocator that retries on store
//! conflicts. Landlords accept or reject pending applications, applicants withdraw them, and a
//! reconciler restores a gapless `1..=N` ordering per listing when the queue drifts.

pub mod allocator;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod reconciler;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use allocator::{PositionAllocator, RetryPolicy};
pub use domain::{
    ApplicationId, ApplicationRecord, ApplicationStatus, ApplicationSubmission, ApplicationView,
    DocumentDescriptor, ListingId, UserId,
};
pub use error::{MissingEntity, QueueError};
pub use lifecycle::{TransitionActor, TransitionRequest, TransitionRule};
pub use memory::{InMemoryApplicationStore, InMemoryListingDirectory, ListingImportError};
pub use reconciler::{ListingLocks, QueueHealth, QueueReconciler, ReconcileOutcome, SweepReport};
pub use repository::{
    ApplicationStore, ConflictKind, ListingDirectory, PositionAssignment, StoreError,
};
pub use router::{application_router, error_response, Actor, QueueState, SubmissionReceipt};
pub use service::ApplicationQueueService;
