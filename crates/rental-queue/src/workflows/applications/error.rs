use std::fmt;

use super::domain::{ApplicationId, ApplicationStatus, ListingId, UserId};
use super::repository::{ConflictKind, StoreError};

/// Entity a lookup failed to find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingEntity {
    Listing(ListingId),
    Application(ApplicationId),
}

impl fmt::Display for MissingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingEntity::Listing(id) => write!(f, "listing {id}"),
            MissingEntity::Application(id) => write!(f, "application {id}"),
        }
    }
}

/// Failure kinds surfaced by the application queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(
        "applicant {applicant_id} already has pending application {application_id} for listing {listing_id}"
    )]
    DuplicatePendingApplication {
        listing_id: ListingId,
        applicant_id: UserId,
        application_id: ApplicationId,
    },
    #[error("{actor} is not permitted to {action}")]
    Unauthorized { actor: UserId, action: &'static str },
    #[error("application cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    #[error("no free position for listing {listing_id} after {attempts} attempts")]
    PositionAllocationExhausted { listing_id: ListingId, attempts: u32 },
    #[error("listing {listing_id} queue changed or is being reconciled elsewhere")]
    ReconciliationConflict { listing_id: ListingId },
    #[error("{0} not found")]
    NotFound(MissingEntity),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueueError {
    /// Stable machine-readable code for API payloads.
    pub const fn code(&self) -> &'static str {
        match self {
            QueueError::DuplicatePendingApplication { .. } => "duplicate_pending_application",
            QueueError::Unauthorized { .. } => "unauthorized",
            QueueError::InvalidStatusTransition { .. } => "invalid_status_transition",
            QueueError::PositionAllocationExhausted { .. } => "position_allocation_exhausted",
            QueueError::ReconciliationConflict { .. } => "reconciliation_conflict",
            QueueError::NotFound(_) => "not_found",
            QueueError::Store(StoreError::Conflict(_)) => "write_conflict",
            QueueError::Store(_) => "store_unavailable",
        }
    }

    /// Whether the caller may retry the whole operation after backing off.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::PositionAllocationExhausted { .. }
                | QueueError::ReconciliationConflict { .. }
                | QueueError::Store(StoreError::Conflict(_))
        )
    }

    pub(crate) fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            QueueError::Store(StoreError::Conflict(kind)) => Some(*kind),
            _ => None,
        }
    }
}
