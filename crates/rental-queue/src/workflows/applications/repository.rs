use super::domain::{ApplicationId, ApplicationRecord, ApplicationStatus, ListingId, UserId};

/// Storage abstraction for application rows. Each call is one transaction.
///
/// Implementations enforce two uniqueness rules: one record per (listing, applicant) pair, and
/// no two pending records of the same listing sharing a position.
pub trait ApplicationStore: Send + Sync {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, StoreError>;

    /// Overwrite `record` only if the stored status still equals `expected` and the stored
    /// version equals `record.version`. The returned record carries the bumped version.
    fn update(
        &self,
        record: ApplicationRecord,
        expected: ApplicationStatus,
    ) -> Result<ApplicationRecord, StoreError>;

    fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError>;

    fn find_by_applicant(
        &self,
        listing_id: &ListingId,
        applicant_id: &UserId,
    ) -> Result<Option<ApplicationRecord>, StoreError>;

    /// Highest position held by a pending application of the listing, or zero.
    fn max_pending_position(&self, listing_id: &ListingId) -> Result<u32, StoreError>;

    /// All applications of the listing ordered by position, then insertion sequence.
    fn list_for_listing(&self, listing_id: &ListingId)
        -> Result<Vec<ApplicationRecord>, StoreError>;

    /// Listings that have at least one application.
    fn listings(&self) -> Result<Vec<ListingId>, StoreError>;

    /// Atomically assign positions to the listing's pending applications.
    ///
    /// `assignments` must name exactly the currently pending applications at the versions they
    /// were read with; otherwise the snapshot is stale and nothing is written.
    fn renumber(
        &self,
        listing_id: &ListingId,
        assignments: &[PositionAssignment],
    ) -> Result<(), StoreError>;
}

/// New position for one pending application, valid only against the row version it was
/// computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionAssignment {
    pub id: ApplicationId,
    pub version: u64,
    pub position: u32,
}

/// Which uniqueness rule a write collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    PositionTaken,
    DuplicateApplicant,
    DuplicateId,
    StaleWrite,
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("write conflict: {0:?}")]
    Conflict(ConflictKind),
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of listing ownership provided by the listing service.
pub trait ListingDirectory: Send + Sync {
    fn owner_of(&self, listing_id: &ListingId) -> Result<Option<UserId>, StoreError>;
}
