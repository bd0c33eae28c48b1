use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier wrapper for applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(pub String);

impl ApplicationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Listing reference. Listings themselves are owned by the listing service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(pub String);

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated user reference (applicant or landlord).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status tracked for every application in a listing queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Withdrawn => "withdrawn",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, ApplicationStatus::Pending)
    }

    /// Terminal states that a fresh submission may reactivate.
    pub const fn is_reactivatable(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Rejected | ApplicationStatus::Withdrawn
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Document metadata forwarded verbatim to the document-sharing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    pub filename: String,
    pub document_type: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Applicant supplied payload for a new or renewed application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSubmission {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub documents: Vec<DocumentDescriptor>,
}

/// Persisted application row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: ApplicationId,
    pub listing_id: ListingId,
    pub applicant_id: UserId,
    pub position: u32,
    pub status: ApplicationStatus,
    pub notes: Option<String>,
    pub applied_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub shared_documents: Vec<DocumentDescriptor>,
    /// Insertion order assigned by the store; stable tiebreak for equal `applied_at`.
    #[serde(default)]
    pub sequence: u64,
    /// Row version bumped by the store on every write; guards compare-and-swap updates.
    #[serde(default)]
    pub version: u64,
}

impl ApplicationRecord {
    /// Build a fresh pending record. `position` and `sequence` are filled in by the allocator
    /// and the store respectively.
    pub fn new_pending(
        listing_id: ListingId,
        applicant_id: UserId,
        submission: ApplicationSubmission,
        applied_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApplicationId::generate(),
            listing_id,
            applicant_id,
            position: 0,
            status: ApplicationStatus::Pending,
            notes: submission.notes,
            applied_at,
            reviewed_at: None,
            review_notes: None,
            shared_documents: submission.documents,
            sequence: 0,
            version: 0,
        }
    }

    /// Reset a rejected or withdrawn record back to pending with new submission content.
    pub(crate) fn reactivate(&mut self, submission: ApplicationSubmission, now: DateTime<Utc>) {
        self.status = ApplicationStatus::Pending;
        self.applied_at = now;
        self.notes = submission.notes;
        self.shared_documents = submission.documents;
        self.reviewed_at = None;
        self.review_notes = None;
        self.position = 0;
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApplicationStatus::Pending
    }

    pub fn view(&self) -> ApplicationView {
        ApplicationView {
            application_id: self.id.clone(),
            listing_id: self.listing_id.clone(),
            applicant_id: self.applicant_id.clone(),
            position: self.position,
            status: self.status,
            notes: self.notes.clone(),
            applied_at: self.applied_at,
            reviewed_at: self.reviewed_at,
            review_notes: self.review_notes.clone(),
            shared_documents: self.shared_documents.clone(),
        }
    }
}

/// Response shape for the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationView {
    pub application_id: ApplicationId,
    pub listing_id: ListingId,
    pub applicant_id: UserId,
    pub position: u32,
    pub status: ApplicationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub applied_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
    pub shared_documents: Vec<DocumentDescriptor>,
}
