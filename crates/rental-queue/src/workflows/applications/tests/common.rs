use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{header, Request};
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::sessions::SessionCache;
use crate::workflows::applications::domain::{
    ApplicationId, ApplicationRecord, ApplicationStatus, ApplicationSubmission,
    DocumentDescriptor, ListingId, UserId,
};
use crate::workflows::applications::memory::{InMemoryApplicationStore, InMemoryListingDirectory};
use crate::workflows::applications::repository::{
    ApplicationStore, ConflictKind, ListingDirectory, PositionAssignment, StoreError,
};
use crate::workflows::applications::{
    application_router, ApplicationQueueService, RetryPolicy,
};

pub(super) type MemoryService =
    ApplicationQueueService<InMemoryApplicationStore, InMemoryListingDirectory>;

pub(super) fn listing() -> ListingId {
    ListingId("L1".to_string())
}

pub(super) fn other_listing() -> ListingId {
    ListingId("L2".to_string())
}

pub(super) fn owner() -> UserId {
    UserId("landlord-1".to_string())
}

pub(super) fn other_owner() -> UserId {
    UserId("landlord-2".to_string())
}

pub(super) fn applicant(name: &str) -> UserId {
    UserId(format!("tenant-{name}"))
}

pub(super) fn directory() -> InMemoryListingDirectory {
    InMemoryListingDirectory::new()
        .with_listing(listing(), owner())
        .with_listing(other_listing(), other_owner())
}

pub(super) fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(20, Duration::from_millis(1), Duration::from_millis(4))
}

pub(super) fn document() -> DocumentDescriptor {
    DocumentDescriptor {
        filename: "c0ffee-paystub.pdf".to_string(),
        document_type: "income_verification".to_string(),
        display_name: "March paystub".to_string(),
        original_filename: Some("paystub-march.pdf".to_string()),
        mime_type: Some("application/pdf".to_string()),
        size_bytes: Some(48_213),
    }
}

pub(super) fn submission(notes: &str) -> ApplicationSubmission {
    ApplicationSubmission {
        notes: Some(notes.to_string()),
        documents: vec![document()],
    }
}

pub(super) fn build_service() -> (MemoryService, Arc<InMemoryApplicationStore>) {
    let store = Arc::new(InMemoryApplicationStore::new());
    let service = ApplicationQueueService::new(store.clone(), Arc::new(directory()), fast_policy());
    (service, store)
}

pub(super) fn service_with_store<S>(store: Arc<S>, policy: RetryPolicy) -> ApplicationQueueService<S, InMemoryListingDirectory>
where
    S: ApplicationStore + 'static,
{
    ApplicationQueueService::new(store, Arc::new(directory()), policy)
}

pub(super) fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 1, 9, minute, 0)
        .single()
        .expect("valid timestamp")
}

/// Pending record with explicit position and submission time, for direct store seeding.
pub(super) fn record(
    listing_id: &ListingId,
    name: &str,
    position: u32,
    applied_at: DateTime<Utc>,
) -> ApplicationRecord {
    let mut record = ApplicationRecord::new_pending(
        listing_id.clone(),
        applicant(name),
        submission(name),
        applied_at,
    );
    record.position = position;
    record
}

pub(super) fn positions_by_applicant(
    store: &InMemoryApplicationStore,
    listing_id: &ListingId,
) -> Vec<(String, u32, ApplicationStatus)> {
    store
        .list_for_listing(listing_id)
        .expect("list succeeds")
        .into_iter()
        .map(|record| (record.applicant_id.0, record.position, record.status))
        .collect()
}

/// Wraps the in-memory store and reports a fixed number of write conflicts first.
#[derive(Debug, Default)]
pub(super) struct ContendedStore {
    pub(super) inner: InMemoryApplicationStore,
    forced_conflicts: AtomicU32,
    forced_stale_updates: AtomicU32,
    rival_status: Mutex<Option<ApplicationStatus>>,
    pub(super) insert_calls: AtomicU32,
    pub(super) update_calls: AtomicU32,
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

impl ContendedStore {
    pub(super) fn with_conflicts(count: u32) -> Self {
        Self {
            forced_conflicts: AtomicU32::new(count),
            ..Self::default()
        }
    }

    /// Every update loses a race `count` times before reaching the inner store.
    pub(super) fn with_stale_updates(count: u32) -> Self {
        Self {
            forced_stale_updates: AtomicU32::new(count),
            ..Self::default()
        }
    }

    /// The next lost update is caused by a competing write moving the row to `status`.
    pub(super) fn with_rival(self, status: ApplicationStatus) -> Self {
        *self.rival_status.lock().expect("lock") = Some(status);
        self
    }

    pub(super) fn updates(&self) -> u32 {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub(super) fn inserts(&self) -> u32 {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

impl ApplicationStore for ContendedStore {
    fn insert(&self, record: ApplicationRecord) -> Result<ApplicationRecord, StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.forced_conflicts) {
            return Err(StoreError::Conflict(ConflictKind::PositionTaken));
        }
        self.inner.insert(record)
    }

    fn update(
        &self,
        record: ApplicationRecord,
        expected: ApplicationStatus,
    ) -> Result<ApplicationRecord, StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.forced_stale_updates) {
            let rival = self.rival_status.lock().expect("lock").take();
            if let Some(status) = rival {
                let mut current = self.inner.fetch(&record.id)?.ok_or(StoreError::NotFound)?;
                let from = current.status;
                current.status = status;
                self.inner.update(current, from)?;
            }
            return Err(StoreError::Conflict(ConflictKind::StaleWrite));
        }
        self.inner.update(record, expected)
    }

    fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        self.inner.fetch(id)
    }

    fn find_by_applicant(
        &self,
        listing_id: &ListingId,
        applicant_id: &UserId,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        self.inner.find_by_applicant(listing_id, applicant_id)
    }

    fn max_pending_position(&self, listing_id: &ListingId) -> Result<u32, StoreError> {
        self.inner.max_pending_position(listing_id)
    }

    fn list_for_listing(
        &self,
        listing_id: &ListingId,
    ) -> Result<Vec<ApplicationRecord>, StoreError> {
        self.inner.list_for_listing(listing_id)
    }

    fn listings(&self) -> Result<Vec<ListingId>, StoreError> {
        self.inner.listings()
    }

    fn renumber(
        &self,
        listing_id: &ListingId,
        assignments: &[PositionAssignment],
    ) -> Result<(), StoreError> {
        self.inner.renumber(listing_id, assignments)
    }
}

/// Store whose every call fails as if the database were down.
pub(super) struct UnavailableStore;

fn unavailable<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("database offline".to_string()))
}

impl ApplicationStore for UnavailableStore {
    fn insert(&self, _record: ApplicationRecord) -> Result<ApplicationRecord, StoreError> {
        unavailable()
    }

    fn update(
        &self,
        _record: ApplicationRecord,
        _expected: ApplicationStatus,
    ) -> Result<ApplicationRecord, StoreError> {
        unavailable()
    }

    fn fetch(&self, _id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        unavailable()
    }

    fn find_by_applicant(
        &self,
        _listing_id: &ListingId,
        _applicant_id: &UserId,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        unavailable()
    }

    fn max_pending_position(&self, _listing_id: &ListingId) -> Result<u32, StoreError> {
        unavailable()
    }

    fn list_for_listing(
        &self,
        _listing_id: &ListingId,
    ) -> Result<Vec<ApplicationRecord>, StoreError> {
        unavailable()
    }

    fn listings(&self) -> Result<Vec<ListingId>, StoreError> {
        unavailable()
    }

    fn renumber(
        &self,
        _listing_id: &ListingId,
        _assignments: &[PositionAssignment],
    ) -> Result<(), StoreError> {
        unavailable()
    }
}

/// Rows carried over from an older allocation scheme that tolerated duplicate positions.
#[derive(Debug, Default)]
pub(super) struct FixtureStore {
    pub(super) records: Mutex<Vec<ApplicationRecord>>,
    pub(super) stale_renumber: bool,
}

impl FixtureStore {
    pub(super) fn new(records: Vec<ApplicationRecord>) -> Self {
        let records = records
            .into_iter()
            .zip(1u64..)
            .map(|(mut record, sequence)| {
                record.sequence = sequence;
                record
            })
            .collect();
        Self {
            records: Mutex::new(records),
            stale_renumber: false,
        }
    }

    pub(super) fn snapshot(&self) -> Vec<ApplicationRecord> {
        self.records.lock().expect("lock").clone()
    }
}

impl ApplicationStore for FixtureStore {
    fn insert(&self, _record: ApplicationRecord) -> Result<ApplicationRecord, StoreError> {
        unavailable()
    }

    fn update(
        &self,
        _record: ApplicationRecord,
        _expected: ApplicationStatus,
    ) -> Result<ApplicationRecord, StoreError> {
        unavailable()
    }

    fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self.snapshot().into_iter().find(|record| record.id == *id))
    }

    fn find_by_applicant(
        &self,
        _listing_id: &ListingId,
        _applicant_id: &UserId,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        unavailable()
    }

    fn max_pending_position(&self, _listing_id: &ListingId) -> Result<u32, StoreError> {
        unavailable()
    }

    fn list_for_listing(
        &self,
        listing_id: &ListingId,
    ) -> Result<Vec<ApplicationRecord>, StoreError> {
        let mut records: Vec<ApplicationRecord> = self
            .snapshot()
            .into_iter()
            .filter(|record| record.listing_id == *listing_id)
            .collect();
        records.sort_by_key(|record| (record.position, record.sequence));
        Ok(records)
    }

    fn listings(&self) -> Result<Vec<ListingId>, StoreError> {
        let mut listings: Vec<ListingId> = self
            .snapshot()
            .into_iter()
            .map(|record| record.listing_id)
            .collect();
        listings.sort();
        listings.dedup();
        Ok(listings)
    }

    fn renumber(
        &self,
        _listing_id: &ListingId,
        assignments: &[PositionAssignment],
    ) -> Result<(), StoreError> {
        if self.stale_renumber {
            return Err(StoreError::Conflict(ConflictKind::StaleWrite));
        }
        let mut records = self.records.lock().expect("lock");
        for assignment in assignments {
            if let Some(record) = records.iter_mut().find(|record| record.id == assignment.id) {
                record.position = assignment.position;
            }
        }
        Ok(())
    }
}

/// Directory whose listings all belong to nobody we know.
pub(super) struct EmptyDirectory;

impl ListingDirectory for EmptyDirectory {
    fn owner_of(&self, _listing_id: &ListingId) -> Result<Option<UserId>, StoreError> {
        Ok(None)
    }
}

pub(super) fn sessions_for(users: &[(&str, UserId)]) -> Arc<SessionCache> {
    let cache = SessionCache::new(Duration::from_secs(600));
    for (token, user) in users {
        cache.remember(*token, user.clone(), Utc::now());
    }
    Arc::new(cache)
}

pub(super) fn router_for(service: MemoryService, sessions: Arc<SessionCache>) -> axum::Router {
    application_router(Arc::new(service), sessions)
}

pub(super) fn authed(request: axum::http::request::Builder, token: &str) -> axum::http::request::Builder {
    request.header(header::AUTHORIZATION, format!("Bearer {token}"))
}

pub(super) fn json_request(method: &str, uri: &str, token: &str, body: &Value) -> Request<axum::body::Body> {
    authed(Request::builder().method(method).uri(uri), token)
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(
            serde_json::to_vec(body).expect("serialize body"),
        ))
        .expect("request")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
