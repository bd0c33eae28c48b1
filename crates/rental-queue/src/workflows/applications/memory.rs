use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::Deserialize;

use super::domain::{ApplicationId, ApplicationRecord, ApplicationStatus, ListingId, UserId};
use super::repository::{
    ApplicationStore, ConflictKind, ListingDirectory, PositionAssignment, StoreError,
};

/// Process-local store sharded by listing.
///
/// Each listing's rows sit behind their own mutex, so writers to different listings never
/// contend and every scan stays inside one listing. A trait call holds at most one listing lock,
/// which gives the same guarantees as a relational table with a unique index on
/// (listing_id, applicant_id) and a partial unique index on (listing_id, position) for pending
/// rows.
#[derive(Debug, Default)]
pub struct InMemoryApplicationStore {
    listings: RwLock<HashMap<ListingId, Arc<Mutex<ListingRows>>>>,
    index: RwLock<HashMap<ApplicationId, ListingId>>,
    next_sequence: AtomicU64,
}

#[derive(Debug, Default)]
struct ListingRows {
    records: HashMap<ApplicationId, ApplicationRecord>,
}

impl ListingRows {
    fn position_held(&self, position: u32, except: &ApplicationId) -> bool {
        self.records.values().any(|other| {
            other.id != *except && other.is_pending() && other.position == position
        })
    }
}

fn poisoned(what: &str) -> StoreError {
    StoreError::Unavailable(format!("{what} lock poisoned"))
}

fn lock_rows(rows: &Mutex<ListingRows>) -> Result<MutexGuard<'_, ListingRows>, StoreError> {
    rows.lock().map_err(|_| poisoned("listing rows"))
}

impl InMemoryApplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, listing_id: &ListingId) -> Result<Option<Arc<Mutex<ListingRows>>>, StoreError> {
        let listings = self.listings.read().map_err(|_| poisoned("listing map"))?;
        Ok(listings.get(listing_id).cloned())
    }

    fn shard_or_create(&self, listing_id: &ListingId) -> Result<Arc<Mutex<ListingRows>>, StoreError> {
        if let Some(rows) = self.shard(listing_id)? {
            return Ok(rows);
        }
        let mut listings = self.listings.write().map_err(|_| poisoned("listing map"))?;
        Ok(listings.entry(listing_id.clone()).or_default().clone())
    }

    fn listing_of(&self, id: &ApplicationId) -> Result<Option<ListingId>, StoreError> {
        let index = self.index.read().map_err(|_| poisoned("application index"))?;
        Ok(index.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.index.read().map(|index| index.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ApplicationStore for InMemoryApplicationStore {
    fn insert(&self, mut record: ApplicationRecord) -> Result<ApplicationRecord, StoreError> {
        let shard = self.shard_or_create(&record.listing_id)?;
        let mut rows = lock_rows(&shard)?;

        if rows
            .records
            .values()
            .any(|other| other.applicant_id == record.applicant_id)
        {
            return Err(StoreError::Conflict(ConflictKind::DuplicateApplicant));
        }
        if record.is_pending() && rows.position_held(record.position, &record.id) {
            return Err(StoreError::Conflict(ConflictKind::PositionTaken));
        }
        {
            let mut index = self.index.write().map_err(|_| poisoned("application index"))?;
            if index.contains_key(&record.id) {
                return Err(StoreError::Conflict(ConflictKind::DuplicateId));
            }
            index.insert(record.id.clone(), record.listing_id.clone());
        }

        record.sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        record.version = 1;
        rows.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update(
        &self,
        mut record: ApplicationRecord,
        expected: ApplicationStatus,
    ) -> Result<ApplicationRecord, StoreError> {
        let listing_id = self.listing_of(&record.id)?.ok_or(StoreError::NotFound)?;
        let shard = self.shard(&listing_id)?.ok_or(StoreError::NotFound)?;
        let mut rows = lock_rows(&shard)?;

        let existing = rows.records.get(&record.id).ok_or(StoreError::NotFound)?;
        if existing.status != expected || existing.version != record.version {
            return Err(StoreError::Conflict(ConflictKind::StaleWrite));
        }
        record.sequence = existing.sequence;
        record.version = existing.version + 1;
        record.listing_id = existing.listing_id.clone();
        record.applicant_id = existing.applicant_id.clone();

        if record.is_pending() && rows.position_held(record.position, &record.id) {
            return Err(StoreError::Conflict(ConflictKind::PositionTaken));
        }

        rows.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        let Some(listing_id) = self.listing_of(id)? else {
            return Ok(None);
        };
        let Some(shard) = self.shard(&listing_id)? else {
            return Ok(None);
        };
        let rows = lock_rows(&shard)?;
        Ok(rows.records.get(id).cloned())
    }

    fn find_by_applicant(
        &self,
        listing_id: &ListingId,
        applicant_id: &UserId,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        let Some(shard) = self.shard(listing_id)? else {
            return Ok(None);
        };
        let rows = lock_rows(&shard)?;
        Ok(rows
            .records
            .values()
            .find(|record| record.applicant_id == *applicant_id)
            .cloned())
    }

    fn max_pending_position(&self, listing_id: &ListingId) -> Result<u32, StoreError> {
        let Some(shard) = self.shard(listing_id)? else {
            return Ok(0);
        };
        let rows = lock_rows(&shard)?;
        Ok(rows
            .records
            .values()
            .filter(|record| record.is_pending())
            .map(|record| record.position)
            .max()
            .unwrap_or(0))
    }

    fn list_for_listing(
        &self,
        listing_id: &ListingId,
    ) -> Result<Vec<ApplicationRecord>, StoreError> {
        let Some(shard) = self.shard(listing_id)? else {
            return Ok(Vec::new());
        };
        let mut records: Vec<ApplicationRecord> =
            lock_rows(&shard)?.records.values().cloned().collect();
        records.sort_by_key(|record| (record.position, record.sequence));
        Ok(records)
    }

    fn listings(&self) -> Result<Vec<ListingId>, StoreError> {
        let shards: Vec<(ListingId, Arc<Mutex<ListingRows>>)> = {
            let listings = self.listings.read().map_err(|_| poisoned("listing map"))?;
            listings
                .iter()
                .map(|(listing_id, rows)| (listing_id.clone(), rows.clone()))
                .collect()
        };

        let mut populated = Vec::new();
        for (listing_id, rows) in shards {
            if !lock_rows(&rows)?.records.is_empty() {
                populated.push(listing_id);
            }
        }
        populated.sort();
        Ok(populated)
    }

    fn renumber(
        &self,
        listing_id: &ListingId,
        assignments: &[PositionAssignment],
    ) -> Result<(), StoreError> {
        let Some(shard) = self.shard(listing_id)? else {
            return if assignments.is_empty() {
                Ok(())
            } else {
                Err(StoreError::Conflict(ConflictKind::StaleWrite))
            };
        };
        let mut rows = lock_rows(&shard)?;

        let pending = rows.records.values().filter(|record| record.is_pending()).count();
        if pending != assignments.len() {
            return Err(StoreError::Conflict(ConflictKind::StaleWrite));
        }

        let mut ids = HashSet::new();
        let mut positions = HashSet::new();
        for assignment in assignments {
            let current = rows
                .records
                .get(&assignment.id)
                .filter(|record| record.is_pending() && record.version == assignment.version);
            if current.is_none() || !ids.insert(&assignment.id) {
                return Err(StoreError::Conflict(ConflictKind::StaleWrite));
            }
            if !positions.insert(assignment.position) {
                return Err(StoreError::Conflict(ConflictKind::PositionTaken));
            }
        }

        for assignment in assignments {
            if let Some(record) = rows.records.get_mut(&assignment.id) {
                if record.position != assignment.position {
                    record.position = assignment.position;
                    record.version += 1;
                }
            }
        }
        Ok(())
    }
}

/// Listing ownership table mirrored from the listing service.
#[derive(Debug, Default)]
pub struct InMemoryListingDirectory {
    owners: RwLock<HashMap<ListingId, UserId>>,
}

/// Failure while loading a listing ownership export.
#[derive(Debug, thiserror::Error)]
pub enum ListingImportError {
    #[error("failed to read listing export: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid listing CSV data: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct ListingRow {
    listing_id: String,
    owner_id: String,
}

impl InMemoryListingDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(self, listing_id: ListingId, owner_id: UserId) -> Self {
        self.register(listing_id, owner_id);
        self
    }

    pub fn register(&self, listing_id: ListingId, owner_id: UserId) {
        match self.owners.write() {
            Ok(mut owners) => {
                owners.insert(listing_id, owner_id);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(listing_id, owner_id);
            }
        }
    }

    /// Load a `listing_id,owner_id` CSV export.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ListingImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let directory = Self::default();

        for row in csv_reader.deserialize::<ListingRow>() {
            let row = row?;
            if row.listing_id.is_empty() || row.owner_id.is_empty() {
                continue;
            }
            directory.register(ListingId(row.listing_id), UserId(row.owner_id));
        }

        Ok(directory)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ListingImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn len(&self) -> usize {
        self.owners.read().map(|owners| owners.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ListingDirectory for InMemoryListingDirectory {
    fn owner_of(&self, listing_id: &ListingId) -> Result<Option<UserId>, StoreError> {
        let owners = self
            .owners
            .read()
            .map_err(|_| StoreError::Unavailable("listing directory lock poisoned".to_string()))?;
        Ok(owners.get(listing_id).cloned())
    }
}
