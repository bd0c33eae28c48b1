use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::domain::ListingId;
use super::error::QueueError;
use super::repository::{ApplicationStore, ConflictKind};

const DEFAULT_MAX_ATTEMPTS: u32 = 15;
const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(10);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Bounded exponential backoff used while competing for a queue position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
            max_backoff: max_backoff.max(base_backoff),
        }
    }

    /// Delay before retrying after the zero-based `attempt`, without jitter.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Backoff plus uniform jitter in `[0, backoff]`.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_for_attempt(attempt);
        let ceiling = u64::try_from(backoff.as_micros()).unwrap_or(u64::MAX);
        let jitter = rand::thread_rng().gen_range(0..=ceiling);
        backoff + Duration::from_micros(jitter)
    }
}

/// Produces the next free position of a listing queue by optimistic read-then-write.
///
/// Each attempt reads the highest pending position, proposes the one after it, and hands it to
/// the caller's persistence step. A store conflict means another writer landed first, so the
/// maximum is re-read after a jittered backoff. Running out of attempts is reported as
/// [`QueueError::PositionAllocationExhausted`].
pub struct PositionAllocator<S> {
    store: Arc<S>,
    policy: RetryPolicy,
}

impl<S> PositionAllocator<S>
where
    S: ApplicationStore + 'static,
{
    pub fn new(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Next position after the current pending maximum.
    pub fn propose(&self, listing_id: &ListingId) -> Result<u32, QueueError> {
        let max = self.store.max_pending_position(listing_id)?;
        Ok(max.saturating_add(1))
    }

    /// Run `persist` with proposed positions until one commits.
    ///
    /// `persist` must perform exactly one store transaction. Any store conflict it returns is
    /// retried; every other error is returned unchanged.
    pub async fn allocate<T, F>(&self, listing_id: &ListingId, mut persist: F) -> Result<T, QueueError>
    where
        F: FnMut(u32) -> Result<T, QueueError>,
    {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 0..attempts {
            let position = self.propose(listing_id)?;
            let error = match persist(position) {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let Some(kind) = error.conflict_kind() else {
                return Err(error);
            };
            debug!(
                listing_id = %listing_id,
                position,
                attempt = attempt + 1,
                conflict = ?kind,
                "queue position write conflicted"
            );

            if attempt + 1 < attempts {
                let delay = match kind {
                    ConflictKind::PositionTaken => self.policy.jittered_backoff(attempt),
                    _ => Duration::ZERO,
                };
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        warn!(listing_id = %listing_id, attempts, "queue position allocation exhausted");
        Err(QueueError::PositionAllocationExhausted {
            listing_id: listing_id.clone(),
            attempts,
        })
    }
}
