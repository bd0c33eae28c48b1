//! Process-wide cache of resolved sessions.
//!
//! Tokens are issued by the authentication service and registered here with a bounded lifetime.
//! Sign-out invalidates the entry immediately instead of waiting for expiry.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::workflows::applications::UserId;

#[derive(Debug, Clone)]
struct SessionEntry {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SessionCache {
    ttl: chrono::Duration,
    entries: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1));
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Register `token` for `user_id`, returning its expiry.
    pub fn remember(
        &self,
        token: impl Into<String>,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let expires_at = now + self.ttl;
        self.entries().insert(
            token.into(),
            SessionEntry {
                user_id,
                expires_at,
            },
        );
        expires_at
    }

    /// Resolve a live token. Expired entries are evicted on sight.
    pub fn resolve(&self, token: &str, now: DateTime<Utc>) -> Option<UserId> {
        let mut entries = self.entries();
        let lookup = entries
            .get(token)
            .map(|entry| (entry.expires_at > now, entry.user_id.clone()));
        match lookup {
            Some((true, user_id)) => Some(user_id),
            Some((false, _)) => {
                entries.remove(token);
                None
            }
            None => None,
        }
    }

    /// Sign-out hook for a single session.
    pub fn invalidate(&self, token: &str) -> bool {
        self.entries().remove(token).is_some()
    }

    /// Drop every session of a user, e.g. after a password change.
    pub fn invalidate_user(&self, user_id: &UserId) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.user_id != *user_id);
        before - entries.len()
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
