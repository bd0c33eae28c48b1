use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use rental_queue::config::AppConfig;
use rental_queue::sessions::SessionCache;
use rental_queue::workflows::applications::{
    ApplicationQueueService, InMemoryApplicationStore, InMemoryListingDirectory,
    ListingImportError, UserId,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub(crate) type QueueService =
    ApplicationQueueService<InMemoryApplicationStore, InMemoryListingDirectory>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Listing ownership from the configured CSV export, or an empty directory.
pub(crate) fn listing_directory(
    config: &AppConfig,
) -> Result<InMemoryListingDirectory, ListingImportError> {
    match &config.listings_csv {
        Some(path) => InMemoryListingDirectory::from_path(path),
        None => Ok(InMemoryListingDirectory::new()),
    }
}

pub(crate) fn queue_service(
    config: &AppConfig,
    directory: InMemoryListingDirectory,
) -> Arc<QueueService> {
    let store = Arc::new(InMemoryApplicationStore::new());
    Arc::new(ApplicationQueueService::new(
        store,
        Arc::new(directory),
        config.queue.retry_policy(),
    ))
}

pub(crate) fn session_cache(config: &AppConfig, seeded: &[(String, UserId)]) -> Arc<SessionCache> {
    let cache = SessionCache::new(config.sessions.ttl());
    let now = Utc::now();
    for (token, user_id) in seeded {
        cache.remember(token.clone(), user_id.clone(), now);
    }
    Arc::new(cache)
}

pub(crate) fn parse_session(raw: &str) -> Result<(String, UserId), String> {
    let (token, user) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TOKEN=USER_ID, got '{raw}'"))?;
    let (token, user) = (token.trim(), user.trim());
    if token.is_empty() || user.is_empty() {
        return Err(format!("token and user id must be non-empty in '{raw}'"));
    }
    Ok((token.to_string(), UserId(user.to_string())))
}
