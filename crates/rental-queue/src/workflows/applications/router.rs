use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{
    ApplicationId, ApplicationStatus, ApplicationSubmission, ApplicationView, ListingId, UserId,
};
use super::error::QueueError;
use super::lifecycle::TransitionRequest;
use super::reconciler::ReconcileOutcome;
use super::repository::{ApplicationStore, ListingDirectory, StoreError};
use super::service::ApplicationQueueService;
use crate::sessions::SessionCache;

/// Shared handler state: the queue service and the session cache used to resolve callers.
pub struct QueueState<S, D> {
    pub service: Arc<ApplicationQueueService<S, D>>,
    pub sessions: Arc<SessionCache>,
}

impl<S, D> Clone for QueueState<S, D> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            sessions: self.sessions.clone(),
        }
    }
}

impl<S, D> FromRef<QueueState<S, D>> for Arc<SessionCache> {
    fn from_ref(state: &QueueState<S, D>) -> Self {
        state.sessions.clone()
    }
}

/// Caller identity resolved from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub token: String,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn unauthenticated() -> Response {
    let payload = json!({
        "error": "unauthenticated",
        "message": "a valid bearer session is required",
    });
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

#[async_trait]
impl<T> FromRequestParts<T> for Actor
where
    T: Send + Sync,
    Arc<SessionCache>: FromRef<T>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &T) -> Result<Self, Self::Rejection> {
        let sessions = Arc::<SessionCache>::from_ref(state);
        let token = bearer_token(&parts.headers).ok_or_else(unauthenticated)?;
        let user_id = sessions
            .resolve(token, Utc::now())
            .ok_or_else(unauthenticated)?;
        Ok(Actor {
            user_id,
            token: token.to_string(),
        })
    }
}

/// Router builder exposing submission, review, and queue maintenance endpoints.
pub fn application_router<S, D>(
    service: Arc<ApplicationQueueService<S, D>>,
    sessions: Arc<SessionCache>,
) -> Router
where
    S: ApplicationStore + 'static,
    D: ListingDirectory + 'static,
{
    Router::new()
        .route(
            "/api/v1/listings/:listing_id/applications",
            post(submit_handler::<S, D>).get(listing_handler::<S, D>),
        )
        .route(
            "/api/v1/listings/:listing_id/queue/reconcile",
            post(reconcile_handler::<S, D>),
        )
        .route(
            "/api/v1/applications/:application_id",
            get(application_handler::<S, D>),
        )
        .route(
            "/api/v1/applications/:application_id/status",
            post(transition_handler::<S, D>),
        )
        .route("/api/v1/sessions/sign-out", post(sign_out_handler))
        .with_state(QueueState { service, sessions })
}

/// Map a queue failure onto a status code and a `{error, message}` payload.
pub fn error_response(error: QueueError) -> Response {
    let status = match &error {
        QueueError::DuplicatePendingApplication { .. } => StatusCode::CONFLICT,
        QueueError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        QueueError::InvalidStatusTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        QueueError::PositionAllocationExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        QueueError::ReconciliationConflict { .. } => StatusCode::CONFLICT,
        QueueError::NotFound(_) => StatusCode::NOT_FOUND,
        QueueError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
        QueueError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = json!({
        "error": error.code(),
        "message": error.to_string(),
    });

    if error.is_retryable() {
        (status, [(header::RETRY_AFTER, "1")], Json(payload)).into_response()
    } else {
        (status, Json(payload)).into_response()
    }
}

/// Acknowledgement returned for created or reactivated applications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub application_id: ApplicationId,
    pub listing_id: ListingId,
    pub position: u32,
    pub status: ApplicationStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListingQuery {
    #[serde(default)]
    pub status: Option<ApplicationStatus>,
}

pub(crate) async fn submit_handler<S, D>(
    State(state): State<QueueState<S, D>>,
    actor: Actor,
    Path(listing_id): Path<String>,
    Json(submission): Json<ApplicationSubmission>,
) -> Response
where
    S: ApplicationStore + 'static,
    D: ListingDirectory + 'static,
{
    let listing_id = ListingId(listing_id);
    match state
        .service
        .submit(&listing_id, &actor.user_id, submission)
        .await
    {
        Ok(record) => {
            let receipt = SubmissionReceipt {
                application_id: record.id,
                listing_id: record.listing_id,
                position: record.position,
                status: record.status,
            };
            (StatusCode::CREATED, Json(receipt)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn listing_handler<S, D>(
    State(state): State<QueueState<S, D>>,
    actor: Actor,
    Path(listing_id): Path<String>,
    Query(query): Query<ListingQuery>,
) -> Response
where
    S: ApplicationStore + 'static,
    D: ListingDirectory + 'static,
{
    let listing_id = ListingId(listing_id);
    match state
        .service
        .listing_applications(&listing_id, &actor.user_id, query.status)
    {
        Ok(records) => {
            let views: Vec<ApplicationView> = records.iter().map(|record| record.view()).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn application_handler<S, D>(
    State(state): State<QueueState<S, D>>,
    actor: Actor,
    Path(application_id): Path<String>,
) -> Response
where
    S: ApplicationStore + 'static,
    D: ListingDirectory + 'static,
{
    let application_id = ApplicationId(application_id);
    match state.service.get(&application_id, &actor.user_id) {
        Ok(record) => (StatusCode::OK, Json(record.view())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn transition_handler<S, D>(
    State(state): State<QueueState<S, D>>,
    actor: Actor,
    Path(application_id): Path<String>,
    Json(request): Json<TransitionRequest>,
) -> Response
where
    S: ApplicationStore + 'static,
    D: ListingDirectory + 'static,
{
    let application_id = ApplicationId(application_id);
    match state
        .service
        .transition(&application_id, &actor.user_id, request)
    {
        Ok(record) => (StatusCode::OK, Json(record.view())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn reconcile_handler<S, D>(
    State(state): State<QueueState<S, D>>,
    actor: Actor,
    Path(listing_id): Path<String>,
) -> Response
where
    S: ApplicationStore + 'static,
    D: ListingDirectory + 'static,
{
    let listing_id = ListingId(listing_id);
    match state.service.reconcile(&listing_id, &actor.user_id) {
        Ok(outcome) => (StatusCode::OK, Json(reconcile_payload(outcome))).into_response(),
        Err(error) => error_response(error),
    }
}

fn reconcile_payload(outcome: ReconcileOutcome) -> serde_json::Value {
    let assignments: Vec<serde_json::Value> = outcome
        .assignments
        .into_iter()
        .map(|(application_id, position)| {
            json!({ "application_id": application_id, "position": position })
        })
        .collect();
    json!({
        "listing_id": outcome.listing_id,
        "pending": outcome.pending,
        "renumbered": outcome.renumbered,
        "assignments": assignments,
    })
}

pub(crate) async fn sign_out_handler(
    State(sessions): State<Arc<SessionCache>>,
    actor: Actor,
) -> StatusCode {
    sessions.invalidate(&actor.token);
    StatusCode::NO_CONTENT
}
