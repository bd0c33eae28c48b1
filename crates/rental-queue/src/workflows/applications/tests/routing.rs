use super::common::*;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::workflows::applications::domain::{ApplicationStatus, ListingId};
use crate::workflows::applications::error_response;
use crate::workflows::applications::QueueError;

const TENANT_A: &str = "tok-tenant-a";
const TENANT_B: &str = "tok-tenant-b";
const LANDLORD: &str = "tok-landlord";

fn router() -> axum::Router {
    let (service, _) = build_service();
    let sessions = sessions_for(&[
        (TENANT_A, applicant("a")),
        (TENANT_B, applicant("b")),
        (LANDLORD, owner()),
    ]);
    router_for(service, sessions)
}

fn submit_request(token: &str) -> Request<Body> {
    json_request(
        "POST",
        "/api/v1/listings/L1/applications",
        token,
        &json!({ "notes": "two cats", "documents": [] }),
    )
}

#[tokio::test]
async fn submit_requires_bearer_session() {
    let response = router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/listings/L1/applications")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .expect("request"),
        )
        .await
        .expect("router dispatch");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], json!("unauthenticated"));
}

#[tokio::test]
async fn submit_returns_receipt_then_conflict_on_duplicate() {
    let router = router();

    let response = router
        .clone()
        .oneshot(submit_request(TENANT_A))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["position"], json!(1));
    assert_eq!(payload["status"], json!("pending"));
    assert_eq!(payload["listing_id"], json!("L1"));
    assert!(payload["application_id"].is_string());

    let response = router
        .clone()
        .oneshot(submit_request(TENANT_A))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], json!("duplicate_pending_application"));
}

#[tokio::test]
async fn unknown_listing_maps_to_not_found() {
    let response = router()
        .oneshot(json_request(
            "POST",
            "/api/v1/listings/L404/applications",
            TENANT_A,
            &json!({}),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn owner_reviews_queue_and_accepts() {
    let router = router();
    for token in [TENANT_A, TENANT_B] {
        let response = router
            .clone()
            .oneshot(submit_request(token))
            .await
            .expect("router dispatch");
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = router
        .clone()
        .oneshot(
            authed(Request::builder().uri("/api/v1/listings/L1/applications?status=pending"), LANDLORD)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let queue = read_json_body(response).await;
    let entries = queue.as_array().expect("array payload");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["position"], json!(1));
    assert_eq!(entries[0]["applicant_id"], json!("tenant-a"));
    let first_id = entries[0]["application_id"]
        .as_str()
        .expect("application id")
        .to_string();

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/applications/{first_id}/status"),
            LANDLORD,
            &json!({ "status": "accepted", "review_notes": "welcome" }),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let accepted = read_json_body(response).await;
    assert_eq!(accepted["status"], json!("accepted"));
    assert_eq!(accepted["review_notes"], json!("welcome"));

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/applications/{first_id}/status"),
            TENANT_A,
            &json!({ "status": "withdrawn" }),
        ))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], json!("invalid_status_transition"));
}

#[tokio::test]
async fn applicants_cannot_read_listing_queue() {
    let response = router()
        .oneshot(
            authed(Request::builder().uri("/api/v1/listings/L1/applications"), TENANT_A)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_application_maps_to_not_found() {
    let response = router()
        .oneshot(
            authed(Request::builder().uri("/api/v1/applications/does-not-exist"), LANDLORD)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let payload: Value = read_json_body(response).await;
    assert_eq!(payload["error"], json!("not_found"));
}

#[tokio::test]
async fn owner_can_trigger_reconciliation() {
    let router = router();
    let response = router
        .clone()
        .oneshot(submit_request(TENANT_A))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::CREATED);

    let reconcile = |token: &str| {
        authed(
            Request::builder()
                .method("POST")
                .uri("/api/v1/listings/L1/queue/reconcile"),
            token,
        )
        .body(Body::empty())
        .expect("request")
    };

    let response = router
        .clone()
        .oneshot(reconcile(LANDLORD))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["pending"], json!(1));
    assert_eq!(payload["renumbered"], json!(0));

    let response = router
        .clone()
        .oneshot(reconcile(TENANT_A))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn sign_out_invalidates_session() {
    let (service, _) = build_service();
    let sessions = sessions_for(&[(TENANT_A, applicant("a"))]);
    let router = router_for(service, sessions.clone());

    let response = router
        .clone()
        .oneshot(
            authed(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/sessions/sign-out"),
                TENANT_A,
            )
            .body(Body::empty())
            .expect("request"),
        )
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(sessions.is_empty());

    let response = router
        .clone()
        .oneshot(submit_request(TENANT_A))
        .await
        .expect("router dispatch");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn retryable_errors_carry_retry_after() {
    let response = error_response(QueueError::PositionAllocationExhausted {
        listing_id: ListingId("L1".to_string()),
        attempts: 15,
    });
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok()),
        Some("1")
    );
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], json!("position_allocation_exhausted"));

    let response = error_response(QueueError::InvalidStatusTransition {
        from: ApplicationStatus::Accepted,
        to: ApplicationStatus::Rejected,
    });
    assert!(response.headers().get(header::RETRY_AFTER).is_none());
}
