//! Authentication and authorization integration tests.
//!
//! Tests verify:
//! - Missing, expired, forged and foreign-key tokens are rejected with 401
//! - Scopes gate upload, read and delete
//! - Ownership is enforced, with cross-owner reads only through read scopes
//! - Retired signing keys keep verifying after rotation

use std::time::Duration;

use axum::http::{header, StatusCode};
use bytes::Bytes;
use tower::ServiceExt;

use image_pipeline::auth::{AccessPolicy, Role, Scope, SigningKeys, TokenService};
use image_pipeline::error::{PipelineError, PolicyDenial, ResponseCode};
use image_pipeline::pipeline::{PipelineRequest, Stage};

use super::test_utils::{
    body_json, create_jpeg, delete_request, expired_token, get_request, put_request, token_for,
    token_with_scopes, TestHarness, SECRET,
};

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_missing_token_rejected() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(16, 16), "image/jpeg").await;

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}", id), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Bearer"
    );
    let json = body_json(response).await;
    assert_eq!(json["error"], "unauthenticated");
}

#[tokio::test]
async fn test_expired_token_rejected() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(16, 16), "image/jpeg").await;
    let token = expired_token("alice");

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}?w=8", id), Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"], "token_expired");

    // Rejected before any work
    assert_eq!(harness.engine.calls(), 0);
}

#[tokio::test]
async fn test_expired_token_through_handle() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(16, 16), "image/jpeg").await;

    let response = harness
        .pipeline
        .handle(PipelineRequest::get(id, Some(expired_token("alice"))))
        .await;

    assert_eq!(response.code, ResponseCode::Denied);
    assert!(response.body.is_none());
    assert_eq!(response.trace.last(), Some(Stage::Denied));
    assert!(!response.trace.contains(Stage::CacheLookup));
}

#[tokio::test]
async fn test_forged_token_rejected() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(16, 16), "image/jpeg").await;

    // Bob's claims under Alice's signature
    let alice = token_for("alice", Role::User);
    let bob = token_for("bob", Role::User);
    let alice_parts: Vec<&str> = alice.split('.').collect();
    let bob_parts: Vec<&str> = bob.split('.').collect();
    let forged = format!("{}.{}.{}", alice_parts[0], bob_parts[1], alice_parts[2]);

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}", id), Some(&forged)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}", id), Some("not.a.token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_from_foreign_key_rejected() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(16, 16), "image/jpeg").await;

    let foreign_keys = SigningKeys::new("k1", "ffffffffffffffffffffffffffffffff").unwrap();
    let foreign = TokenService::new(foreign_keys)
        .issue("alice", &[Scope::Read], Duration::from_secs(600))
        .unwrap()
        .token;

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}", id), Some(&foreign)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[test]
fn test_retired_key_still_verifies() {
    let old_keys = SigningKeys::new("k0", "abcdefghijklmnopqrstuvwxyz012345").unwrap();
    let old_token = TokenService::new(old_keys.clone())
        .issue("alice", &[Scope::Read], Duration::from_secs(600))
        .unwrap()
        .token;

    let rotated = old_keys.rotate("k1", SECRET).unwrap();
    let policy = AccessPolicy::new(TokenService::new(rotated));

    let principal = policy.authenticate(Some(&old_token)).unwrap();
    assert_eq!(principal.subject, "alice");

    // New tokens are signed with the new key and verify too
    let new_token = policy
        .tokens()
        .issue("bob", &[Scope::Read], Duration::from_secs(600))
        .unwrap()
        .token;
    assert_eq!(policy.authenticate(Some(&new_token)).unwrap().subject, "bob");
}

// =============================================================================
// Scopes
// =============================================================================

#[tokio::test]
async fn test_read_only_token_cannot_upload() {
    let harness = TestHarness::new();
    let token = token_for("alice", Role::User);

    let response = harness
        .router()
        .oneshot(put_request(create_jpeg(16, 16), "image/jpeg", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error"], "scope_insufficient");
    assert!(harness.backend.is_empty().await);
}

#[tokio::test]
async fn test_read_only_token_cannot_delete() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(16, 16), "image/jpeg").await;
    let token = token_for("alice", Role::User);

    let response = harness
        .router()
        .oneshot(delete_request(&format!("/assets/{}", id), Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(harness.backend.len().await, 1);
}

// =============================================================================
// Ownership
// =============================================================================

#[tokio::test]
async fn test_cross_owner_read_denied() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(16, 16), "image/jpeg").await;
    let token = token_for("bob", Role::Manager);

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}?w=8", id), Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_owner");
    assert_eq!(harness.engine.calls(), 0);

    let err = harness
        .pipeline
        .describe(Some(&token), &id)
        .await
        .unwrap_err();
    assert_eq!(err, PipelineError::Denied(PolicyDenial::NotOwner));
}

#[tokio::test]
async fn test_cross_owner_read_with_read_scopes() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(16, 16), "image/jpeg").await;

    let admin = token_for("root", Role::Admin);
    let delegate = token_with_scopes("bob", &[Scope::ReadOwner("alice".to_string())]);
    let other = token_with_scopes("bob", &[Scope::ReadOwner("carol".to_string())]);

    for token in [&admin, &delegate] {
        let response = harness
            .router()
            .oneshot(get_request(&format!("/assets/{}?w=8", id), Some(token.as_str())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}", id), Some(&other)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cross_owner_delete_never_allowed() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(16, 16), "image/jpeg").await;
    let admin = token_for("root", Role::Admin);

    let response = harness
        .router()
        .oneshot(delete_request(&format!("/assets/{}", id), Some(&admin)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_owner");
    assert_eq!(harness.backend.len().await, 1);
}

#[tokio::test]
async fn test_uploads_are_owned_by_token_subject() {
    let harness = TestHarness::new();
    let token = token_for("alice", Role::Manager);

    let info = harness
        .pipeline
        .upload(Some(&token), Bytes::from(create_jpeg(8, 8)), "image/jpeg")
        .await
        .unwrap();
    assert_eq!(info.owner, "alice");
}

#[tokio::test]
async fn test_existence_checked_before_ownership() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(16, 16), "image/jpeg").await;
    let missing = "0".repeat(64);
    let stranger = token_for("bob", Role::Manager);

    // A stranger sees 403 for an existing id and 404 for a missing one
    for (uri, status) in [
        (format!("/assets/{}", id), StatusCode::FORBIDDEN),
        (format!("/assets/{}", missing), StatusCode::NOT_FOUND),
        (format!("/assets/{}/meta", id), StatusCode::FORBIDDEN),
        (format!("/assets/{}/meta", missing), StatusCode::NOT_FOUND),
    ] {
        let response = harness
            .router()
            .oneshot(get_request(&uri, Some(&stranger)))
            .await
            .unwrap();
        assert_eq!(response.status(), status, "{}", uri);
    }

    let response = harness
        .router()
        .oneshot(delete_request(&format!("/assets/{}", missing), Some(&stranger)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Denial carries no metadata
    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}/meta", id), Some(&stranger)))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_owner");
    assert!(json.get("owner").is_none());
    assert!(json.get("size").is_none());
}
