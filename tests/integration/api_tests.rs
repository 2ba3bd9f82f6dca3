//! API integration tests for upload, fetch, metadata and delete.
//!
//! Tests verify:
//! - Derivative generation through HTTP (resize + format conversion)
//! - Error cases and their status codes / JSON bodies
//! - Response headers

use axum::http::{header, StatusCode};
use tower::ServiceExt;

use image_pipeline::auth::Role;
use image_pipeline::server::RouterConfig;

use super::test_utils::{
    body_bytes, body_json, create_jpeg, create_transparent_png, decoded_dimensions, delete_request,
    get_request, is_png, is_webp, preflight_request, put_request, token_for, TestHarness,
};

// =============================================================================
// Upload
// =============================================================================

#[tokio::test]
async fn test_upload_returns_metadata() {
    let harness = TestHarness::new();
    let token = token_for("alice", Role::Manager);
    let jpeg = create_jpeg(64, 48);
    let size = jpeg.len();

    let response = harness
        .router()
        .oneshot(put_request(jpeg, "image/jpeg", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let json = body_json(response).await;
    assert_eq!(json["owner"], "alice");
    assert_eq!(json["mime_type"], "image/jpeg");
    assert_eq!(json["size"], size);
    let id = json["id"].as_str().unwrap();
    assert_eq!(id.len(), 64);
    assert_eq!(location, format!("/assets/{}", id));
}

#[tokio::test]
async fn test_reupload_is_idempotent() {
    let harness = TestHarness::new();
    let jpeg = create_jpeg(32, 32);

    let first = harness.upload("alice", jpeg.clone(), "image/jpeg").await;
    let second = harness.upload("alice", jpeg.clone(), "image/jpeg").await;
    let other_owner = harness.upload("bob", jpeg, "image/jpeg").await;

    assert_eq!(first, second);
    assert_ne!(first, other_owner);
    assert_eq!(harness.backend.len().await, 2);
}

#[tokio::test]
async fn test_upload_oversize_rejected() {
    let harness = TestHarness::with_max_upload(1024);
    let token = token_for("alice", Role::Manager);
    let jpeg = create_jpeg(256, 256);
    assert!(jpeg.len() > 1024);

    let response = harness
        .router()
        .oneshot(put_request(jpeg, "image/jpeg", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let json = body_json(response).await;
    assert_eq!(json["error"], "payload_too_large");

    // Nothing was stored
    assert!(harness.backend.is_empty().await);
}

#[tokio::test]
async fn test_upload_unsupported_media_type() {
    let harness = TestHarness::new();
    let token = token_for("alice", Role::Manager);

    let response = harness
        .router()
        .oneshot(put_request(b"GIF89a....".to_vec(), "image/gif", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    // Declared type disagrees with the bytes
    let response = harness
        .router()
        .oneshot(put_request(create_jpeg(8, 8), "image/png", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(harness.backend.is_empty().await);
}

#[tokio::test]
async fn test_upload_empty_body() {
    let harness = TestHarness::new();
    let token = token_for("alice", Role::Manager);

    let response = harness
        .router()
        .oneshot(put_request(Vec::new(), "image/jpeg", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "empty_payload");
}

// =============================================================================
// Fetch
// =============================================================================

#[tokio::test]
async fn test_resize_and_convert_to_webp() {
    let harness = TestHarness::new();
    let id = harness
        .upload("alice", create_jpeg(2000, 1500), "image/jpeg")
        .await;
    let token = token_for("alice", Role::User);

    let response = harness
        .router()
        .oneshot(get_request(
            &format!("/assets/{}?w=200&h=150&fmt=webp", id),
            Some(&token),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/webp"
    );
    assert_eq!(response.headers().get("x-derivative-cache").unwrap(), "miss");
    assert_eq!(
        response.headers().get("x-derivative-format").unwrap(),
        "image/webp"
    );
    let cache_control = response
        .headers()
        .get(header::CACHE_CONTROL)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(cache_control.contains("private"));

    let body = body_bytes(response).await;
    assert!(is_webp(&body));
    assert_eq!(decoded_dimensions(&body), (200, 150));
    assert_eq!(harness.engine.calls(), 1);

    // Second identical request is served from the cache
    let response = harness
        .router()
        .oneshot(get_request(
            &format!("/assets/{}?w=200&h=150&fmt=webp", id),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-derivative-cache").unwrap(), "hit");
    assert_eq!(harness.engine.calls(), 1);
}

#[tokio::test]
async fn test_default_quality_applies_without_q() {
    let harness = TestHarness::new();
    let id = harness
        .upload("alice", create_jpeg(800, 600), "image/jpeg")
        .await;
    let token = token_for("alice", Role::User);
    let uri = format!("/assets/{}?w=200&fmt=webp", id);

    let low = harness
        .router_with(RouterConfig::new().with_default_quality(10))
        .oneshot(get_request(&uri, Some(&token)))
        .await
        .unwrap();
    assert_eq!(low.status(), StatusCode::OK);
    let low = body_bytes(low).await;

    let high = harness
        .router_with(RouterConfig::new().with_default_quality(90))
        .oneshot(get_request(&uri, Some(&token)))
        .await
        .unwrap();
    assert_eq!(high.status(), StatusCode::OK);
    let high = body_bytes(high).await;

    assert!(is_webp(&low) && is_webp(&high));
    assert!(low.len() < high.len());
    assert_eq!(harness.engine.calls(), 2);

    // An explicit q overrides the default and lands on the same derivative
    let explicit = harness
        .router_with(RouterConfig::new().with_default_quality(90))
        .oneshot(get_request(&format!("{}&q=10", uri), Some(&token)))
        .await
        .unwrap();
    assert_eq!(explicit.headers().get("x-derivative-cache").unwrap(), "hit");
    assert_eq!(body_bytes(explicit).await, low);
    assert_eq!(harness.engine.calls(), 2);
}

#[tokio::test]
async fn test_fetch_original_without_transform() {
    let harness = TestHarness::new();
    let jpeg = create_jpeg(40, 30);
    let id = harness.upload("alice", jpeg.clone(), "image/jpeg").await;
    let token = token_for("alice", Role::User);

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}", id), Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/jpeg"
    );
    assert!(response.headers().get("x-derivative-cache").is_none());
    assert_eq!(body_bytes(response).await.as_ref(), jpeg.as_slice());
    assert_eq!(harness.engine.calls(), 0);
    assert!(harness.cache.is_empty().await);
}

#[tokio::test]
async fn test_alpha_falls_back_from_jpeg() {
    let harness = TestHarness::new();
    let id = harness
        .upload("alice", create_transparent_png(64, 64), "image/png")
        .await;
    let token = token_for("alice", Role::User);

    let response = harness
        .router()
        .oneshot(get_request(
            &format!("/assets/{}?w=32&fmt=jpeg", id),
            Some(&token),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let produced = response
        .headers()
        .get("x-derivative-format")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_ne!(produced, "image/jpeg");

    let body = body_bytes(response).await;
    assert!(is_webp(&body) || is_png(&body));
}

#[tokio::test]
async fn test_zero_width_rejected_before_work() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(64, 48), "image/jpeg").await;
    let token = token_for("alice", Role::User);

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}?w=0", id), Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "unsupported_transform");

    assert_eq!(harness.engine.calls(), 0);
    assert!(harness.cache.is_empty().await);
    assert_eq!(harness.cache.stats().await.in_flight, 0);
}

#[tokio::test]
async fn test_malformed_query_values() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(16, 16), "image/jpeg").await;
    let token = token_for("alice", Role::User);

    for query in ["w=abc", "fmt=gif", "fit=cover", "q=-1"] {
        let response = harness
            .router()
            .oneshot(get_request(
                &format!("/assets/{}?{}", id, query),
                Some(&token),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", query);
    }

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}?q=0", id), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "unsupported_transform");
}

#[tokio::test]
async fn test_fetch_missing_asset() {
    let harness = TestHarness::new();
    let token = token_for("alice", Role::User);
    let missing = "0".repeat(64);

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}?w=10", missing), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
    assert_eq!(json["status"], 404);

    // Not even shaped like an id
    let response = harness
        .router()
        .oneshot(get_request("/assets/not-an-id", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_undecodable_asset() {
    let harness = TestHarness::new();
    // JPEG magic followed by garbage: accepted at upload, fails to decode
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
    data.extend_from_slice(&[0u8; 64]);
    let id = harness.upload("alice", data, "image/jpeg").await;
    let token = token_for("alice", Role::User);

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}?w=16", id), Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["error"], "decode_error");
    assert!(harness.cache.is_empty().await);
}

// =============================================================================
// Metadata
// =============================================================================

#[tokio::test]
async fn test_asset_metadata() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(16, 16), "image/jpeg").await;
    let token = token_for("alice", Role::User);

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}/meta", id), Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["id"], id.as_str());
    assert_eq!(json["owner"], "alice");
}

#[tokio::test]
async fn test_batch_metadata_reports_all_missing() {
    let harness = TestHarness::new();
    let a = harness.upload("alice", create_jpeg(16, 16), "image/jpeg").await;
    let b = harness.upload("alice", create_jpeg(20, 16), "image/jpeg").await;
    let token = token_for("alice", Role::User);

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets?ids={},{}", a, b), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["assets"].as_array().unwrap().len(), 2);

    let gone_1 = "1".repeat(64);
    let gone_2 = "2".repeat(64);
    let response = harness
        .router()
        .oneshot(get_request(
            &format!("/assets?ids={},{},{}", a, gone_1, gone_2),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    let message = json["message"].as_str().unwrap();
    assert!(message.contains(&gone_1));
    assert!(message.contains(&gone_2));

    let response = harness
        .router()
        .oneshot(get_request("/assets", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn test_delete_then_fetch() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(32, 32), "image/jpeg").await;
    let token = token_for("alice", Role::Manager);

    let response = harness
        .router()
        .oneshot(delete_request(&format!("/assets/{}", id), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = harness
        .router()
        .oneshot(get_request(&format!("/assets/{}", id), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_is_public() {
    let harness = TestHarness::new();

    let response = harness
        .router()
        .oneshot(get_request("/health", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["storage"], "memory");
    assert_eq!(json["cache"]["entries"], 0);
}

// =============================================================================
// CORS
// =============================================================================

#[tokio::test]
async fn test_cors_preflight_any_origin() {
    let harness = TestHarness::new();

    let response = harness
        .router()
        .oneshot(preflight_request("/assets/abc", "https://app.example"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    let methods = headers
        .get(header::ACCESS_CONTROL_ALLOW_METHODS)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(methods.contains("PUT") && methods.contains("DELETE"));
}

#[tokio::test]
async fn test_cors_exposes_derivative_headers() {
    let harness = TestHarness::new();

    let request = axum::http::Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "https://app.example")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = harness.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let exposed = response
        .headers()
        .get(header::ACCESS_CONTROL_EXPOSE_HEADERS)
        .unwrap()
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(exposed.contains("x-derivative-cache"));
    assert!(exposed.contains("x-derivative-format"));
}

#[tokio::test]
async fn test_cors_restricted_origins() {
    let harness = TestHarness::new();
    let config = RouterConfig::new().with_cors_origins(vec!["https://app.example".to_string()]);

    let allowed = harness
        .router_with(config.clone())
        .oneshot(preflight_request("/assets", "https://app.example"))
        .await
        .unwrap();
    assert_eq!(
        allowed
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "https://app.example"
    );

    let refused = harness
        .router_with(config)
        .oneshot(preflight_request("/assets", "https://evil.example"))
        .await
        .unwrap();
    assert!(refused
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());

    let closed = harness
        .router_with(RouterConfig::new().with_cors_origins(vec![]))
        .oneshot(preflight_request("/assets", "https://app.example"))
        .await
        .unwrap();
    assert!(closed
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}
