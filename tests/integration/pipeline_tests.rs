//! Transport-neutral pipeline tests through `Pipeline::handle`.
//!
//! Tests verify:
//! - Response codes for full upload / fetch / delete flows
//! - Stage traces for miss, hit and joined requests

use std::time::Duration;

use bytes::Bytes;

use image_pipeline::auth::Role;
use image_pipeline::error::ResponseCode;
use image_pipeline::pipeline::{PipelineRequest, Stage};
use image_pipeline::transcode::{OutputFormat, TransformSpec};

use super::test_utils::{create_jpeg, decoded_dimensions, is_webp, token_for, TestHarness};

#[tokio::test]
async fn test_upload_and_fetch_derivative() {
    let harness = TestHarness::new();
    let token = token_for("alice", Role::Manager);

    let put = harness
        .pipeline
        .handle(PipelineRequest::put(
            Bytes::from(create_jpeg(2000, 1500)),
            "image/jpeg",
            Some(token.clone()),
        ))
        .await;
    assert_eq!(put.code, ResponseCode::Ok);
    assert_eq!(put.mime_type.as_deref(), Some("application/json"));

    let info: serde_json::Value = serde_json::from_slice(&put.body.unwrap()).unwrap();
    let id = info["id"].as_str().unwrap().to_string();

    let spec = TransformSpec::bounded(200, 150).with_format(OutputFormat::WebP);
    let get = harness
        .pipeline
        .handle(PipelineRequest::get(&id, Some(token.clone())).with_transform(spec))
        .await;

    assert_eq!(get.code, ResponseCode::Ok);
    assert_eq!(get.mime_type.as_deref(), Some("image/webp"));
    assert_eq!(
        get.trace.stages(),
        &[
            Stage::Received,
            Stage::Authorizing,
            Stage::CacheLookup,
            Stage::Miss,
            Stage::Transcoding,
            Stage::CacheStore,
            Stage::Responding,
            Stage::Done,
        ]
    );

    let body = get.body.unwrap();
    assert!(is_webp(&body));
    assert_eq!(decoded_dimensions(&body), (200, 150));
    assert_eq!(harness.engine.calls(), 1);

    let again = harness
        .pipeline
        .handle(PipelineRequest::get(&id, Some(token)).with_transform(spec))
        .await;
    assert!(again.is_ok());
    assert!(again.trace.contains(Stage::Hit));
    assert_eq!(harness.engine.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_joined_trace() {
    let harness = TestHarness::with_transcode_delay(Duration::from_millis(300));
    let id = harness.upload("alice", create_jpeg(120, 120), "image/jpeg").await;
    let token = token_for("alice", Role::User);
    let spec = TransformSpec::new().with_width(30);

    let first = {
        let pipeline = harness.pipeline.clone();
        let request = PipelineRequest::get(&id, Some(token.clone())).with_transform(spec);
        tokio::spawn(async move { pipeline.handle(request).await })
    };

    // Wait until the first request has registered its computation
    for _ in 0..100 {
        if harness.cache.stats().await.in_flight == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(harness.cache.stats().await.in_flight, 1);

    let second = harness
        .pipeline
        .handle(PipelineRequest::get(&id, Some(token)).with_transform(spec))
        .await;
    let first = first.await.unwrap();

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert!(first.trace.contains(Stage::Miss));
    assert_eq!(
        second.trace.stages(),
        &[
            Stage::Received,
            Stage::Authorizing,
            Stage::CacheLookup,
            Stage::Joined,
            Stage::AwaitingShared,
            Stage::Responding,
            Stage::Done,
        ]
    );
    assert_eq!(first.body, second.body);
    assert_eq!(harness.engine.calls(), 1);
}

#[tokio::test]
async fn test_oversize_upload_stores_nothing() {
    let harness = TestHarness::with_max_upload(512);
    let token = token_for("alice", Role::Manager);

    let response = harness
        .pipeline
        .handle(PipelineRequest::put(
            Bytes::from(create_jpeg(128, 128)),
            "image/jpeg",
            Some(token),
        ))
        .await;

    assert_eq!(response.code, ResponseCode::PayloadTooLarge);
    assert!(response.message.unwrap().contains("512"));
    assert_eq!(response.trace.last(), Some(Stage::Failed));
    assert!(harness.backend.is_empty().await);
}

#[tokio::test]
async fn test_delete_flow_codes() {
    let harness = TestHarness::new();
    let id = harness.upload("alice", create_jpeg(32, 32), "image/jpeg").await;
    let owner = token_for("alice", Role::Manager);
    let stranger = token_for("bob", Role::Manager);

    let denied = harness
        .pipeline
        .handle(PipelineRequest::delete(&id, Some(stranger)))
        .await;
    assert_eq!(denied.code, ResponseCode::Denied);
    assert_eq!(denied.trace.last(), Some(Stage::Denied));

    let deleted = harness
        .pipeline
        .handle(PipelineRequest::delete(&id, Some(owner.clone())))
        .await;
    assert_eq!(deleted.code, ResponseCode::Ok);
    assert!(deleted.body.is_none());

    let gone = harness
        .pipeline
        .handle(PipelineRequest::get(&id, Some(owner)))
        .await;
    assert_eq!(gone.code, ResponseCode::NotFound);
}
