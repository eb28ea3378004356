//! Bulk pipeline integration tests.
//!
//! These tests drive `ContainerExecutor::add` against a simulated container and
//! verify:
//! - every submitted operation resolves exactly once with its own outcome
//! - batches respect the count and body-length bounds
//! - range splits, throttling, transport failures and timeouts are handled
//! - shutdown and cancellation never leave a caller hanging

use std::time::Duration;

use cosmos_bulk::{BulkConfig, BulkError, ItemOperation, ItemRequestOptions, RetryPolicyConfig};
use cosmos_bulk_codec::decode_batch_request;
use cosmos_bulk_core::{status_codes, BatchLimits, PartitionKey, PartitionKeyRangeId};
use cosmos_bulk_routing::{hash_key, RangeMap};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::fixtures::{harness, harness_with, range_ids};
use crate::simulated_container::FaultPlan;

/// Maximum time to wait for a batch of outcomes.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn tenant(i: usize) -> PartitionKey {
    PartitionKey::new(format!("tenant-{}", i % 20))
}

fn create(i: usize) -> ItemOperation {
    ItemOperation::create(tenant(i), json!({"id": format!("item-{i}"), "n": i}))
}

#[tokio::test]
async fn test_pipeline_creates_items_across_ranges() {
    let h = harness(4, BulkConfig::for_testing());

    let mut futures = Vec::new();
    for i in 0..200 {
        futures.push(h.executor.add(create(i)).await.unwrap());
    }
    for future in futures {
        let response = timeout(TEST_TIMEOUT, future).await.unwrap().unwrap();
        assert_eq!(response.status_code, status_codes::CREATED);
        assert!(response.etag.is_some());
    }

    assert_eq!(h.container.item_count(), 200);
    assert_eq!(h.executor.stats().operations_completed, 200);
    assert!(h.executor.active_ranges().await <= 4);

    // Every request only carries operations owned by its range.
    let map = RangeMap::uniform(&range_ids(4));
    for request in h.container.requests() {
        for record in decode_batch_request(&request.body).unwrap() {
            let pk = record.partition_key.unwrap();
            let owner = map.lookup(hash_key(pk.as_bytes())).unwrap();
            assert_eq!(*owner, request.headers.partition_key_range_id);
        }
    }
}

#[tokio::test]
async fn test_pipeline_reports_per_item_outcomes() {
    let h = harness(1, BulkConfig::for_testing());
    let pk = PartitionKey::new("tenant");

    let first = h
        .executor
        .add(ItemOperation::create(pk.clone(), json!({"id": "dup"})))
        .await
        .unwrap();
    let second = h
        .executor
        .add(ItemOperation::create(pk.clone(), json!({"id": "dup"})))
        .await
        .unwrap();
    let missing = h
        .executor
        .add(ItemOperation::read(pk.clone(), "missing"))
        .await
        .unwrap();

    assert_eq!(first.await.unwrap().status_code, status_codes::CREATED);
    assert_eq!(second.await.unwrap().status_code, status_codes::CONFLICT);
    assert_eq!(missing.await.unwrap().status_code, status_codes::NOT_FOUND);
}

#[tokio::test]
async fn test_pipeline_read_your_writes() {
    let h = harness(2, BulkConfig::for_testing());
    let pk = PartitionKey::new("reader");

    h.executor
        .execute(ItemOperation::upsert(
            pk.clone(),
            json!({"id": "doc", "name": "first", "rank": 1}),
        ))
        .await
        .unwrap();
    h.executor
        .execute(ItemOperation::patch(pk.clone(), "doc", json!({"name": "patched"})))
        .await
        .unwrap();

    let read = h
        .executor
        .execute(ItemOperation::read(pk.clone(), "doc"))
        .await
        .unwrap();
    let doc: Value = read.item_as().unwrap();
    assert_eq!(doc["name"], "patched");
    assert_eq!(doc["rank"], 1);

    // A matching if-none-match etag short-circuits the read.
    let etag = read.etag.unwrap();
    let cached = h
        .executor
        .execute(ItemOperation::read(pk.clone(), "doc").with_options(ItemRequestOptions {
            if_none_match_etag: Some(etag),
            ..ItemRequestOptions::default()
        }))
        .await
        .unwrap();
    assert_eq!(cached.status_code, status_codes::NOT_MODIFIED);

    let deleted = h
        .executor
        .execute(ItemOperation::delete(pk.clone(), "doc"))
        .await
        .unwrap();
    assert_eq!(deleted.status_code, status_codes::NO_CONTENT);
    assert!(h.container.item(&pk, "doc").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_batches_respect_count_limit() {
    let config = BulkConfig::for_testing().with_limits(BatchLimits::with_bounds(1_000_000, 10));
    let h = harness(1, config);

    let mut futures = Vec::new();
    for i in 0..95 {
        futures.push(h.executor.add(create(i)).await.unwrap());
    }
    for future in futures {
        assert!(timeout(TEST_TIMEOUT, future).await.unwrap().unwrap().is_success());
    }

    let requests = h.container.requests();
    assert!(requests.iter().all(|r| r.operation_count <= 10));
    assert_eq!(requests.iter().map(|r| r.operation_count).sum::<usize>(), 95);
    assert!(h.executor.stats().batches_full >= 9);
}

#[tokio::test]
async fn test_pipeline_batches_respect_body_limit() {
    let config = BulkConfig::for_testing().with_limits(BatchLimits::with_bounds(2_000, 100));
    let h = harness(1, config);
    let pad = "x".repeat(300);

    let mut futures = Vec::new();
    for i in 0..30 {
        let op = ItemOperation::create(tenant(i), json!({"id": format!("big-{i}"), "pad": pad}));
        futures.push(h.executor.add(op).await.unwrap());
    }
    for future in futures {
        assert!(timeout(TEST_TIMEOUT, future).await.unwrap().unwrap().is_success());
    }

    for request in h.container.requests() {
        assert!(request.body.len() <= 2_000);
    }
    assert_eq!(h.container.item_count(), 30);
}

#[tokio::test]
async fn test_pipeline_sends_oversized_item_alone() {
    let config = BulkConfig::for_testing().with_limits(BatchLimits::with_bounds(500, 100));
    let h = harness(1, config);

    let small = h.executor.add(create(1)).await.unwrap();
    let huge = h
        .executor
        .add(ItemOperation::create(
            tenant(2),
            json!({"id": "huge", "pad": "x".repeat(2_000)}),
        ))
        .await
        .unwrap();

    assert!(small.await.unwrap().is_success());
    assert!(huge.await.unwrap().is_success());
    let single = h
        .container
        .requests()
        .into_iter()
        .filter(|r| r.body.len() > 500)
        .collect::<Vec<_>>();
    assert_eq!(single.len(), 1);
    assert_eq!(single[0].operation_count, 1);
}

#[tokio::test]
async fn test_pipeline_survives_range_split() {
    let h = harness(1, BulkConfig::for_testing());

    // The service splits range 0; the client's cache still routes to it.
    h.resolver
        .update_published(|map| {
            map.split(
                &PartitionKeyRangeId::new("0"),
                PartitionKeyRangeId::new("1"),
                PartitionKeyRangeId::new("2"),
            )
        })
        .await
        .unwrap();

    let mut futures = Vec::new();
    for i in 0..40 {
        futures.push(h.executor.add(create(i)).await.unwrap());
    }
    for future in futures {
        let response = timeout(TEST_TIMEOUT, future).await.unwrap().unwrap();
        assert_eq!(response.status_code, status_codes::CREATED);
    }

    assert_eq!(h.container.item_count(), 40);
    assert!(h.executor.stats().range_gone_retries >= 1);
    assert!(h.resolver.refresh_count() >= 1);
    assert!(h
        .container
        .requests()
        .iter()
        .any(|r| r.headers.partition_key_range_id != PartitionKeyRangeId::new("0")));
}

#[tokio::test]
async fn test_pipeline_retries_throttled_operations() {
    let h = harness(1, BulkConfig::for_testing());
    h.container.inject(FaultPlan {
        throttle_operations: 3,
        retry_after: Duration::from_millis(5),
        ..FaultPlan::default()
    });

    let mut futures = Vec::new();
    for i in 0..10 {
        futures.push(h.executor.add(create(i)).await.unwrap());
    }
    for future in futures {
        let response = timeout(TEST_TIMEOUT, future).await.unwrap().unwrap();
        assert_eq!(response.status_code, status_codes::CREATED);
    }
    assert_eq!(h.executor.stats().throttle_retries, 3);
    assert_eq!(h.container.item_count(), 10);
}

#[tokio::test]
async fn test_pipeline_surfaces_throttle_after_retry_budget() {
    let retry = RetryPolicyConfig {
        max_throttle_retries: 2,
        ..RetryPolicyConfig::for_testing()
    };
    let h = harness(1, BulkConfig::for_testing().with_retry(retry));
    h.container.inject(FaultPlan {
        throttle_requests: 100,
        retry_after: Duration::from_millis(1),
        ..FaultPlan::default()
    });

    let response = timeout(TEST_TIMEOUT, h.executor.execute(create(0)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status_code, status_codes::TOO_MANY_REQUESTS);
    assert!(response.is_throttled());
    assert_eq!(h.container.requests().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_transport_failure_fails_whole_batch() {
    let h = harness(1, BulkConfig::for_testing());
    h.container.inject(FaultPlan {
        fail_requests: 1,
        ..FaultPlan::default()
    });

    let mut futures = Vec::new();
    for i in 0..5 {
        futures.push(h.executor.add(create(i)).await.unwrap());
    }
    for future in futures {
        let err = timeout(TEST_TIMEOUT, future).await.unwrap().unwrap_err();
        assert!(matches!(err, BulkError::Transport { .. }));
    }
    assert_eq!(h.executor.stats().batch_failures, 1);

    // The executor keeps serving after a failed batch.
    assert!(h.executor.execute(create(99)).await.unwrap().is_success());
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_times_out_slow_requests() {
    let config = BulkConfig::for_testing().with_request_timeout(Duration::from_secs(1));
    let h = harness_with(1, config, |c| c.with_latency(Duration::from_secs(30)));

    let err = h.executor.execute(create(0)).await.unwrap_err();
    assert!(matches!(err, BulkError::Timeout { .. }));
}

#[tokio::test]
async fn test_pipeline_shutdown_resolves_every_operation() {
    let h = harness(2, BulkConfig::for_testing());

    let mut futures = Vec::new();
    for i in 0..50 {
        futures.push(h.executor.add(create(i)).await.unwrap());
    }
    h.executor.shutdown().await;

    for future in futures {
        match timeout(TEST_TIMEOUT, future).await.unwrap() {
            Ok(response) => assert!(response.is_success()),
            Err(err) => assert!(matches!(err, BulkError::Shutdown)),
        }
    }
    assert!(matches!(
        h.executor.add(create(100)).await,
        Err(BulkError::Shutdown)
    ));
    assert_eq!(h.executor.active_ranges().await, 0);
}

#[tokio::test]
async fn test_pipeline_cancelled_operation_never_sent() {
    let h = harness(1, BulkConfig::for_testing());
    let token = CancellationToken::new();
    token.cancel();

    let result = h
        .executor
        .add(create(0).with_cancellation(token))
        .await;
    assert!(matches!(result, Err(BulkError::Cancelled)));
    assert!(h.container.requests().is_empty());
}

#[tokio::test]
async fn test_pipeline_routes_by_effective_partition_key() {
    let h = harness(4, BulkConfig::for_testing());

    let epk = vec![0xC0, 0x00, 0x00, 0x01];
    let response = h
        .executor
        .execute(
            ItemOperation::upsert(PartitionKey::new("ignored"), json!({"id": "raw"}))
                .with_effective_partition_key(epk),
        )
        .await
        .unwrap();
    assert!(response.is_success());

    // 0xC0... falls in the last quarter of the hash space.
    let requests = h.container.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.partition_key_range_id,
        PartitionKeyRangeId::new("3")
    );
}
