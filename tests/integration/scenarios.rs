//! End-to-end dispatcher behaviour with in-process replicas

use super::fixtures::{test_config, wait_terminal, FakeBackend};
use bytes::Bytes;
use infer_dispatch::{Admission, Dispatcher, HttpReplicaClient, JobStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_third_submission_rejected_at_capacity_two() {
    let backend = Arc::new(FakeBackend::ok());
    let dispatcher =
        Dispatcher::with_backend(test_config().with_queue_capacity(2), backend.clone()).unwrap();

    // workers not started yet, so nothing drains the queue
    let a = dispatcher.submit("a.jpg", Bytes::from_static(b"aaaa")).unwrap();
    let b = dispatcher.submit("b.jpg", Bytes::from_static(b"bbbb")).unwrap();
    let c = dispatcher.submit("c.jpg", Bytes::from_static(b"cccc")).unwrap();

    assert!(matches!(a, Admission::Queued { queue_size: 1, .. }));
    assert!(matches!(b, Admission::Queued { queue_size: 2, .. }));
    assert_eq!(
        c,
        Admission::Rejected {
            queue_size: 2,
            capacity: 2
        }
    );
    assert_eq!(dispatcher.result_ids().len(), 2);
    assert_eq!(dispatcher.metrics().counters().rejected_requests, 1);

    dispatcher.start();
    for admission in [&a, &b] {
        let record = wait_terminal(&dispatcher, admission.request_id().unwrap()).await;
        assert_eq!(record.status, JobStatus::Completed);
    }
    assert_eq!(backend.calls(), 2);

    // capacity is free again once the backlog drains
    let d = dispatcher.submit("d.jpg", Bytes::from_static(b"dddd")).unwrap();
    assert!(matches!(d, Admission::Queued { .. }));
    let record = wait_terminal(&dispatcher, d.request_id().unwrap()).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(backend.calls(), 3);
    assert_eq!(dispatcher.metrics().counters().rejected_requests, 1);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_in_flight_is_dispatched_twice_cached_once() {
    let backend = Arc::new(FakeBackend::slow(Duration::from_millis(50)));
    let dispatcher = Dispatcher::with_backend(test_config(), backend.clone()).unwrap();
    dispatcher.start();

    let image = Bytes::from_static(b"same image bytes");
    let first = dispatcher.submit("dup.jpg", image.clone()).unwrap();
    let second = dispatcher.submit("dup.jpg", image.clone()).unwrap();

    let first_id = first.request_id().unwrap().to_string();
    let second_id = second.request_id().unwrap().to_string();
    assert_ne!(first_id, second_id);

    let r1 = wait_terminal(&dispatcher, &first_id).await;
    let r2 = wait_terminal(&dispatcher, &second_id).await;
    assert_eq!(r1.status, JobStatus::Completed);
    assert_eq!(r2.status, JobStatus::Completed);
    assert_eq!(backend.calls(), 2);
    assert_eq!(dispatcher.cache().len(), 1);

    // a third identical upload is answered without a replica call
    let third = dispatcher.submit("dup.jpg", image).unwrap();
    assert!(matches!(third, Admission::Cached { .. }));
    assert_eq!(backend.calls(), 2);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_cache_round_trip_returns_identical_predictions() {
    let dispatcher = Dispatcher::with_backend(test_config(), Arc::new(FakeBackend::ok())).unwrap();
    dispatcher.start();

    let image = Bytes::from_static(b"tabby cat");
    let first = dispatcher.submit("cat.jpg", image.clone()).unwrap();
    let record = wait_terminal(&dispatcher, first.request_id().unwrap()).await;
    assert!(!record.from_cache);

    let Admission::Cached { request_id, result } = dispatcher.submit("cat.jpg", image).unwrap()
    else {
        panic!("expected a cache hit");
    };
    let cached = dispatcher.result(&request_id).unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.status, JobStatus::Completed);
    assert_eq!(
        result.predictions,
        record.result.as_ref().unwrap().predictions
    );
    assert_eq!(cached.result.unwrap().predictions, result.predictions);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_never_responding_replica_times_out() {
    // accepts connections but never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let replica = format!("http://{}", listener.local_addr().unwrap());

    let timeout = Duration::from_millis(300);
    let config = test_config()
        .with_replicas([replica])
        .with_workers(1)
        .with_request_timeout(timeout);
    let client = HttpReplicaClient::new(timeout, "/predict").unwrap();
    let dispatcher = Dispatcher::with_backend(config, Arc::new(client)).unwrap();
    dispatcher.start();

    let started = Instant::now();
    let admission = dispatcher.submit("slow.jpg", Bytes::from_static(b"img")).unwrap();
    let record = wait_terminal(&dispatcher, admission.request_id().unwrap()).await;
    let elapsed = started.elapsed();

    assert_eq!(record.status, JobStatus::Failed);
    assert!(
        elapsed < timeout + Duration::from_secs(1),
        "job took {:?} to fail with a {:?} timeout",
        elapsed,
        timeout
    );
    assert!(
        record.error.as_deref().unwrap().starts_with("timeout"),
        "unexpected error detail: {:?}",
        record.error
    );
    assert!(dispatcher.cache().is_empty());
    assert_eq!(dispatcher.metrics().counters().failed_requests, 1);
    dispatcher.shutdown().await;
    drop(listener);
}

#[tokio::test]
async fn test_failed_jobs_are_not_cached() {
    let backend = Arc::new(FakeBackend::failing(500));
    let dispatcher = Dispatcher::with_backend(test_config(), backend.clone()).unwrap();
    dispatcher.start();

    let image = Bytes::from_static(b"broken");
    let first = dispatcher.submit("x.jpg", image.clone()).unwrap();
    let record = wait_terminal(&dispatcher, first.request_id().unwrap()).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("HTTP 500: replica error"));
    assert!(record.result.is_none());

    let again = dispatcher.submit("x.jpg", image).unwrap();
    assert!(matches!(again, Admission::Queued { .. }));
    wait_terminal(&dispatcher, again.request_id().unwrap()).await;
    assert_eq!(backend.calls(), 2);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_metrics_stay_consistent() {
    let dispatcher = Dispatcher::with_backend(
        test_config().with_queue_capacity(3),
        Arc::new(FakeBackend::ok()),
    )
    .unwrap();

    let mut admitted = Vec::new();
    for i in 0..5u8 {
        let admission = dispatcher
            .submit(&format!("{i}.jpg"), Bytes::from(vec![i; 8]))
            .unwrap();
        if let Some(id) = admission.request_id() {
            admitted.push(id.to_string());
        }
    }
    dispatcher.start();
    for id in &admitted {
        wait_terminal(&dispatcher, id).await;
    }
    // one cache hit on top
    dispatcher.submit("0.jpg", Bytes::from(vec![0u8; 8])).unwrap();

    let report = dispatcher.status();
    assert_eq!(report.total_requests, 6);
    assert_eq!(report.rejected_requests, 2);
    assert_eq!(report.successful_requests, 4);
    assert_eq!(report.failed_requests, 0);
    assert!(
        report.successful_requests + report.failed_requests
            <= report.total_requests - report.rejected_requests
    );
    assert_eq!(
        report.cache_metrics.cache_hits + report.cache_metrics.cache_misses,
        report.total_requests
    );
    assert_eq!(report.cache_metrics.cache_hits, 1);
    assert_eq!(report.queue_metrics.peak_queue_size, 3);
    assert_eq!(report.queue_size, 0);
    assert_eq!(report.stored_results, 4);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_no_replica_when_all_breakers_open() {
    use infer_dispatch::resilience::circuit_breaker::CircuitBreakerConfig;

    let config = test_config()
        .with_replicas(["http://replica-0:5000"])
        .with_workers(1)
        .with_circuit_breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_cooldown(Duration::from_secs(60)),
        );
    let backend = Arc::new(FakeBackend::failing(503));
    let dispatcher = Dispatcher::with_backend(config, backend.clone()).unwrap();
    dispatcher.start();

    let first = dispatcher.submit("a.jpg", Bytes::from_static(b"a")).unwrap();
    wait_terminal(&dispatcher, first.request_id().unwrap()).await;

    let second = dispatcher.submit("b.jpg", Bytes::from_static(b"b")).unwrap();
    let record = wait_terminal(&dispatcher, second.request_id().unwrap()).await;
    assert_eq!(record.error.as_deref(), Some("no replica available"));
    assert!(record.replica_used.is_none());
    assert_eq!(backend.calls(), 1);
    assert_eq!(dispatcher.status().health_metrics.open_circuits, 1);
    dispatcher.shutdown().await;
}
