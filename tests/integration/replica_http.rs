//! Dispatching to mock HTTP replicas

use super::fixtures::{test_config, wait_terminal};
use bytes::Bytes;
use infer_dispatch::{Dispatcher, JobStatus};
use mockito::{Matcher, Server};

const PREDICTION: &str =
    r#"{"filename":"cat.jpg","inference_time":0.042,"predictions":["tabby","tiger cat","Egyptian cat"]}"#;

#[tokio::test]
async fn test_jobs_alternate_between_replicas() {
    let mut first = Server::new_async().await;
    let mut second = Server::new_async().await;

    let m1 = first
        .mock("POST", "/predict")
        .match_header("content-type", Matcher::Regex("multipart/form-data".into()))
        .match_body(Matcher::Regex(r#"name="image""#.into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(PREDICTION)
        .expect(2)
        .create_async()
        .await;
    let m2 = second
        .mock("POST", "/predict")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(PREDICTION)
        .expect(2)
        .create_async()
        .await;

    let config = test_config()
        .with_replicas([first.url(), second.url()])
        .with_workers(1);
    let dispatcher = Dispatcher::new(config).unwrap();

    let mut ids = Vec::new();
    for i in 0..4u8 {
        let admission = dispatcher
            .submit("cat.jpg", Bytes::from(vec![b'a' + i; 16]))
            .unwrap();
        ids.push(admission.request_id().unwrap().to_string());
    }
    dispatcher.start();

    for id in &ids {
        let record = wait_terminal(&dispatcher, id).await;
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.result.unwrap().predictions[0], "tabby");
        assert!(record.processing_time.is_some());
    }

    let used: Vec<String> = ids
        .iter()
        .map(|id| dispatcher.result(id).unwrap().replica_used.unwrap())
        .collect();
    assert_eq!(used, vec![first.url(), second.url(), first.url(), second.url()]);

    m1.assert_async().await;
    m2.assert_async().await;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_replica_error_status_fails_job() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/predict")
        .with_status(500)
        .with_body("CUDA out of memory")
        .create_async()
        .await;

    let config = test_config().with_replicas([server.url()]).with_workers(1);
    let dispatcher = Dispatcher::new(config).unwrap();
    dispatcher.start();

    let admission = dispatcher
        .submit("big.jpg", Bytes::from_static(b"huge image"))
        .unwrap();
    let record = wait_terminal(&dispatcher, admission.request_id().unwrap()).await;

    mock.assert_async().await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("HTTP 500: CUDA out of memory"));
    assert_eq!(record.replica_used.as_deref(), Some(server.url().as_str()));
    assert!(dispatcher.cache().is_empty());
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_custom_predict_path() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/classify")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(PREDICTION)
        .create_async()
        .await;

    let config = test_config()
        .with_replicas([server.url()])
        .with_predict_path("v1/classify");
    let dispatcher = Dispatcher::new(config).unwrap();
    dispatcher.start();

    let admission = dispatcher.submit("cat.jpg", Bytes::from_static(b"cat")).unwrap();
    let record = wait_terminal(&dispatcher, admission.request_id().unwrap()).await;

    mock.assert_async().await;
    assert_eq!(record.status, JobStatus::Completed);
    dispatcher.shutdown().await;
}
