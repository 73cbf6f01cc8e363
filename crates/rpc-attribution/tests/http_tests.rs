mod common;

use chrono::Utc;
use common::serve_once;
use rpc_attribution::{
    Error,
    intake::{DatadogIntake, LogIntake},
    probe::{BlockHeight, JsonRpcStatusClient, StatusClient},
    report::{IntakeRecord, RunMetadata, source},
};
use serde_json::json;
use std::time::Duration;

fn metadata() -> RunMetadata {
    RunMetadata {
        region: "us-east-1".to_string(),
        request_id: "req-9".to_string(),
        env: "prod".to_string(),
        started_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_intake_posts_record_with_api_key() {
    let (addr, server) = serve_once(202, "{}").await;
    let intake = DatadogIntake::new(
        &format!("http://{addr}/v1/input"),
        Some("test-key".to_string()),
    )
    .unwrap();

    let record = IntakeRecord::probe_failure(&metadata(), "polkachu", "timed out after 5000ms");
    intake.send(&record).await.unwrap();

    let request = server.await.unwrap();
    assert_eq!(request.request_line(), "POST /v1/input HTTP/1.1");
    assert_eq!(request.header("dd-api-key"), Some("test-key"));
    assert_eq!(request.header("content-type"), Some("application/json"));

    let body = request.json();
    assert_eq!(body["ddsource"], source::PING_ERROR);
    assert_eq!(body["status"], "error");
    assert_eq!(body["provider"], "polkachu");
    assert_eq!(body["requestId"], "req-9");
}

#[tokio::test]
async fn test_intake_rejection_is_reporting_error() {
    let (addr, server) = serve_once(403, r#"{"errors":["Forbidden"]}"#).await;
    let intake = DatadogIntake::new(&format!("http://{addr}/v1/input"), Some("bad".to_string()))
        .unwrap();

    let record = IntakeRecord::stage_failure(&metadata(), source::LAMBDA_ERROR, "probing", "boom");
    let err = intake.send(&record).await.unwrap_err();

    assert!(matches!(err, Error::Reporting(_)));
    server.await.unwrap();
}

#[tokio::test]
async fn test_status_client_sends_jsonrpc_status() {
    let (addr, server) = serve_once(
        200,
        r#"{"jsonrpc":"2.0","id":1,"result":{"node_info":{"network":"dydx-mainnet-1"},"sync_info":{"latest_block_height":"41234567","catching_up":false}}}"#,
    )
    .await;
    let client = JsonRpcStatusClient::new(Duration::from_secs(5))
        .unwrap()
        .insecure();

    let response = client.status(&addr).await.unwrap();
    assert_eq!(response.block_height(), BlockHeight::Reported(41_234_567));

    let request = server.await.unwrap();
    assert!(request.request_line().starts_with("POST / "));
    assert_eq!(
        request.json(),
        json!({"jsonrpc": "2.0", "id": 1, "method": "status", "params": {}})
    );
}

#[tokio::test]
async fn test_status_client_http_error() {
    let (addr, server) = serve_once(503, "{}").await;
    let client = JsonRpcStatusClient::new(Duration::from_secs(5))
        .unwrap()
        .insecure();

    let err = client.status(&addr).await.unwrap_err();
    assert!(matches!(err, Error::Http(_)));
    server.await.unwrap();
}
