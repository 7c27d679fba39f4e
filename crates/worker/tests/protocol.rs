mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{graph_request, settings, wait_for_terminal, Harness, SLOW_VIDEO};
use reelsmith_core::types::JobId;
use reelsmith_db::{JobSnapshot, JobState};
use reelsmith_worker::protocol::handle_line;
use reelsmith_worker::{RenderService, SubmitResponse};
use serde_json::{json, Value};

async fn send(service: &RenderService, line: Value) -> Value {
    handle_line(service, &line.to_string()).await
}

fn submitted(reply: Value) -> JobId {
    serde_json::from_value::<SubmitResponse>(reply)
        .expect("submit reply")
        .job_id
}

async fn wait_until_running(service: &RenderService, id: JobId) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let reply = send(service, json!({ "op": "get_job", "job_id": id })).await;
            let snapshot: JobSnapshot = serde_json::from_value(reply).expect("snapshot");
            if snapshot.state == JobState::Running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job should start");
}

#[tokio::test]
async fn every_operation_is_reachable_over_the_channel() {
    let harness = Harness::new();
    let queue = harness.queue(settings(3));
    let pipeline = harness.pipeline(SLOW_VIDEO, harness.local_storage());
    let service = harness.start(queue, Arc::new(pipeline), 1);

    let request = serde_json::to_value(graph_request()).expect("encode request");
    let busy = submitted(send(&service, request.clone()).await);
    wait_until_running(&service, busy).await;
    let waiting =
        submitted(send(&service, json!({ "op": "submit_job", "request": request })).await);

    let cancelled = send(&service, json!({ "op": "cancel_job", "job_id": waiting })).await;
    assert_eq!(cancelled, json!({ "accepted": true }));
    let refused = send(&service, json!({ "op": "cancel_job", "job_id": busy })).await;
    assert_eq!(refused, json!({ "accepted": false }));

    let reply = send(&service, json!({ "op": "get_job", "job_id": waiting })).await;
    let snapshot: JobSnapshot = serde_json::from_value(reply).expect("snapshot");
    assert_eq!(snapshot.job_id, waiting);
    assert_eq!(snapshot.state, JobState::Cancelled);

    assert_eq!(wait_for_terminal(&service, busy).await.state, JobState::Succeeded);
    service.shutdown().await;
}

#[tokio::test]
async fn unknown_job_reads_as_null() {
    let harness = Harness::new();
    let queue = harness.queue(settings(3));
    let pipeline = harness.pipeline(SLOW_VIDEO, harness.local_storage());
    let service = harness.start(queue, Arc::new(pipeline), 1);

    let reply = send(&service, json!({ "op": "get_job", "job_id": JobId::new_v4() })).await;
    assert_eq!(reply, Value::Null);

    service.shutdown().await;
}

#[tokio::test]
async fn malformed_lines_get_an_error_reply() {
    let harness = Harness::new();
    let queue = harness.queue(settings(3));
    let pipeline = harness.pipeline(SLOW_VIDEO, harness.local_storage());
    let service = harness.start(queue, Arc::new(pipeline), 1);

    for line in ["not json", r#"{"op":"get_job"}"#, r#"{"op":"rename_job","job_id":"x"}"#] {
        let reply = handle_line(&service, line).await;
        let message = reply["error"].as_str().expect("error reply");
        assert!(message.starts_with("invalid command"), "{message}");
    }

    service.shutdown().await;
}
