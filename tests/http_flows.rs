use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use procpilot::catalog::ListFilter;
use procpilot::client::{HttpExecutor, RequestError};
use procpilot::config::OrchestrationOptions;
use procpilot::poller::RetryLimit;
use procpilot::state_machine::{Failure, JobOutcome, JobPhase};
use procpilot::{FlowClient, FlowError, JobHandle};

fn options() -> OrchestrationOptions {
    OrchestrationOptions {
        credential: Some("jwt".into()),
        timeout: Duration::from_secs(2),
        retry_limit: RetryLimit::Bounded(2),
        retry_delay: Duration::from_millis(10),
        poll_interval: Duration::from_millis(10),
        start_retries: 0,
    }
}

fn client(server: &MockServer, options: OrchestrationOptions) -> FlowClient<HttpExecutor> {
    let executor = HttpExecutor::new(server.uri()).unwrap();
    FlowClient::new(Arc::new(executor), options)
}

async fn wait_for_phase(handle: &JobHandle, phase: JobPhase) {
    let mut rx = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.phase() == phase))
        .await
        .expect("phase not reached in time")
        .unwrap();
}

fn status(value: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "status": value }))
}

#[tokio::test]
async fn onboard_polls_with_challenge_until_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ota/process"))
        .and(header("authorization", "Bearer jwt"))
        .and(body_partial_json(json!({"code": "bank01", "prompts": {"user": "ana"}})))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({"processId": "p1", "status": "pending"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ota/process/p1"))
        .respond_with(status("pending"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ota/process/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "done", "accounts": 3})))
        .mount(&server)
        .await;

    let handle = client(&server, options())
        .onboard("bank01", json!({"user": "ana"}))
        .unwrap();
    let outcome = handle.outcome().await;
    assert_eq!(
        outcome,
        JobOutcome::Done(json!({"status": "done", "accounts": 3}))
    );

    let token = handle.challenge().unwrap().to_string();
    let requests = server.received_requests().await.unwrap();
    let start: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(start["challenge"], token.as_str());

    let checks: Vec<_> = requests
        .iter()
        .filter(|r| r.method.as_str() == "GET")
        .collect();
    assert_eq!(checks.len(), 3);
    for check in checks {
        assert_eq!(check.url.path(), "/ota/process/p1");
        assert_eq!(check.url.query(), Some(format!("challenge={token}").as_str()));
    }
}

#[tokio::test]
async fn add_profile_resumes_after_challenge() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"processId": "p2"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/processes/p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "challenge",
            "prompt": {"name": "otp"}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/processes/p2"))
        .respond_with(status("done"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/processes/p2"))
        .and(body_partial_json(json!({"code": "bank01", "otp": "123456"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accepted": true})))
        .expect(1)
        .mount(&server)
        .await;

    let handle = client(&server, options())
        .add_profile("bank01", json!({}))
        .unwrap();
    assert!(handle.challenge().is_none());

    wait_for_phase(&handle, JobPhase::AwaitingResume).await;
    let response = handle.resume(json!({"otp": "123456"})).await.unwrap();
    assert_eq!(response, json!({"accepted": true}));

    assert_eq!(handle.outcome().await, JobOutcome::Done(json!({"status": "done"})));
    let report = handle.join().await.unwrap();
    assert_eq!(report.process_id.as_deref(), Some("p2"));
    assert_eq!(report.final_phase, JobPhase::Done);
}

#[tokio::test]
async fn rejected_start_fails_without_polling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/profiles/42/login"))
        .respond_with(ResponseTemplate::new(422).set_body_string("profile locked"))
        .mount(&server)
        .await;

    let handle = client(&server, options()).login("42").unwrap();
    assert_eq!(
        handle.outcome().await,
        JobOutcome::Failed(Failure::Error(FlowError::BackendRejected {
            status: 422,
            message: "profile locked".into(),
        }))
    );
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn stop_sends_one_delete_with_challenge() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ota/process"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"processId": "p1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ota/process/p1"))
        .respond_with(status("pending"))
        .mount(&server)
        .await;

    let handle = client(&server, options())
        .onboard("bank01", json!({}))
        .unwrap();
    let token = handle.challenge().unwrap().to_string();
    Mock::given(method("DELETE"))
        .and(path("/ota/process/p1"))
        .and(query_param("challenge", token.as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    wait_for_phase(&handle, JobPhase::Polling).await;
    handle.stop().await.unwrap();
    handle.stop().await.unwrap();
    assert_eq!(handle.outcome().await, JobOutcome::Stopped);

    let seen = server.received_requests().await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), seen);
}

#[tokio::test]
async fn slow_checks_exhaust_the_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"processId": "p3"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/processes/p3"))
        .respond_with(status("pending").set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let handle = client(
        &server,
        OrchestrationOptions {
            timeout: Duration::from_millis(50),
            ..options()
        },
    )
    .add_profile("bank01", json!({}))
    .unwrap();

    assert_eq!(
        handle.outcome().await,
        JobOutcome::Failed(Failure::Error(FlowError::RetryExhausted {
            retries: 2,
            last: RequestError::Timeout,
        }))
    );
}

#[tokio::test]
async fn one_shot_calls_use_catalog_routes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "2.1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profiles/7/credential"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "ana"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts"))
        .and(query_param("profileId", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "a1"}])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public/browser"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = client(&server, options());
    assert_eq!(client.details().await.unwrap(), json!({"version": "2.1"}));
    assert_eq!(
        client.profiles(Some("7"), true).await.unwrap(),
        json!({"login": "ana"})
    );
    let filter = ListFilter {
        profile_id: Some("7".into()),
        ..ListFilter::default()
    };
    assert_eq!(client.accounts(&filter).await.unwrap(), json!([{"id": "a1"}]));
    assert_eq!(client.run_browser().await.unwrap(), Value::Null);
    assert_eq!(client.wait_until_available().await.unwrap(), json!({"version": "2.1"}));
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let executor = HttpExecutor::new("http://127.0.0.1:1").unwrap();
    let client = FlowClient::new(Arc::new(executor), options());
    match client.details().await {
        Err(FlowError::Transport(RequestError::Network(_))) => {}
        other => panic!("unexpected {other:?}"),
    }
    client.wait_until_unavailable().await.unwrap();
}
