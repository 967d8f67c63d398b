//! Webhook front-end against a real coordinator and agent

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use channel_monitoring::{
    api::{ApiState, spawn_api_server},
    bridge::{ResolvedAddress, ResponderHandle},
    coordinator::{Coordinator, FAILURE_NOTICE, REPOSITORY_URL},
};
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::helpers::*;

struct TestApi {
    addr: SocketAddr,
    notifier: Arc<RecordingNotifier>,
    agent: ResponderHandle,
    client: reqwest::Client,
}

impl TestApi {
    /// Front-end with one live agent for `abcd1234`; every other channel is unreachable
    async fn start() -> Self {
        let agent = ResponderHandle::spawn(
            ResolvedAddress::new("127.0.0.1", 0),
            Arc::new(FixedSource::new(91.2)),
        )
        .await
        .unwrap();

        let requester = requester(Duration::from_millis(300));
        requester
            .register_agent("abcd1234", "127.0.0.1", Some(agent.local_addr().port()))
            .await;
        requester
            .register_agent("dead0001", "127.0.0.1", Some(free_port().await))
            .await;

        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = Coordinator::direct(requester, notifier.clone());
        let state = ApiState::new(coordinator, "https://hub.example.com/", "Server Monitor Agent");

        let addr = spawn_api_server("127.0.0.1:0".parse().unwrap(), state)
            .await
            .unwrap();

        Self {
            addr,
            notifier,
            agent,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_health() {
    let api = TestApi::start().await;

    let (status, body) = api.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Server is healthy");

    api.agent.stop();
}

#[tokio::test]
async fn test_integration_config_uses_public_url() {
    let api = TestApi::start().await;

    let (status, body) = api.get("/integration-config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["target_url"], "https://hub.example.com/webhook");
    assert_eq!(body["data"]["tick_url"], "https://hub.example.com/tick");

    api.agent.stop();
}

#[tokio::test]
async fn test_unknown_route() {
    let api = TestApi::start().await;

    let (status, body) = api.get("/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains(REPOSITORY_URL));

    api.agent.stop();
}

#[tokio::test]
async fn test_cpu_metrics_require_channel_id() {
    let api = TestApi::start().await;

    for path in ["/get-cpu-metrics", "/check-cpu-threshold"] {
        let (status, body) = api.post(path, json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Channel ID is required");
    }

    api.agent.stop();
}

#[tokio::test]
async fn test_cpu_metrics_of_a_channel() {
    let api = TestApi::start().await;

    let (status, body) = api
        .post("/get-cpu-metrics", json!({ "channelId": "abcd1234" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["usage"], 91.2);

    let (status, body) = api
        .post("/check-cpu-threshold", json!({ "channelId": "abcd1234" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["threshold"], 85.0);
    assert_eq!(body["data"]["exceeded"], true);

    let (_, body) = api
        .post(
            "/check-cpu-threshold",
            json!({ "channelId": "abcd1234", "threshold": 95 }),
        )
        .await;
    assert_eq!(body["data"]["exceeded"], false);

    api.agent.stop();
}

#[tokio::test]
async fn test_cpu_metrics_of_an_unreachable_agent() {
    let api = TestApi::start().await;

    let (status, body) = api
        .post("/get-cpu-metrics", json!({ "channelId": "dead0001" }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .starts_with("Failed to get CPU metrics")
    );

    api.agent.stop();
}

#[tokio::test]
async fn test_setup_command_answers_with_instructions() {
    let api = TestApi::start().await;

    let (status, body) = api
        .post(
            "/webhook",
            json!({
                "channel_id": "abcd1234",
                "message": "/setup-monitoring",
                "settings": []
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "success", "message": "Message received" }));

    let messages = api.notifier.wait_for(1).await;
    assert_eq!(messages[0].0, "abcd1234");
    assert!(messages[0].1.contains("--channel-id abcd1234"));

    api.agent.stop();
}

#[tokio::test]
async fn test_tick_reports_metrics() {
    let api = TestApi::start().await;

    let (status, _) = api
        .post("/tick", json!({ "channel_id": "abcd1234", "settings": [] }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let messages = api.notifier.wait_for(1).await;
    assert!(messages[0].1.contains("CPU Usage: 91.20%"));

    api.agent.stop();
}

#[tokio::test]
async fn test_webhook_for_missing_agent_sends_notice() {
    let api = TestApi::start().await;

    let (status, _) = api
        .post(
            "/webhook",
            json!({ "channel_id": "dead0001", "message": "how is my server?" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let messages = api.notifier.wait_for(1).await;
    assert_eq!(
        messages,
        vec![("dead0001".to_string(), FAILURE_NOTICE.to_string())]
    );

    api.agent.stop();
}
