//! Request/reply between a coordinator-side requester and an agent

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use channel_monitoring::bridge::{
    BridgeError, Command, ResolvedAddress, Responder, ResponderHandle, ResponseBody, SocketState,
    resolve,
};

use crate::helpers::*;

#[tokio::test]
async fn test_cpu_usage_on_the_derived_port() {
    assert_eq!(resolve("abcd1234"), 14660);

    let agent = ResponderHandle::spawn(
        ResolvedAddress::for_channel("127.0.0.1", "abcd1234"),
        Arc::new(FixedSource::new(12.5)),
    )
    .await
    .unwrap();
    assert_eq!(agent.local_addr().port(), 14660);

    // coordinator side derives the same port on its own
    let requester = requester(Duration::from_secs(5));

    let response = requester
        .request("abcd1234", Command::GetCpuUsage)
        .await
        .unwrap();
    assert_eq!(response.body, ResponseBody::CpuUsage(12.5));

    let text = requester
        .request_formatted("abcd1234", Command::GetCpuUsage)
        .await
        .unwrap();
    assert!(text.contains("12.50"), "unexpected text: {text}");

    requester.close().await;
    agent.stop();
    agent.stopped().await;
}

#[tokio::test]
async fn test_cpu_metrics_wire_shape() {
    let agent = ResponderHandle::spawn(
        ResolvedAddress::new("127.0.0.1", 0),
        Arc::new(FixedSource::new(42.0)),
    )
    .await
    .unwrap();

    let mut client = RawClient::connect(agent.local_addr()).await;
    let reply = client.exchange(br#"{"type":"getCpuMetrics"}"#).await;

    assert_eq!(reply["type"], "getCpuMetrics");
    assert!(reply["timestamp"].is_string());
    let usage = reply["data"]["usage"].as_f64().unwrap();
    assert!((0.0..=100.0).contains(&usage));
    assert_eq!(reply["data"]["cores"], 4);

    agent.stop();
}

#[tokio::test]
async fn test_threshold_defaults_to_85() {
    let agent = ResponderHandle::spawn(
        ResolvedAddress::new("127.0.0.1", 0),
        Arc::new(FixedSource::new(90.0)),
    )
    .await
    .unwrap();

    let mut client = RawClient::connect(agent.local_addr()).await;

    let reply = client.exchange(br#"{"type":"checkCpuThreshold"}"#).await;
    assert_eq!(reply["type"], "checkCpuThreshold");
    assert_eq!(reply["data"]["threshold"], 85.0);
    assert_eq!(reply["data"]["exceeded"], true);

    let reply = client
        .exchange(br#"{"type":"checkCpuThreshold","threshold":95}"#)
        .await;
    assert_eq!(reply["data"]["exceeded"], false);

    agent.stop();
}

#[tokio::test]
async fn test_unknown_type_keeps_serving() {
    let agent = ResponderHandle::spawn(
        ResolvedAddress::new("127.0.0.1", 0),
        Arc::new(FixedSource::new(12.5)),
    )
    .await
    .unwrap();

    let mut client = RawClient::connect(agent.local_addr()).await;

    let reply = client.exchange(br#"{"type":"bogusType"}"#).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["error"].as_str().unwrap().contains("bogusType"));
    assert!(reply["timestamp"].is_string());

    let reply = client.exchange(br#"{"type":"getCpuUsage"}"#).await;
    assert_eq!(reply["type"], "getCpuUsage");
    assert_eq!(reply["data"], 12.5);

    assert!(agent.is_serving());
    agent.stop();
}

#[tokio::test]
async fn test_malformed_input_keeps_serving() {
    let agent = ResponderHandle::spawn(
        ResolvedAddress::new("127.0.0.1", 0),
        Arc::new(FixedSource::new(12.5)),
    )
    .await
    .unwrap();

    let mut client = RawClient::connect(agent.local_addr()).await;

    let reply = client.exchange(b"this is not json").await;
    assert_eq!(reply["type"], "error");
    assert!(reply["error"].as_str().unwrap().contains("Failed to parse"));

    let reply = client.exchange(&[0xff, 0xfe, 0x00]).await;
    assert_eq!(reply["type"], "error");

    let reply = client.exchange(br#"{"type":"ping"}"#).await;
    assert_eq!(reply["type"], "pong");

    agent.stop();
}

#[tokio::test]
async fn test_failed_operation_echoes_the_type() {
    let agent = ResponderHandle::spawn(
        ResolvedAddress::new("127.0.0.1", 0),
        Arc::new(BrokenSource),
    )
    .await
    .unwrap();

    let mut client = RawClient::connect(agent.local_addr()).await;
    let reply = client.exchange(br#"{"type":"getCpuMetrics"}"#).await;

    assert_eq!(reply["type"], "getCpuMetrics");
    assert!(reply.get("data").is_none());
    assert!(reply["error"].as_str().unwrap().contains("sensor unavailable"));

    agent.stop();
}

#[tokio::test]
async fn test_lifecycle_and_rebind_after_stop() {
    let port = free_port().await;
    let address = ResolvedAddress::new("127.0.0.1", port);

    let mut responder = Responder::new(address.clone(), Arc::new(FixedSource::new(1.0)));
    assert_eq!(responder.state(), SocketState::Unbound);
    responder.bind().await.unwrap();
    assert_eq!(responder.state(), SocketState::Bound);

    let agent = responder.serve().await.unwrap();
    assert_eq!(agent.state(), SocketState::Serving);

    assert!(agent.stop());
    assert!(!agent.stop());
    agent.stopped().await;
    assert_eq!(agent.state(), SocketState::Closed);

    // the port is free again without any cleanup
    let again = ResponderHandle::spawn(address, Arc::new(FixedSource::new(2.0)))
        .await
        .unwrap();
    assert!(again.is_serving());
    again.stop();
    again.stopped().await;
}

#[tokio::test]
async fn test_second_agent_on_the_same_port_fails_to_bind() {
    let first = ResponderHandle::spawn(
        ResolvedAddress::new("127.0.0.1", 0),
        Arc::new(FixedSource::new(1.0)),
    )
    .await
    .unwrap();

    let result = ResponderHandle::spawn(
        ResolvedAddress::new("127.0.0.1", first.local_addr().port()),
        Arc::new(FixedSource::new(1.0)),
    )
    .await;

    let error = result.unwrap_err();
    assert!(error.is_fatal());
    assert_matches!(error, BridgeError::Bind { .. });

    // the first agent is not affected
    assert!(first.is_serving());
    first.stop();
}
