//! Failure handling across the bridge
//!
//! Every failure stays within the exchange that caused it:
//! - unreachable agents time out within the deadline
//! - agent-side failures come back as errors, not crashes
//! - restarted agents are picked up by the cached connection

use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use channel_monitoring::{
    bridge::{BridgeError, Command, MAX_FRAME_BYTES, ResolvedAddress, ResponderHandle, ResponseBody},
    coordinator::{Coordinator, FAILURE_NOTICE},
};

use crate::helpers::*;

#[tokio::test]
async fn test_unreachable_agent_times_out_on_deadline() {
    let port = free_port().await;
    let requester = requester(Duration::from_millis(500));
    requester.register_agent("dead0001", "127.0.0.1", Some(port)).await;

    let started = Instant::now();
    let result = requester.request_metrics("dead0001").await;
    let elapsed = started.elapsed();

    assert_matches!(result, Err(BridgeError::Timeout { .. }));
    assert!(elapsed >= Duration::from_millis(500), "too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(700), "too late: {elapsed:?}");
}

#[tokio::test]
async fn test_unresolvable_host_is_a_connection_error() {
    let requester = requester(Duration::from_secs(2));
    requester
        .register_agent("abcd1234", "agent.invalid", None)
        .await;

    let result = requester.request("abcd1234", Command::Ping).await;
    assert_matches!(result, Err(BridgeError::Connection { .. }));
}

#[tokio::test]
async fn test_agent_failure_does_not_stop_the_agent() {
    let agent = ResponderHandle::spawn(
        ResolvedAddress::new("127.0.0.1", 0),
        Arc::new(BrokenSource),
    )
    .await
    .unwrap();

    let requester = requester(Duration::from_secs(2));
    requester
        .register_agent("abcd1234", "127.0.0.1", Some(agent.local_addr().port()))
        .await;

    let result = requester.request_metrics("abcd1234").await;
    assert_matches!(result, Err(BridgeError::Agent(message)) if message.contains("sensor unavailable"));

    assert!(agent.is_serving());
    assert!(requester.ping("abcd1234").await);

    agent.stop();
}

#[tokio::test]
async fn test_restarted_agent_is_reached_again() {
    let port = free_port().await;
    let address = ResolvedAddress::new("127.0.0.1", port);

    let requester = requester(Duration::from_secs(2));
    requester.register_agent("abcd1234", "127.0.0.1", Some(port)).await;

    let agent = ResponderHandle::spawn(address.clone(), Arc::new(FixedSource::new(10.0)))
        .await
        .unwrap();
    let response = requester.request("abcd1234", Command::GetCpuUsage).await.unwrap();
    assert_eq!(response.body, ResponseBody::CpuUsage(10.0));

    agent.stop();
    agent.stopped().await;

    let agent = ResponderHandle::spawn(address, Arc::new(FixedSource::new(20.0)))
        .await
        .unwrap();
    let response = requester.request("abcd1234", Command::GetCpuUsage).await.unwrap();
    assert_eq!(response.body, ResponseBody::CpuUsage(20.0));
    assert_eq!(requester.cached_connections().await, 1);

    agent.stop();
}

#[tokio::test]
async fn test_slow_reply_is_skipped_by_the_next_request() {
    let source = Arc::new(SlowSource::new(Duration::from_millis(400)));
    let agent = ResponderHandle::spawn(ResolvedAddress::new("127.0.0.1", 0), source)
        .await
        .unwrap();

    let requester = requester(Duration::from_millis(200));
    requester
        .register_agent("abcd1234", "127.0.0.1", Some(agent.local_addr().port()))
        .await;

    let result = requester.request("abcd1234", Command::GetCpuUsage).await;
    assert_matches!(result, Err(BridgeError::Timeout { .. }));

    // let the late reply arrive; it must not be taken for the answer to ping
    tokio::time::sleep(Duration::from_millis(400)).await;
    let response = requester.request("abcd1234", Command::Ping).await.unwrap();
    assert_eq!(response.body, ResponseBody::Pong);

    agent.stop();
}

#[tokio::test]
async fn test_user_gets_one_polite_notice() {
    let port = free_port().await;
    let requester = requester(Duration::from_millis(200));
    requester.register_agent("dead0001", "127.0.0.1", Some(port)).await;

    let notifier = Arc::new(RecordingNotifier::default());
    let coordinator = Coordinator::direct(requester, notifier.clone());

    assert!(coordinator.request_metrics("dead0001", &serde_json::Value::Null));

    let messages = notifier.wait_for(1).await;
    assert_eq!(messages, vec![("dead0001".to_string(), FAILURE_NOTICE.to_string())]);
}

#[tokio::test]
async fn test_closed_requester() {
    let requester = requester(Duration::from_secs(1));
    requester.close().await;
    requester.close().await;

    assert!(requester.is_closed());
    assert_matches!(
        requester.request("abcd1234", Command::Ping).await,
        Err(BridgeError::Closed)
    );
}

#[tokio::test]
async fn test_oversized_frame_closes_only_that_connection() {
    let agent = ResponderHandle::spawn(
        ResolvedAddress::new("127.0.0.1", 0),
        Arc::new(FixedSource::new(20.0)),
    )
    .await
    .unwrap();

    let mut flooder = RawClient::connect(agent.local_addr()).await;
    flooder.send_raw(&vec![b'x'; MAX_FRAME_BYTES * 8]).await;
    assert!(flooder.closed_by_peer().await);

    let mut client = RawClient::connect(agent.local_addr()).await;
    let reply = client.exchange(br#"{"type":"ping"}"#).await;
    assert_eq!(reply["type"], "pong");

    agent.stop();
}
