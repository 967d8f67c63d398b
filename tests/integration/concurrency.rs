//! Concurrent use of the bridge

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use channel_monitoring::bridge::{
    BridgeError, Command, ReplyCorrelator, ResolvedAddress, Response, ResponderHandle,
    ResponseBody,
};
use futures::future::join_all;

use crate::helpers::*;

#[tokio::test]
async fn test_responder_runs_one_operation_at_a_time() {
    let source = Arc::new(SlowSource::new(Duration::from_millis(50)));
    let agent = ResponderHandle::spawn(ResolvedAddress::new("127.0.0.1", 0), source.clone())
        .await
        .unwrap();

    // separate connections, so the requests really arrive together
    let clients = (0..4).map(|_| async {
        let mut client = RawClient::connect(agent.local_addr()).await;
        client.exchange(br#"{"type":"getCpuUsage"}"#).await
    });
    let replies = join_all(clients).await;

    assert!(replies.iter().all(|reply| reply["type"] == "getCpuUsage"));
    assert_eq!(source.max_running(), 1);

    agent.stop();
}

#[tokio::test]
async fn test_overlapping_requests_for_one_channel_are_queued() {
    let agent = ResponderHandle::spawn(
        ResolvedAddress::new("127.0.0.1", 0),
        Arc::new(SlowSource::new(Duration::from_millis(50))),
    )
    .await
    .unwrap();

    let requester = requester(Duration::from_secs(2));
    requester
        .register_agent("abcd1234", "127.0.0.1", Some(agent.local_addr().port()))
        .await;

    let requests = (0..5).map(|_| requester.request("abcd1234", Command::GetCpuUsage));
    let results = join_all(requests).await;

    for result in results {
        assert_eq!(result.unwrap().body, ResponseBody::CpuUsage(33.0));
    }
    assert_eq!(requester.cached_connections().await, 1);

    agent.stop();
}

#[tokio::test]
async fn test_many_channels_in_parallel() {
    let mut agents = vec![];
    let requester = requester(Duration::from_secs(2));

    for i in 0..8u32 {
        let channel_id = format!("chan{i:04x}");
        let agent = ResponderHandle::spawn(
            ResolvedAddress::new("127.0.0.1", 0),
            Arc::new(FixedSource::new(f64::from(i))),
        )
        .await
        .unwrap();
        requester
            .register_agent(&channel_id, "127.0.0.1", Some(agent.local_addr().port()))
            .await;
        agents.push((channel_id, agent));
    }

    let requests = agents
        .iter()
        .map(|(channel_id, _)| requester.request(channel_id, Command::GetCpuUsage));
    let results = join_all(requests).await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap().body, ResponseBody::CpuUsage(i as f64));
    }
    assert_eq!(requester.cached_connections().await, agents.len());

    for (_, agent) in &agents {
        agent.stop();
    }
}

#[tokio::test]
async fn test_first_waiter_wins_the_reply() {
    let correlator = ReplyCorrelator::new();

    let first = correlator.register("abcd1234");
    let second = correlator.register("abcd1234");
    assert_eq!(correlator.pending_count("abcd1234"), 2);

    assert!(correlator.on_reply_received("abcd1234", Response::new(ResponseBody::Pong)));

    let (first, second) = tokio::join!(
        first.wait(Duration::from_millis(500)),
        second.wait(Duration::from_millis(200)),
    );
    assert_eq!(first.unwrap().body, ResponseBody::Pong);
    assert_matches!(second, Err(BridgeError::Timeout { .. }));

    assert_eq!(correlator.pending_count("abcd1234"), 0);
    assert!(!correlator.on_reply_received("abcd1234", Response::new(ResponseBody::Pong)));
}
