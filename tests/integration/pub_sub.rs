//! Commands published by topic, replies pushed back to the coordinator

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use channel_monitoring::{
    bridge::{
        BridgeError, Command, PubSubPorts, PublisherHandle, ReplyCorrelator, ReplyListenerHandle,
        ResolvedAddress, ResponseBody, SubscriberConfig, SubscriberHandle, resolve,
        spawn_reply_listener, spawn_subscriber,
    },
    coordinator::Coordinator,
};

use crate::helpers::*;

struct Hub {
    publisher: PublisherHandle,
    replies: ReplyListenerHandle,
    correlator: ReplyCorrelator,
}

impl Hub {
    async fn start() -> Self {
        let publisher = PublisherHandle::spawn(ResolvedAddress::new("127.0.0.1", 0))
            .await
            .unwrap();
        let correlator = ReplyCorrelator::new();
        let replies = spawn_reply_listener(ResolvedAddress::new("127.0.0.1", 0), correlator.clone())
            .await
            .unwrap();

        Self {
            publisher,
            replies,
            correlator,
        }
    }

    fn ports(&self) -> PubSubPorts {
        PubSubPorts {
            commands: self.publisher.local_addr().port(),
            replies: self.replies.local_addr().port(),
        }
    }

    async fn agent(&self, channel_id: &str, usage: f64) -> SubscriberHandle {
        let subscriber = spawn_subscriber(
            SubscriberConfig::new(channel_id, "127.0.0.1", self.ports()),
            Arc::new(FixedSource::new(usage)),
        );
        let publisher = self.publisher.clone();
        let topic = channel_id.to_string();
        eventually(move || publisher.is_subscribed(&topic)).await;
        subscriber
    }

    fn coordinator(&self, timeout: Duration) -> (Coordinator, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = Coordinator::pubsub(
            self.publisher.clone(),
            self.replies.clone(),
            self.correlator.clone(),
            timeout,
            notifier.clone(),
        );
        (coordinator, notifier)
    }
}

#[tokio::test]
async fn test_round_trip_through_topics() {
    let hub = Hub::start().await;
    let agent = hub.agent("abcd1234", 12.5).await;
    let (coordinator, notifier) = hub.coordinator(Duration::from_secs(2));

    let response = coordinator
        .fetch("abcd1234", Command::GetCpuUsage)
        .await
        .unwrap();
    assert_eq!(response.body, ResponseBody::CpuUsage(12.5));

    coordinator.report_metrics("abcd1234").await;
    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].1.contains("CPU Usage: 12.50%"));

    agent.stop();
    agent.stopped().await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_topics_match_exactly() {
    let hub = Hub::start().await;

    // same suffix, so both would collide on the derived port
    assert_eq!(resolve("aaaa1234"), resolve("bbbb1234"));
    let first = hub.agent("aaaa1234", 10.0).await;
    let second = hub.agent("bbbb1234", 20.0).await;
    assert_eq!(hub.publisher.subscriber_count(), 2);

    let (coordinator, _) = hub.coordinator(Duration::from_secs(2));

    let response = coordinator
        .fetch("bbbb1234", Command::GetCpuUsage)
        .await
        .unwrap();
    assert_eq!(response.body, ResponseBody::CpuUsage(20.0));

    let response = coordinator
        .fetch("aaaa1234", Command::GetCpuUsage)
        .await
        .unwrap();
    assert_eq!(response.body, ResponseBody::CpuUsage(10.0));

    assert!(!hub.publisher.is_subscribed("1234"));

    first.stop();
    second.stop();
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_no_subscriber_times_out() {
    let hub = Hub::start().await;
    let (coordinator, notifier) = hub.coordinator(Duration::from_millis(200));

    let result = coordinator.fetch("abcd1234", Command::Ping).await;
    assert_matches!(result, Err(BridgeError::Timeout { .. }));
    assert_eq!(hub.correlator.pending_count("abcd1234"), 0);

    assert!(coordinator.request_metrics("abcd1234", &serde_json::Value::Null));
    let messages = notifier.wait_for(1).await;
    assert_eq!(messages[0].0, "abcd1234");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_the_hub() {
    let hub = Hub::start().await;
    let (coordinator, _) = hub.coordinator(Duration::from_millis(200));

    coordinator.shutdown().await;
    coordinator.shutdown().await;

    assert!(coordinator.is_closed());
    assert_matches!(
        coordinator.fetch("abcd1234", Command::Ping).await,
        Err(BridgeError::Closed)
    );
    assert!(!coordinator.request_metrics("abcd1234", &serde_json::Value::Null));
}
