//! Helper functions for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use channel_monitoring::{
    CpuMetrics, MetricsData,
    bridge::{Requester, RequesterConfig},
    metrics::MetricsSource,
    notifier::Notifier,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Always reports the same CPU usage
pub struct FixedSource {
    pub usage: f64,
}

impl FixedSource {
    pub fn new(usage: f64) -> Self {
        Self { usage }
    }
}

#[async_trait]
impl MetricsSource for FixedSource {
    async fn cpu(&self) -> Result<CpuMetrics> {
        Ok(CpuMetrics {
            usage: Some(self.usage),
            cores: Some(4),
            load_avg: Some(vec![0.5, 0.25, 0.1]),
        })
    }

    async fn snapshot(&self) -> Result<MetricsData> {
        Ok(MetricsData {
            cpu: Some(self.cpu().await?),
            ..Default::default()
        })
    }
}

/// Fails every operation
pub struct BrokenSource;

#[async_trait]
impl MetricsSource for BrokenSource {
    async fn cpu(&self) -> Result<CpuMetrics> {
        Err(anyhow!("sensor unavailable"))
    }

    async fn snapshot(&self) -> Result<MetricsData> {
        Err(anyhow!("sensor unavailable"))
    }
}

/// Takes `delay` per operation and records how many run at once
pub struct SlowSource {
    pub delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl SlowSource {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for SlowSource {
    async fn cpu(&self) -> Result<CpuMetrics> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        Ok(CpuMetrics {
            usage: Some(33.0),
            cores: None,
            load_avg: None,
        })
    }

    async fn snapshot(&self) -> Result<MetricsData> {
        Ok(MetricsData {
            cpu: Some(self.cpu().await?),
            ..Default::default()
        })
    }
}

/// Remembers every notification instead of sending it
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait until at least `count` notifications arrived
    pub async fn wait_for(&self, count: usize) -> Vec<(String, String)> {
        for _ in 0..100 {
            let messages = self.messages();
            if messages.len() >= count {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {count} notifications, got {:?}", self.messages());
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, channel_id: &str, message: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), message.to_string()));
    }
}

/// A port nothing listens on (bound once, then released)
pub async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn requester(timeout: Duration) -> Requester {
    Requester::new(RequesterConfig {
        timeout,
        ..Default::default()
    })
}

/// Poll `condition` for up to two seconds
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

/// Plain TCP client speaking newline-delimited JSON
pub struct RawClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RawClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (reader, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn send_line(&mut self, line: &[u8]) {
        self.writer.write_all(line).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    pub async fn read_json(&mut self) -> Value {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("no reply in time")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    pub async fn exchange(&mut self, line: &[u8]) -> Value {
        self.send_line(line).await;
        self.read_json().await
    }

    /// Write raw bytes, ignoring a peer that already hung up
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let _ = self.writer.write_all(bytes).await;
    }

    /// Whether the peer closes the connection within a few seconds
    pub async fn closed_by_peer(&mut self) -> bool {
        let mut sink = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_to_end(&mut sink))
            .await
            .is_ok()
    }
}
