//! Coordinator-side requester
//!
//! Sends typed requests to the responder of a channel and waits for the reply.
//!
//! - Connections are cached per channel id, dialed lazily on first use and
//!   reused afterwards. The cache is the only shared state and is filled with
//!   insert-if-absent semantics.
//! - Dialing retries every `reconnect_interval` until the deadline, so an agent
//!   that is not listening shows up as [`BridgeError::Timeout`]. An address that
//!   cannot be resolved is a [`BridgeError::Connection`].
//! - If the agent drops an established connection, the request is re-sent on a
//!   fresh connection once. A second drop within the same call is reported as
//!   [`BridgeError::Connection`].
//! - A timeout leaves the connection open. A dead agent is therefore
//!   indistinguishable from a slow one until the next exchange; use
//!   [`Requester::ping`] when that difference matters.
//!
//! Requests for the same channel are serialized on its connection. The
//! responder answers in order, so replies to requests that already timed out
//! are counted and skipped before reading the reply to the current one.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Instant, sleep, sleep_until, timeout_at};
use tracing::{debug, info, instrument, trace, warn};

use super::address::{ResolvedAddress, resolve};
use super::error::{BridgeError, BridgeResult};
use super::frame::{FrameReader, write_frame};
use super::lifecycle::Lifecycle;
use super::protocol::{Command, Request, Response, ResponseBody};
use crate::metrics::format_response;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RequesterConfig {
    /// Deadline for one exchange, dialing included
    pub timeout: Duration,

    /// Pause between two connection attempts
    pub reconnect_interval: Duration,

    /// Host of agents that were not registered explicitly
    pub default_host: String,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            default_host: "127.0.0.1".to_string(),
        }
    }
}

/// Established connection to one responder
struct Connected {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,

    /// Requests written whose reply has not been read yet
    outstanding: usize,

    /// A write was interrupted; the stream may hold half a frame
    write_pending: bool,
}

impl Connected {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: FrameReader::new(reader),
            writer,
            outstanding: 0,
            write_pending: false,
        }
    }

    /// Write one request and read its reply.
    ///
    /// Cancelling this future leaves the bookkeeping consistent: a pending
    /// reply stays counted in `outstanding` and is skipped by the next call.
    async fn exchange(&mut self, request: &Request) -> BridgeResult<Response> {
        self.write_pending = true;
        write_frame(&mut self.writer, request).await?;
        self.write_pending = false;
        self.outstanding += 1;

        loop {
            let frame = self.reader.next_frame().await?.ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "agent closed the connection")
            })?;
            self.outstanding -= 1;

            if self.outstanding > 0 {
                trace!("skipping stale reply ({} more to skip)", self.outstanding);
                continue;
            }

            return Response::decode(&frame);
        }
    }
}

/// Cached connection slot of one channel
struct ChannelConnection {
    channel_id: String,
    address: ResolvedAddress,
    stream: Option<Connected>,
}

impl ChannelConnection {
    fn new(channel_id: &str, address: ResolvedAddress) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            address,
            stream: None,
        }
    }

    fn timeout_error(&self, config: &RequesterConfig) -> BridgeError {
        BridgeError::Timeout {
            channel_id: self.channel_id.clone(),
            after: config.timeout,
        }
    }

    async fn request(
        &mut self,
        request: &Request,
        deadline: Instant,
        config: &RequesterConfig,
    ) -> BridgeResult<Response> {
        let mut redialed = false;

        loop {
            if self.stream.as_ref().is_some_and(|stream| stream.write_pending) {
                debug!("dropping connection to {} after an interrupted write", self.address);
                self.stream = None;
            }

            let connected = match self.stream.take() {
                Some(connected) => connected,
                None => self.dial(deadline, config).await?,
            };
            let stream = self.stream.insert(connected);

            match timeout_at(deadline, stream.exchange(request)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(BridgeError::Io(e))) => {
                    self.stream = None;
                    if redialed {
                        return Err(BridgeError::Connection {
                            addr: self.address.to_string(),
                            reason: e.to_string(),
                        });
                    }
                    debug!("connection to {} lost ({e}), redialing once", self.address);
                    redialed = true;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!("no reply from {} before the deadline", self.address);
                    return Err(self.timeout_error(config));
                }
            }
        }
    }

    /// Connect, retrying until the deadline
    async fn dial(&self, deadline: Instant, config: &RequesterConfig) -> BridgeResult<Connected> {
        let addrs: Vec<SocketAddr> = match timeout_at(
            deadline,
            tokio::net::lookup_host((self.address.host.as_str(), self.address.port)),
        )
        .await
        {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => {
                return Err(BridgeError::Connection {
                    addr: self.address.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => return Err(self.timeout_error(config)),
        };

        if addrs.is_empty() {
            return Err(BridgeError::Connection {
                addr: self.address.to_string(),
                reason: "host resolved to no addresses".to_string(),
            });
        }

        loop {
            match timeout_at(deadline, TcpStream::connect(&addrs[..])).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    trace!("connected to {}", self.address);
                    return Ok(Connected::new(stream));
                }
                Ok(Err(e)) => trace!("agent at {} not reachable yet: {e}", self.address),
                Err(_) => return Err(self.timeout_error(config)),
            }

            if Instant::now() + config.reconnect_interval >= deadline {
                sleep_until(deadline).await;
                return Err(self.timeout_error(config));
            }
            sleep(config.reconnect_interval).await;
        }
    }
}

struct Inner {
    config: RequesterConfig,
    connections: RwLock<HashMap<String, Arc<Mutex<ChannelConnection>>>>,
    agents: StdRwLock<HashMap<String, ResolvedAddress>>,
    lifecycle: Lifecycle,
}

/// Request/reply client for all channels.
///
/// Cheap to clone; clones share the connection cache.
#[derive(Clone)]
pub struct Requester {
    inner: Arc<Inner>,
}

impl Requester {
    pub fn new(config: RequesterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connections: RwLock::new(HashMap::new()),
                agents: StdRwLock::new(HashMap::new()),
                lifecycle: Lifecycle::new(),
            }),
        }
    }

    pub fn config(&self) -> &RequesterConfig {
        &self.inner.config
    }

    /// Address requests for `channel_id` go to
    pub fn address_for(&self, channel_id: &str) -> ResolvedAddress {
        let agents = self
            .inner
            .agents
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        agents.get(channel_id).cloned().unwrap_or_else(|| {
            ResolvedAddress::for_channel(self.inner.config.default_host.clone(), channel_id)
        })
    }

    /// Pin a channel to `host`, and to `port` instead of the derived one.
    ///
    /// A cached connection to a different address is dropped.
    pub async fn register_agent(&self, channel_id: &str, host: &str, port: Option<u16>) {
        let address = ResolvedAddress::new(host, port.unwrap_or_else(|| resolve(channel_id)));

        let previous = self
            .inner
            .agents
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(channel_id.to_string(), address.clone());

        if previous.as_ref() != Some(&address) {
            self.inner.connections.write().await.remove(channel_id);
        }

        info!("registered agent for {channel_id} at {address}");
    }

    async fn connection(&self, channel_id: &str) -> Arc<Mutex<ChannelConnection>> {
        if let Some(connection) = self.inner.connections.read().await.get(channel_id) {
            return Arc::clone(connection);
        }

        let address = self.address_for(channel_id);
        let mut connections = self.inner.connections.write().await;
        let connection = connections
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ChannelConnection::new(channel_id, address))));

        Arc::clone(connection)
    }

    /// Send `command` to the agent of `channel_id` and wait for its reply
    #[instrument(skip(self), fields(kind = %command.kind()))]
    pub async fn request(&self, channel_id: &str, command: Command) -> BridgeResult<Response> {
        if self.inner.lifecycle.is_closed() {
            return Err(BridgeError::Closed);
        }

        let config = &self.inner.config;
        let deadline = Instant::now() + config.timeout;
        let request = Request::new(command).for_channel(channel_id);

        let connection = self.connection(channel_id).await;
        let Ok(mut connection) = timeout_at(deadline, connection.lock()).await else {
            debug!("request for {channel_id} queued until the deadline");
            return Err(BridgeError::Timeout {
                channel_id: channel_id.to_string(),
                after: config.timeout,
            });
        };

        let result = connection.request(&request, deadline, config).await;
        match &result {
            Ok(response) => trace!("reply {} for {channel_id}", response.body.kind_str()),
            Err(e) => warn!("request for {channel_id} failed: {e}"),
        }

        result
    }

    /// Exchange, then render the reply with the metrics formatter
    pub async fn request_formatted(&self, channel_id: &str, command: Command) -> BridgeResult<String> {
        let response = self.request(channel_id, command).await?.into_result()?;
        Ok(format_response(&response.body))
    }

    /// Full metrics snapshot of a channel, formatted for humans
    pub async fn request_metrics(&self, channel_id: &str) -> BridgeResult<String> {
        self.request_formatted(channel_id, Command::GetMetrics).await
    }

    /// Whether the agent of `channel_id` answers within the deadline
    pub async fn ping(&self, channel_id: &str) -> bool {
        matches!(
            self.request(channel_id, Command::Ping).await,
            Ok(Response {
                body: ResponseBody::Pong,
                ..
            })
        )
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lifecycle.is_closed()
    }

    /// Number of channels with a cached connection slot
    pub async fn cached_connections(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    /// Close every cached connection. Later requests fail with
    /// [`BridgeError::Closed`].
    pub async fn close(&self) {
        if self.inner.lifecycle.close() {
            let mut connections = self.inner.connections.write().await;
            debug!("closing {} cached connections", connections.len());
            connections.clear();
        }
    }
}
