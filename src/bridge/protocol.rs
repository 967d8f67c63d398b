//! Message types exchanged between coordinator and agents
//!
//! On the wire every message is a flat JSON object:
//!
//! ```text
//! request:  {"type": "...", "channelId"?: "...", "threshold"?: 85, "timestamp"?: "..."}
//! response: {"type": "...", "data"?: ..., "error"?: "...", "timestamp": "..."}
//! ```
//!
//! In memory, requests and responses are closed enums so that the `type` of a
//! message fixes the shape of its payload. Conversion happens once, at the edge,
//! through [`WireRequest`] and [`WireResponse`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::error::{BridgeError, BridgeResult};
use crate::{CpuMetrics, MetricsData, ThresholdCheck};

/// Threshold used by `checkCpuThreshold` when the request carries none
pub const DEFAULT_CPU_THRESHOLD: f64 = 85.0;

/// The closed set of request types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    GetCpuUsage,
    GetCpuMetrics,
    GetFormattedCpuMetrics,
    CheckCpuThreshold,
    GetMetrics,
    Ping,
}

impl RequestKind {
    pub const ALL: [RequestKind; 6] = [
        RequestKind::GetCpuUsage,
        RequestKind::GetCpuMetrics,
        RequestKind::GetFormattedCpuMetrics,
        RequestKind::CheckCpuThreshold,
        RequestKind::GetMetrics,
        RequestKind::Ping,
    ];

    /// Wire name of the request type
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::GetCpuUsage => "getCpuUsage",
            RequestKind::GetCpuMetrics => "getCpuMetrics",
            RequestKind::GetFormattedCpuMetrics => "getFormattedCpuMetrics",
            RequestKind::CheckCpuThreshold => "checkCpuThreshold",
            RequestKind::GetMetrics => "getMetrics",
            RequestKind::Ping => "ping",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| BridgeError::UnknownType(s.to_string()))
    }
}

/// What the coordinator asks an agent to do
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetCpuUsage,
    GetCpuMetrics,
    GetFormattedCpuMetrics,
    CheckCpuThreshold { threshold: f64 },
    GetMetrics,
    Ping,
}

impl Command {
    pub fn kind(&self) -> RequestKind {
        match self {
            Command::GetCpuUsage => RequestKind::GetCpuUsage,
            Command::GetCpuMetrics => RequestKind::GetCpuMetrics,
            Command::GetFormattedCpuMetrics => RequestKind::GetFormattedCpuMetrics,
            Command::CheckCpuThreshold { .. } => RequestKind::CheckCpuThreshold,
            Command::GetMetrics => RequestKind::GetMetrics,
            Command::Ping => RequestKind::Ping,
        }
    }
}

/// Request as sent by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "WireRequest")]
pub struct Request {
    pub command: Command,
    pub channel_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// JSON shape of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Request {
    /// New request stamped with the current time
    pub fn new(command: Command) -> Self {
        Self {
            command,
            channel_id: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn for_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn kind(&self) -> RequestKind {
        self.command.kind()
    }

    /// Decode a request frame.
    ///
    /// Fails with [`BridgeError::Decode`] if the bytes are not a JSON request
    /// object and with [`BridgeError::UnknownType`] if the `type` is not one of
    /// the known request types.
    pub fn decode(bytes: &[u8]) -> BridgeResult<Self> {
        let wire: WireRequest = serde_json::from_slice(bytes)?;
        Request::try_from(wire)
    }

    /// Same as [`Request::decode`], for a payload already parsed as JSON
    pub fn from_value(value: Value) -> BridgeResult<Self> {
        let wire: WireRequest = serde_json::from_value(value)?;
        Request::try_from(wire)
    }
}

impl TryFrom<WireRequest> for Request {
    type Error = BridgeError;

    fn try_from(wire: WireRequest) -> Result<Self, Self::Error> {
        let command = match wire.kind.parse::<RequestKind>()? {
            RequestKind::GetCpuUsage => Command::GetCpuUsage,
            RequestKind::GetCpuMetrics => Command::GetCpuMetrics,
            RequestKind::GetFormattedCpuMetrics => Command::GetFormattedCpuMetrics,
            RequestKind::CheckCpuThreshold => Command::CheckCpuThreshold {
                threshold: wire.threshold.unwrap_or(DEFAULT_CPU_THRESHOLD),
            },
            RequestKind::GetMetrics => Command::GetMetrics,
            RequestKind::Ping => Command::Ping,
        };

        Ok(Request {
            command,
            channel_id: wire.channel_id,
            timestamp: wire.timestamp.as_deref().and_then(parse_timestamp),
        })
    }
}

impl From<Request> for WireRequest {
    fn from(request: Request) -> Self {
        let threshold = match request.command {
            Command::CheckCpuThreshold { threshold } => Some(threshold),
            _ => None,
        };

        WireRequest {
            kind: request.command.kind().as_str().to_string(),
            channel_id: request.channel_id,
            threshold,
            timestamp: request.timestamp.map(|ts| ts.to_rfc3339()),
        }
    }
}

/// Payload of a response, one variant per response `type`
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    CpuUsage(f64),
    CpuMetrics(CpuMetrics),
    FormattedCpuMetrics(String),
    CpuThreshold(ThresholdCheck),
    Metrics(MetricsData),
    Pong,

    /// A known request failed on the agent; `type` echoes the request
    Failed { kind: RequestKind, message: String },

    /// The request could not be understood at all (`type: "error"`)
    Error(String),
}

impl ResponseBody {
    /// Wire `type` of the response
    pub fn kind_str(&self) -> &'static str {
        match self {
            ResponseBody::CpuUsage(_) => RequestKind::GetCpuUsage.as_str(),
            ResponseBody::CpuMetrics(_) => RequestKind::GetCpuMetrics.as_str(),
            ResponseBody::FormattedCpuMetrics(_) => RequestKind::GetFormattedCpuMetrics.as_str(),
            ResponseBody::CpuThreshold(_) => RequestKind::CheckCpuThreshold.as_str(),
            ResponseBody::Metrics(_) => RequestKind::GetMetrics.as_str(),
            ResponseBody::Pong => "pong",
            ResponseBody::Failed { kind, .. } => kind.as_str(),
            ResponseBody::Error(_) => "error",
        }
    }
}

/// Response as sent by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireResponse", try_from = "WireResponse")]
pub struct Response {
    pub body: ResponseBody,

    /// Assigned when the response is created, independent of the request's
    pub timestamp: DateTime<Utc>,
}

/// JSON shape of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl Response {
    pub fn new(body: ResponseBody) -> Self {
        Self {
            body,
            timestamp: Utc::now(),
        }
    }

    /// `type: "error"` response carrying `message`
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ResponseBody::Error(message.into()))
    }

    pub fn decode(bytes: &[u8]) -> BridgeResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self.body,
            ResponseBody::Failed { .. } | ResponseBody::Error(_)
        )
    }

    /// Turn agent-side failures into [`BridgeError::Agent`]
    pub fn into_result(self) -> BridgeResult<Response> {
        match &self.body {
            ResponseBody::Failed { message, .. } | ResponseBody::Error(message) => {
                Err(BridgeError::Agent(message.clone()))
            }
            _ => Ok(self),
        }
    }
}

impl From<Response> for WireResponse {
    fn from(response: Response) -> Self {
        let kind = response.body.kind_str().to_string();
        let (data, error) = match response.body {
            ResponseBody::CpuUsage(usage) => (Some(Value::from(usage)), None),
            ResponseBody::CpuMetrics(cpu) => (serde_json::to_value(cpu).ok(), None),
            ResponseBody::FormattedCpuMetrics(text) => (Some(Value::String(text)), None),
            ResponseBody::CpuThreshold(check) => (serde_json::to_value(check).ok(), None),
            ResponseBody::Metrics(metrics) => (serde_json::to_value(metrics).ok(), None),
            ResponseBody::Pong => (None, None),
            ResponseBody::Failed { message, .. } | ResponseBody::Error(message) => {
                (None, Some(message))
            }
        };

        WireResponse {
            kind,
            data,
            error,
            timestamp: Some(response.timestamp.to_rfc3339()),
        }
    }
}

impl TryFrom<WireResponse> for Response {
    type Error = BridgeError;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        let timestamp = wire
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        let body = match (wire.kind.as_str(), wire.error) {
            ("error", error) => {
                ResponseBody::Error(error.unwrap_or_else(|| "unknown error".to_string()))
            }
            ("pong", _) => ResponseBody::Pong,
            (kind, Some(message)) => ResponseBody::Failed {
                kind: kind.parse()?,
                message,
            },
            (kind, None) => {
                let kind: RequestKind = kind.parse()?;
                let data = wire
                    .data
                    .ok_or_else(|| BridgeError::Decode(format!("missing data for {kind}")))?;

                match kind {
                    RequestKind::GetCpuUsage => {
                        let usage = data.as_f64().ok_or_else(|| {
                            BridgeError::Decode(format!("expected a number for {kind}"))
                        })?;
                        ResponseBody::CpuUsage(usage)
                    }
                    RequestKind::GetCpuMetrics => {
                        ResponseBody::CpuMetrics(serde_json::from_value(data)?)
                    }
                    RequestKind::GetFormattedCpuMetrics => {
                        ResponseBody::FormattedCpuMetrics(serde_json::from_value(data)?)
                    }
                    RequestKind::CheckCpuThreshold => {
                        ResponseBody::CpuThreshold(serde_json::from_value(data)?)
                    }
                    RequestKind::GetMetrics => ResponseBody::Metrics(serde_json::from_value(data)?),
                    RequestKind::Ping => ResponseBody::Pong,
                }
            }
        };

        Ok(Response { body, timestamp })
    }
}

/// Pub/sub envelope: the topic is the channel id, verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub topic: String,
    pub payload: T,
}

/// Frames a subscriber sends to the publisher to manage its topic filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionFrame {
    Subscribe(String),
    Unsubscribe(String),
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            debug!("ignoring unparseable timestamp {raw:?}: {e}");
            None
        }
    }
}
