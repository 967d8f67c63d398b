//! Channel-addressed messaging bridge between the hub and its agents
//!
//! Two ways to reach an agent:
//!
//! 1. **Direct** request/reply. The agent's [`Responder`] listens on a port
//!    derived from its channel id ([`address::resolve`]); the hub's
//!    [`Requester`] derives the same port and dials it.
//! 2. **Pub/sub**. The hub's [`PublisherHandle`] publishes commands under the
//!    channel id as topic on a fixed base port; agents subscribe with
//!    [`spawn_subscriber`] and push replies to `base + 1`, where the
//!    reply listener hands them to the [`ReplyCorrelator`].
//!
//! ```text
//!            direct                                   pub/sub
//! Requester ──req──▶ Responder           PublisherHandle ──cmd──▶ Subscriber
//!     ▲                  │                                            │
//!     └──────reply───────┘       ReplyCorrelator ◀── ReplyListener ◀──┘
//! ```
//!
//! Every socket owner follows the same [`lifecycle`] and is stopped through
//! its handle.

pub mod address;
pub mod correlator;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod protocol;
pub mod publisher;
pub mod reply_listener;
pub mod requester;
pub mod responder;
pub mod subscriber;

pub use address::{PubSubPorts, ResolvedAddress, resolve};
pub use correlator::{PendingReply, ReplyCorrelator};
pub use error::{BridgeError, BridgeResult};
pub use frame::MAX_FRAME_BYTES;
pub use lifecycle::SocketState;
pub use protocol::{Command, Request, RequestKind, Response, ResponseBody};
pub use publisher::{Publisher, PublisherHandle};
pub use reply_listener::{ReplyListenerHandle, spawn_reply_listener};
pub use requester::{Requester, RequesterConfig};
pub use responder::{Responder, ResponderHandle};
pub use subscriber::{SubscriberConfig, SubscriberHandle, spawn_subscriber};
