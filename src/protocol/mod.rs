//! Client-server request/response protocol.
//!
//! This module carries [`Message`](crate::message::Message)s between a game
//! client and a game server over plain TCP. It provides the server framing loop,
//! the listener, blocking and callback-based clients, request batching, and the
//! error and session conventions both sides agree on.
//!
//! # Overview
//!
//! Every connection is strictly request/response. The server parses one message
//! at a time, queues it, and hands it to a [`Handler`]; replies must leave in the
//! order requests arrived. The client funnels every request through a single
//! worker thread, so at most one request is ever in flight per connection and
//! each reply belongs to the request written just before it.
//!
//! Failures travel as a reserved `ERROR{code=..,message=..}` object. The client
//! turns it back into a [`ProtocolError`] instead of handing it out as a reply.
//!
//! # Key Components
//!
//! - [`MessageServer`]: Accept loop, admission filter and connection registry.
//! - [`Connection`]: Per-client framing loop with FIFO reply discipline.
//! - [`Router`]: [`Handler`] dispatching by message name, with `PING`, `LOGIN`
//!   and `BATCH` built in.
//! - [`MessageClient`]: Blocking [`MessageClient::query`] and callback-based
//!   [`MessageClient::query_async`], plus batching.
//! - [`SessionStore`]: Login handshake and per-request session checks.
//!
//! # Reserved Messages
//!
//! | Request                                  | Reply                         |
//! |------------------------------------------|-------------------------------|
//! | `PING{}`                                 | `PONG{}`                      |
//! | `LOGIN{user=..,passphrase=..,version=..}`| `WELCOME{user=..,sessionId=..}`|
//! | `LOGOUT{user=..,sessionId=..}`           | `BYE{}`                       |
//! | `BATCH[..]`                              | `BATCH_RESPONSE[..]`          |
//! | anything that fails                      | `ERROR{code=..,message=..}`   |
//!
//! # Threading
//!
//! Everything runs on OS threads with blocking sockets. Each live server
//! connection occupies one worker of the server's [`ThreadPool`]; a handler that
//! blocks stalls only its own connection.
mod batch;
mod client;
mod connection;
mod dispatch;
mod error;
mod router;
mod server;
mod session;
mod thread;

pub use client::{ClientError, MessageClient, PendingReply, QueryHandle};
pub use connection::{Connection, ConnectionError, ConnectionId, Handler, Request};
pub use dispatch::{DispatchQueue, Dispatcher, Immediate, Task};
pub use error::{ErrorKind, ProtocolError, UnknownErrorKind};
pub use router::{Caller, RouteResult, Router};
pub use server::{DEFAULT_WORKERS, MessageServer, ServerBuilder, ServerError, ShutdownHandle};
pub use session::{Credentials, SESSION_ID_BYTES, Session, SessionStore};
pub use thread::{PoolClosed, Spawner, ThreadPool};

pub const PING: &str = "PING";
pub const PONG: &str = "PONG";
pub const ERROR: &str = "ERROR";
pub const LOGIN: &str = "LOGIN";
pub const WELCOME: &str = "WELCOME";
pub const LOGOUT: &str = "LOGOUT";
pub const BYE: &str = "BYE";
pub const BATCH: &str = "BATCH";
pub const BATCH_RESPONSE: &str = "BATCH_RESPONSE";
