//! Boundary between the session and the network.
//!
//! A [`FeedTransport`] opens the server streams and performs the snapshot
//! request over one shared connection. The session owns no sockets itself;
//! [`crate::feed::ws::WsTransport`] is the production implementation.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use reqwest::StatusCode;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::feed::proto::{
    SportDescriptionsRequest, SportDescriptionsResponse, StreamEventsRequest,
    StreamEventsResponse, StreamSettlementsRequest, StreamSettlementsResponse,
};

/// Server pushes of the event/market diff stream.
///
/// An `Err` item is terminal; implementations end the stream after it.
pub type EventsPushStream = BoxStream<'static, Result<StreamEventsResponse, TransportError>>;

/// Server pushes of the settlement stream. An `Err` item is terminal.
pub type SettlementsPushStream =
    BoxStream<'static, Result<StreamSettlementsResponse, TransportError>>;

/// Network operations a session needs from its connection.
///
/// Dropping a returned stream releases its server-side subscription.
pub trait FeedTransport: Send + Sync + 'static {
    /// Subscribes to event and market diffs.
    fn stream_events(
        &self,
        request: StreamEventsRequest,
    ) -> BoxFuture<'_, Result<EventsPushStream, TransportError>>;

    /// Subscribes to settlement diffs from `request.last_consumed_timestamp`.
    fn stream_settlements(
        &self,
        request: StreamSettlementsRequest,
    ) -> BoxFuture<'_, Result<SettlementsPushStream, TransportError>>;

    /// Fetches the current sport descriptions.
    fn sport_descriptions(
        &self,
        request: SportDescriptionsRequest,
    ) -> BoxFuture<'_, Result<SportDescriptionsResponse, TransportError>>;

    /// Closes the connection. Open streams fail and later calls are rejected.
    fn close(&self);
}

/// Errors produced by transport operations and live streams.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success HTTP status.
    #[error("http {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    /// Inbound message larger than the configured limit.
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    /// No frame arrived within the keepalive window after a ping.
    #[error("keepalive ping unanswered after {0:?}")]
    KeepAliveTimeout(Duration),

    /// Request or stream establishment exceeded its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Server ended the stream.
    #[error("stream closed by server")]
    StreamClosed,

    /// The owning connection has been closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Stream protocol contract error.
    #[error("protocol error: {0}")]
    Protocol(String),
}
