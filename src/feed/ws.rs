//! Websocket/HTTP implementation of [`FeedTransport`].
//!
//! Each server stream is one websocket: the subscription request goes out as
//! the first JSON text frame and every server push arrives as a JSON frame.
//! The snapshot query is a plain HTTP `POST`. All of them share one
//! cancellation token, so closing the transport fails every open stream.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::feed::proto::{
    SportDescriptionsRequest, SportDescriptionsResponse, StreamEventsRequest,
    StreamSettlementsRequest,
};
use crate::feed::transport::{
    EventsPushStream, FeedTransport, SettlementsPushStream, TransportError,
};

/// Path of the event/market diff stream.
pub const EVENTS_STREAM_PATH: &str = "/v1/stream/events";
/// Path of the settlement diff stream.
pub const SETTLEMENTS_STREAM_PATH: &str = "/v1/stream/settlements";
/// Path of the sport descriptions snapshot.
pub const SPORT_DESCRIPTIONS_PATH: &str = "/v1/sport-descriptions";

const ERROR_BODY_SNIPPET_LEN: usize = 220;
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_millis(250);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Copy, Debug)]
struct KeepAlive {
    inactive_timeout: Duration,
    timeout: Duration,
}

/// Shared connection to a feed server.
#[derive(Debug)]
pub struct WsTransport {
    ws_base: String,
    http_base: String,
    http: Client,
    request_deadline: Duration,
    max_message_size: usize,
    keep_alive: KeepAlive,
    shutdown: CancellationToken,
}

impl WsTransport {
    /// Builds a transport for `config.server_uri`.
    ///
    /// No socket is opened until the first stream or request.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let base = config.server_uri.trim().trim_end_matches('/');
        let http = Client::builder()
            .connect_timeout(config.request_deadline)
            .tcp_keepalive(config.inactive_timeout)
            .build()?;

        Ok(Self {
            ws_base: ws_base(base),
            http_base: http_base(base),
            http,
            request_deadline: config.request_deadline,
            max_message_size: config.max_message_size,
            keep_alive: KeepAlive {
                inactive_timeout: config.inactive_timeout,
                timeout: config.keep_alive_timeout,
            },
            shutdown: CancellationToken::new(),
        })
    }

    fn ws_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.ws_base, path)
    }

    fn http_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.http_base, path)
    }

    fn ws_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: Some(self.max_message_size),
            max_frame_size: Some(self.max_message_size),
            ..WebSocketConfig::default()
        }
    }

    async fn open_stream<Req, Resp>(
        &self,
        path: &'static str,
        request: &Req,
    ) -> Result<BoxStream<'static, Result<Resp, TransportError>>, TransportError>
    where
        Req: Serialize,
        Resp: DeserializeOwned + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }

        let text = serde_json::to_string(request)?;
        let url = self.ws_endpoint(path);
        let ws_config = self.ws_config();
        // Connect and subscription frame share one deadline.
        let subscribe = async {
            let (mut socket, _) =
                connect_async_with_config(url.as_str(), Some(ws_config), false).await?;
            socket.send(Message::Text(text)).await?;
            Ok::<Socket, TransportError>(socket)
        };
        let socket = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(TransportError::ConnectionClosed),
            subscribed = tokio::time::timeout(self.request_deadline, subscribe) => subscribed
                .map_err(|_| TransportError::Timeout(self.request_deadline))??,
        };
        debug!(event = "stream_opened", path, url = %url);

        let state = PushState {
            socket,
            shutdown: self.shutdown.clone(),
            keep_alive: self.keep_alive,
            path,
            awaiting_pong: false,
        };
        Ok(stream::unfold(Some(state), next_push::<Resp>).boxed())
    }

    async fn post_json<Req, Resp>(
        &self,
        path: &'static str,
        request: &Req,
    ) -> Result<Resp, TransportError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }

        let attempt = async {
            let response = self
                .http
                .post(self.http_endpoint(path))
                .timeout(self.request_deadline)
                .json(request)
                .send()
                .await?;
            let status = response.status();
            if let Some(size) = response.content_length() {
                self.check_size(size as usize)?;
            }
            let body = response.bytes().await?;
            self.check_size(body.len())?;

            if !status.is_success() {
                return Err(TransportError::HttpStatus {
                    status,
                    body: summarize_error_body(&String::from_utf8_lossy(&body)),
                });
            }
            Ok::<Resp, TransportError>(serde_json::from_slice(&body)?)
        };

        tokio::select! {
            _ = self.shutdown.cancelled() => Err(TransportError::ConnectionClosed),
            result = attempt => result,
        }
    }

    fn check_size(&self, size: usize) -> Result<(), TransportError> {
        if size > self.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size,
                limit: self.max_message_size,
            });
        }
        Ok(())
    }
}

impl FeedTransport for WsTransport {
    fn stream_events(
        &self,
        request: StreamEventsRequest,
    ) -> BoxFuture<'_, Result<EventsPushStream, TransportError>> {
        async move { self.open_stream(EVENTS_STREAM_PATH, &request).await }.boxed()
    }

    fn stream_settlements(
        &self,
        request: StreamSettlementsRequest,
    ) -> BoxFuture<'_, Result<SettlementsPushStream, TransportError>> {
        async move { self.open_stream(SETTLEMENTS_STREAM_PATH, &request).await }.boxed()
    }

    fn sport_descriptions(
        &self,
        request: SportDescriptionsRequest,
    ) -> BoxFuture<'_, Result<SportDescriptionsResponse, TransportError>> {
        async move { self.post_json(SPORT_DESCRIPTIONS_PATH, &request).await }.boxed()
    }

    fn close(&self) {
        self.shutdown.cancel();
    }
}

struct PushState {
    socket: Socket,
    shutdown: CancellationToken,
    keep_alive: KeepAlive,
    path: &'static str,
    awaiting_pong: bool,
}

impl PushState {
    async fn next_message<T: DeserializeOwned>(&mut self) -> Result<T, TransportError> {
        loop {
            let wait = if self.awaiting_pong {
                self.keep_alive.timeout
            } else {
                self.keep_alive.inactive_timeout
            };
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => return Err(TransportError::ConnectionClosed),
                frame = tokio::time::timeout(wait, self.socket.next()) => frame,
            };

            let frame = match frame {
                Ok(frame) => frame,
                Err(_) if self.awaiting_pong => {
                    return Err(TransportError::KeepAliveTimeout(self.keep_alive.timeout));
                }
                Err(_) => {
                    self.socket.send(Message::Ping(Vec::new())).await?;
                    self.awaiting_pong = true;
                    continue;
                }
            };
            self.awaiting_pong = false;

            match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(message) => return Ok(message),
                    Err(err) => {
                        warn!(event = "push_decode_failed", path = self.path, error = %err);
                    }
                },
                Some(Ok(Message::Binary(bytes))) => match serde_json::from_slice(&bytes) {
                    Ok(message) => return Ok(message),
                    Err(err) => {
                        warn!(event = "push_decode_failed", path = self.path, error = %err);
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    self.socket.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::StreamClosed),
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }
}

async fn next_push<T: DeserializeOwned>(
    state: Option<PushState>,
) -> Option<(Result<T, TransportError>, Option<PushState>)> {
    let mut state = state?;
    match state.next_message().await {
        Ok(message) => Some((Ok(message), Some(state))),
        Err(err) => {
            if matches!(err, TransportError::ConnectionClosed) {
                let _ = tokio::time::timeout(CLOSE_FRAME_TIMEOUT, state.socket.close(None)).await;
            }
            Some((Err(err), None))
        }
    }
}

fn ws_base(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    }
}

fn http_base(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        base.to_string()
    }
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::{
        http_base, summarize_error_body, ws_base, WsTransport, EVENTS_STREAM_PATH,
        SPORT_DESCRIPTIONS_PATH,
    };
    use crate::config::ClientConfig;

    #[test]
    fn http_uri_maps_to_ws_streams() {
        let transport =
            WsTransport::new(&ClientConfig::new("https://feed.example/")).expect("transport");
        assert_eq!(
            transport.ws_endpoint(EVENTS_STREAM_PATH),
            "wss://feed.example/v1/stream/events"
        );
        assert_eq!(
            transport.http_endpoint(SPORT_DESCRIPTIONS_PATH),
            "https://feed.example/v1/sport-descriptions"
        );
    }

    #[test]
    fn ws_uri_maps_to_http_snapshot() {
        assert_eq!(http_base("ws://127.0.0.1:9000"), "http://127.0.0.1:9000");
        assert_eq!(http_base("wss://feed.example"), "https://feed.example");
        assert_eq!(ws_base("ws://127.0.0.1:9000"), "ws://127.0.0.1:9000");
        assert_eq!(ws_base("http://127.0.0.1:9000"), "ws://127.0.0.1:9000");
    }

    #[test]
    fn error_body_prefers_structured_message() {
        assert_eq!(
            summarize_error_body(r#"{"error":"unknown language"}"#),
            "unknown language"
        );
        let long = "x".repeat(500);
        assert_eq!(summarize_error_body(&long).len(), 220);
    }

    fn silent_listener() -> std::net::TcpListener {
        std::net::TcpListener::bind("127.0.0.1:0").expect("bind silent listener")
    }

    #[tokio::test]
    async fn stalled_subscription_is_bounded_by_the_request_deadline() {
        use std::time::{Duration, Instant};

        use crate::feed::proto::StreamEventsRequest;
        use crate::feed::transport::{FeedTransport, TransportError};

        // Accepts the TCP connection but never answers the handshake.
        let listener = silent_listener();
        let addr = listener.local_addr().expect("listener address");
        let config = ClientConfig::new(format!("http://{addr}"))
            .with_request_deadline(Duration::from_millis(100));
        let transport = WsTransport::new(&config).expect("transport");

        let started = Instant::now();
        let result = transport
            .stream_events(StreamEventsRequest {
                client_name: "test".to_string(),
            })
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(listener);
    }

    #[tokio::test]
    async fn close_interrupts_a_pending_subscription() {
        use std::sync::Arc;
        use std::time::Duration;

        use crate::feed::proto::StreamEventsRequest;
        use crate::feed::transport::{FeedTransport, TransportError};

        let listener = silent_listener();
        let addr = listener.local_addr().expect("listener address");
        let transport = Arc::new(
            WsTransport::new(&ClientConfig::new(format!("http://{addr}"))).expect("transport"),
        );

        let closer = Arc::clone(&transport);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            closer.close();
        });
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            transport.stream_events(StreamEventsRequest {
                client_name: "test".to_string(),
            }),
        )
        .await
        .expect("close releases the subscription");
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
        drop(listener);
    }

    #[tokio::test]
    async fn closed_transport_rejects_new_streams() {
        use crate::feed::proto::StreamEventsRequest;
        use crate::feed::transport::{FeedTransport, TransportError};

        let transport =
            WsTransport::new(&ClientConfig::new("http://127.0.0.1:9")).expect("transport");
        transport.close();
        let result = transport
            .stream_events(StreamEventsRequest {
                client_name: "test".to_string(),
            })
            .await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
    }
}
