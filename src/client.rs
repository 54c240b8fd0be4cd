use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::admission::{AdmissionError, AdmissionGate};
use crate::config::{ClientConfig, ConfigError};
use crate::feed::session::{Session, SessionError};
use crate::feed::transport::{FeedTransport, TransportError};
use crate::feed::ws::WsTransport;

/// Owner of the feed connection and the session built on it.
///
/// Cancelling [`FeedClient::shutdown_token`], calling [`FeedClient::close`]
/// or dropping the client closes the connection; every live feed then ends
/// and its channels close.
#[derive(Debug)]
pub struct FeedClient {
    session: Mutex<Option<Arc<Session>>>,
    shutdown: CancellationToken,
}

impl FeedClient {
    /// Connects to `config.server_uri` over websocket/HTTP.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let transport = WsTransport::new(&config)?;
        info!(
            event = "connection_ready",
            server_uri = %config.server_uri,
            client_name = %config.client_name,
        );
        Self::with_transport(config, Arc::new(transport)).await
    }

    /// Builds a client over any transport.
    ///
    /// The transport is closed when the client shuts down.
    pub async fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn FeedTransport>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let gate = AdmissionGate::new(config.request_rate_limit, config.request_rate_burst)?;
        let shutdown = CancellationToken::new();

        let watched = Arc::clone(&transport);
        let token = shutdown.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            debug!(event = "connection_closing");
            watched.close();
        });

        let session = Session::new(transport, Arc::new(gate), shutdown.clone(), &config);
        Ok(Self {
            session: Mutex::new(Some(Arc::new(session))),
            shutdown,
        })
    }

    /// Returns the session, or [`SessionError::NotInitialized`] after close.
    pub fn session(&self) -> Result<Arc<Session>, SessionError> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SessionError::NotInitialized)
    }

    /// Master cancellation token of the connection.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Closes the connection and releases the session.
    pub fn close(&self) {
        self.shutdown.cancel();
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Client construction failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid client config: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid request rate limit: {0}")]
    Admission(#[from] AdmissionError),

    #[error("can't create connection: {0}")]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::{ClientError, FeedClient};
    use crate::config::{ClientConfig, ConfigError};
    use crate::feed::session::SessionError;

    fn run<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
            .block_on(future)
    }

    #[test]
    fn connect_rejects_invalid_config() {
        let result = run(FeedClient::connect(ClientConfig::new("")));
        assert!(matches!(
            result,
            Err(ClientError::Config(ConfigError::MissingServerUri))
        ));
    }

    #[test]
    fn close_removes_the_session() {
        run(async {
            let client = FeedClient::connect(ClientConfig::new("http://127.0.0.1:9"))
                .await
                .expect("client");
            assert!(client.session().is_ok());

            client.close();
            assert!(client.is_closed());
            assert!(matches!(
                client.session(),
                Err(SessionError::NotInitialized)
            ));
        });
    }

    #[test]
    fn sessions_held_past_close_report_closed_connection() {
        run(async {
            let client = FeedClient::connect(ClientConfig::new("http://127.0.0.1:9"))
                .await
                .expect("client");
            let session = client.session().expect("session");
            client.close();

            let result = session.entities("en").await;
            assert!(matches!(result, Err(SessionError::ConnectionClosed)));
        });
    }
}
