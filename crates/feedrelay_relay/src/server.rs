//! HTTP surface of the relay.
//!
//! Two routes:
//!
//! - `GET /key` returns `{"key": "<hex>"}` so clients can address the feed
//! - `GET /` upgrades to a WebSocket and bridges it to a fresh replication
//!   stream

use crate::config::ServerConfig;
use crate::error::{RelayError, RelayResult};
use crate::feed::Feed;
use crate::relay::Relay;
use crate::transport::WsTransport;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Body of `GET /key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyResponse {
    /// The feed key as lowercase hex.
    pub key: String,
}

struct AppState<L> {
    relay: Arc<Relay<L>>,
    permits: Arc<Semaphore>,
}

impl<L> Clone for AppState<L> {
    fn clone(&self) -> Self {
        Self {
            relay: Arc::clone(&self.relay),
            permits: Arc::clone(&self.permits),
        }
    }
}

/// The relay server.
///
/// # Example
///
/// ```rust,ignore
/// use feedrelay_relay::{RelayServer, ServerConfig};
///
/// let server = RelayServer::new(ServerConfig::default(), feed);
/// server.serve().await?;
/// ```
pub struct RelayServer<L> {
    config: ServerConfig,
    state: AppState<L>,
}

impl<L: Feed> RelayServer<L> {
    /// Creates a server relaying `feed`.
    pub fn new(config: ServerConfig, feed: Arc<L>) -> Self {
        let relay = Arc::new(Relay::new(feed, config.max_chunk));
        let permits = Arc::new(Semaphore::new(
            config.max_connections.min(Semaphore::MAX_PERMITS),
        ));
        Self {
            config,
            state: AppState { relay, permits },
        }
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The relay shared by every connection.
    pub fn relay(&self) -> &Arc<Relay<L>> {
        &self.state.relay
    }

    /// Builds the router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/key", get(key::<L>))
            .route("/", get(upgrade::<L>))
            .with_state(self.state.clone())
    }

    /// Binds the configured address and serves until the process stops.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] if the address cannot be bound.
    pub async fn serve(self) -> RelayResult<()> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        self.serve_with_listener(listener).await
    }

    /// Serves on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting connections fails.
    pub async fn serve_with_listener(self, listener: TcpListener) -> RelayResult<()> {
        let addr = listener.local_addr()?;
        info!(%addr, key = %self.state.relay.feed().key(), "relay listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn key<L: Feed>(State(state): State<AppState<L>>) -> Json<KeyResponse> {
    Json(KeyResponse {
        key: state.relay.feed().key().to_hex(),
    })
}

async fn upgrade<L: Feed>(
    State(state): State<AppState<L>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // The limit is checked before the upgrade is negotiated.
    let Ok(permit) = Arc::clone(&state.permits).try_acquire_owned() else {
        warn!("rejecting replication connection: limit reached");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            RelayError::ConnectionLimit.to_string(),
        )
            .into_response();
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        let _permit = permit;
        // Outcomes are logged by the relay.
        let _ = state.relay.handle(WsTransport::new(socket)).await;
    })
}
