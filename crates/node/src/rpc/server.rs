//! Gateway server lifecycle.

use super::handlers::GatewayState;
use super::routes::create_router;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Errors from the gateway server.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),
}

/// Configuration for the gateway server.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

/// Handle for a running gateway.
pub struct GatewayHandle {
    task: JoinHandle<()>,
    sweeper: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl GatewayHandle {
    /// The bound listen address (useful when the port was 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Abort the server and its sweeper.
    pub fn abort(&self) {
        self.task.abort();
        self.sweeper.abort();
    }

    /// Wait for the server to finish (it stops on cancellation).
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        let result = self.task.await;
        self.sweeper.abort();
        result
    }
}

/// HTTP gateway for a validator node.
pub struct Gateway {
    config: GatewayConfig,
    state: GatewayState,
}

impl Gateway {
    pub fn new(config: GatewayConfig, state: GatewayState) -> Self {
        Gateway { config, state }
    }

    /// Bind and serve until the token is cancelled. Also starts the rate
    /// limiter's background sweeper, bound to the same token.
    pub async fn start(self, shutdown: CancellationToken) -> Result<GatewayHandle, GatewayError> {
        let listener = tokio::net::TcpListener::bind(self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "gateway listening");

        let sweeper = self.state.limiter.clone().spawn_sweeper(shutdown.clone());
        let router = create_router(self.state);

        let task = tokio::spawn(async move {
            let service = router.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(err) = axum::serve(listener, service)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!(%err, "gateway server error");
            }
        });

        Ok(GatewayHandle {
            task,
            sweeper,
            local_addr,
        })
    }
}
