//! HTTP server implementation.
//!
//! This module provides the main [`DevServer`] struct for running
//! the lambda-dev HTTP server.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use lambda_dev_common::{LambdaError, ServerConfigFile};

use crate::router::build_router;
use crate::state::AppState;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server.
    pub bind_addr: SocketAddr,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Enable graceful shutdown on SIGTERM/SIGINT.
    pub graceful_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            request_timeout_secs: 60,
            graceful_shutdown: true,
        }
    }
}

impl ServerConfig {
    /// Server settings from the `server` section of the dev config.
    ///
    /// # Errors
    ///
    /// Returns [`LambdaError::Config`] if the bind address does not parse.
    pub fn from_file(file: &ServerConfigFile) -> Result<Self, LambdaError> {
        let bind_addr = file.bind_addr.parse().map_err(|e| {
            LambdaError::config(format!(
                "Invalid bind address '{}': {e}. Expected 'host:port'",
                file.bind_addr
            ))
        })?;

        Ok(Self {
            bind_addr,
            request_timeout_secs: file.request_timeout_secs,
            graceful_shutdown: file.graceful_shutdown,
        })
    }

    /// Create a new server config with custom bind address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Create a new server config with custom timeout.
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Get the request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// The lambda-dev HTTP server.
///
/// # Example
///
/// ```ignore
/// use lambda_dev_core::BundleSource;
/// use lambda_dev_server::{AppState, BrokerConfig, DevServer, ServerConfig};
///
/// let state = AppState::from_config(&BrokerConfig::default(), BundleSource::new("dist/bundle.wat"))?;
/// DevServer::new(state, ServerConfig::default()).run().await?;
/// ```
pub struct DevServer {
    /// Application state.
    state: AppState,
    /// Server configuration.
    config: ServerConfig,
}

impl DevServer {
    /// Create a new server instance.
    pub fn new(state: AppState, config: ServerConfig) -> Self {
        Self { state, config }
    }

    /// Get a reference to the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server until shutdown.
    ///
    /// This will block until the server is shut down via signal
    /// (SIGTERM/SIGINT) if graceful shutdown is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the address.
    pub async fn run(self) -> Result<(), LambdaError> {
        let ticker = self.state.engine().start_epoch_ticker();
        let app = build_router(self.state, self.config.request_timeout())
            .into_make_service_with_connect_info::<SocketAddr>();

        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| LambdaError::config(format!("Failed to bind: {e}")))?;

        info!(addr = %self.config.bind_addr, "Starting HTTP server");

        let served = if self.config.graceful_shutdown {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        } else {
            axum::serve(listener, app).await
        };

        if let Some(ticker) = ticker {
            ticker.abort();
        }
        served.map_err(|e| LambdaError::config(format!("Server error: {e}")))?;

        info!("Server shutdown complete");
        Ok(())
    }

    /// Start the server and return a handle for testing.
    ///
    /// The server binds to an ephemeral port (127.0.0.1:0) and
    /// returns a handle that can be used to get the actual address
    /// and shut down the server.
    pub async fn start_test(state: AppState) -> Result<TestHandle, LambdaError> {
        let ticker = state.engine().start_epoch_ticker();
        let app = build_router(state.clone(), Duration::from_secs(30))
            .into_make_service_with_connect_info::<SocketAddr>();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| LambdaError::config(format!("Failed to bind: {e}")))?;

        let addr = listener
            .local_addr()
            .map_err(|e| LambdaError::config(format!("Failed to get addr: {e}")))?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Some(ticker) = ticker {
                ticker.abort();
            }
            served
        });

        Ok(TestHandle {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }
}

/// Handle for a test server instance.
///
/// Use this to interact with and shut down a test server.
pub struct TestHandle {
    /// The address the server is bound to.
    addr: SocketAddr,
    /// Application state.
    state: AppState,
    /// Shutdown signal sender.
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    /// Server task handle.
    handle: tokio::task::JoinHandle<Result<(), std::io::Error>>,
}

impl TestHandle {
    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the server URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Shutdown the server gracefully.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BrokerConfig;
    use lambda_dev_common::StorageConfig;
    use lambda_dev_core::BundleSource;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.request_timeout_secs, 60);
        assert!(config.graceful_shutdown);
    }

    #[test]
    fn test_server_config_builder() {
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let config = ServerConfig::default()
            .with_bind_addr(addr)
            .with_timeout(90);

        assert_eq!(config.bind_addr.port(), 4000);
        assert_eq!(config.request_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_server_config_from_file() {
        let file = ServerConfigFile {
            bind_addr: "0.0.0.0:8081".into(),
            request_timeout_secs: 15,
            graceful_shutdown: false,
        };
        let config = ServerConfig::from_file(&file).unwrap();
        assert_eq!(config.bind_addr.port(), 8081);
        assert!(!config.graceful_shutdown);

        let bad = ServerConfigFile {
            bind_addr: "localhost".into(),
            ..file
        };
        assert!(matches!(
            ServerConfig::from_file(&bad),
            Err(LambdaError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_served_over_tcp() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("index.wat");
        std::fs::write(
            &bundle,
            r#"(module
                (import "edge" "add_event_listener" (func $listen (param i32 i32 i32 i32) (result i32)))
                (import "edge" "context_read" (func $read (param i64 i32 i32) (result i32)))
                (import "response" "json" (func $json (param i64 i32 i32 i32) (result i32)))
                (memory (export "memory") 1)
                (data (i32.const 0) "request")
                (data (i32.const 16) "echo")
                (func (export "_start")
                    (drop (call $listen (i32.const 0) (i32.const 7) (i32.const 16) (i32.const 4))))
                (func (export "echo") (param $inv i64) (param $len i32)
                    (drop (call $read (local.get $inv) (i32.const 1024) (local.get $len)))
                    (drop (call $json (local.get $inv) (i32.const 0) (i32.const 1024) (local.get $len)))))"#,
        )
        .unwrap();

        let config = BrokerConfig {
            storage: StorageConfig {
                root: dir.path().join("storage"),
            },
            ..Default::default()
        };
        let state = AppState::from_config(&config, BundleSource::new(bundle)).unwrap();
        let server = DevServer::start_test(state).await.unwrap();

        let health = reqwest::get(format!("{}/__lambda/health", server.url()))
            .await
            .unwrap();
        assert_eq!(health.status().as_u16(), 200);

        let echoed = reqwest::get(format!("{}/items?id=7", server.url()))
            .await
            .unwrap();
        assert_eq!(echoed.status().as_u16(), 200);
        let body: serde_json::Value = serde_json::from_str(&echoed.text().await.unwrap()).unwrap();
        assert_eq!(body["path"], "/items");
        assert_eq!(body["query"]["id"], "7");
        assert_eq!(body["ip"], "127.0.0.1");

        server.shutdown().await;
    }
}
