//! Development HTTP server for lambda-dev.
//!
//! This crate puts one bundle behind a local HTTP endpoint. It handles:
//!
//! - Forwarding every request to the bundle through the request bridge
//! - Converting the filled response, or the broker error, back to HTTP
//! - The `/__lambda/health` and `/__lambda/status` routes
//! - Watching the bundle and reporting rebuilds
//!
//! # Quick Start
//!
//! ```ignore
//! use lambda_dev_core::BundleSource;
//! use lambda_dev_server::{AppState, BrokerConfig, DevServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = BundleSource::new("dist/bundle.wat");
//!     let state = AppState::from_config(&BrokerConfig::default(), source)?;
//!
//!     DevServer::new(state, ServerConfig::default()).run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod handler;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod state;
pub mod watcher;

pub use server::{DevServer, ServerConfig, TestHandle};
pub use state::{AppState, BrokerConfig};
pub use watcher::BundleWatcher;
