pub mod auth;
pub mod compose;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod gate;
pub mod notify;
pub mod params;
pub mod registry;
pub mod rows;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod template;
pub mod time;

use crate::{config::AppConfig, server::Server};

/// Bootstraps the view service using environment configuration.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    Server::new(config).await?.run().await
}
