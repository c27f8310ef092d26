//! Amplitude Forwarder: server-side analytics event forwarding.
//!
//! Main entry point: loads configuration, builds the identity store and
//! HTTP transport, and serves the ingestion API.

use anyhow::Context;
use clap::Parser;
use forwarder_api::ApiServer;
use forwarder_core::config::{AppConfig, StoreBackend};
use forwarder_dispatch::{Dispatcher, HttpTransport};
use forwarder_identity::{IdentityResolver, IdentityStore, MemoryIdentityStore, RedisIdentityStore};
use forwarder_pipeline::{EventNormalizer, Forwarder};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Log filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "amplitude_forwarder=info,forwarder_api=info,\
forwarder_pipeline=info,forwarder_dispatch=info,forwarder_identity=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(name = "amplitude-forwarder")]
#[command(about = "Server-side analytics forwarder for the Amplitude HTTP API")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, short, env = "AMPLITUDE_FORWARDER_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "AMPLITUDE_FORWARDER__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "AMPLITUDE_FORWARDER__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Amplitude project API key (overrides config)
    #[arg(long, env = "AMPLITUDE_FORWARDER__AMPLITUDE__API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Skip user-agent parsing for device fields
    #[arg(long, default_value_t = false)]
    no_device_enrichment: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Amplitude Forwarder starting up");

    // Load configuration
    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(api_key) = cli.api_key {
        config.amplitude.api_key = api_key;
    }

    config.validate().context("invalid configuration")?;

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        store = ?config.identity.backend,
        min_id_length = ?config.amplitude.min_id_length,
        "Configuration loaded"
    );

    // Initialize identity store
    let session_ttl = Duration::from_secs(config.identity.session_ttl_secs);
    let store: Arc<dyn IdentityStore> = match config.identity.backend {
        StoreBackend::Memory => {
            let memory = Arc::new(MemoryIdentityStore::new(session_ttl));

            // Spawn session eviction task
            let for_maintenance = memory.clone();
            let every = Duration::from_secs(config.identity.maintenance_interval_secs.max(1));
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                loop {
                    interval.tick().await;
                    let evicted = for_maintenance.evict_expired();
                    if evicted > 0 {
                        debug!(evicted, "Expired sessions evicted");
                    }
                }
            });

            memory
        }
        StoreBackend::Redis => Arc::new(
            RedisIdentityStore::new(&config.identity)
                .await
                .context("Redis connection required for the redis identity backend")?,
        ),
    };

    // Initialize pipeline
    let transport = HttpTransport::new(Duration::from_millis(config.amplitude.request_timeout_ms))?;
    let dispatcher = Dispatcher::new(&config.amplitude, Arc::new(transport));
    let resolver = IdentityResolver::new(store, config.identity.anonymous_user);
    let normalizer = if cli.no_device_enrichment {
        EventNormalizer::new().without_device_enrichment()
    } else {
        EventNormalizer::new()
    };
    let forwarder = Arc::new(Forwarder::new(resolver, normalizer, dispatcher));

    let api_server = ApiServer::new(config.clone(), forwarder);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Amplitude Forwarder is ready to accept events");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_workspace_crates() {
        let directives: Vec<&str> = DEFAULT_LOG_FILTER.split(',').collect();
        for target in [
            "amplitude_forwarder",
            "forwarder_api",
            "forwarder_pipeline",
            "forwarder_dispatch",
            "forwarder_identity",
        ] {
            assert!(
                directives.contains(&format!("{target}=info").as_str()),
                "{target} missing from default log filter"
            );
        }
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
