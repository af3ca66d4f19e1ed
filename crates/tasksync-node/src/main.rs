//! # tasksync-node
//!
//! Node binary: loads settings, picks the broker backend, wires the hub and
//! router together and serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tasksync_bus::{BroadcastBus, Broker, MemoryBroker, RedisBroker};
use tasksync_settings::{BrokerBackend, TaskSyncSettings};
use tasksync_store::{HistoryStore, MemoryHistoryStore, MemoryPresenceStore, PresenceStore, RedisStore};
use tasksync_server::router::handlers::{EchoTaskEffects, register_defaults};
use tasksync_server::{CollabHub, EventRouter, HubConfig, ServerConfig, SyncServer};

/// tasksync fanout node.
#[derive(Parser, Debug)]
#[command(name = "tasksync-node", about = "Real-time workspace fanout node")]
struct Cli {
    /// Settings file (defaults to `~/.tasksync/settings.json`).
    #[arg(long, env = "TASKSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Broker backend: `redis` or `memory` (overrides settings).
    #[arg(long)]
    broker: Option<String>,

    /// Redis URL (overrides settings).
    #[arg(long)]
    redis_url: Option<String>,

    /// Log filter directive (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut TaskSyncSettings) -> Result<()> {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(broker) = &self.broker {
            settings.broker.backend = tasksync_settings::loader::parse_backend(broker)
                .with_context(|| format!("unknown broker backend: {broker}"))?;
        }
        if let Some(url) = &self.redis_url {
            settings.broker.url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        Ok(())
    }
}

/// Broker and stores selected by the `broker.backend` setting.
struct Backends {
    broker: Arc<dyn Broker>,
    presence: Arc<dyn PresenceStore>,
    history: Arc<dyn HistoryStore>,
}

async fn build_backends(settings: &TaskSyncSettings) -> Backends {
    match settings.broker.backend {
        BrokerBackend::Memory => {
            tracing::info!("using in-process broker; fanout is limited to this node");
            memory_backends()
        }
        BrokerBackend::Redis => {
            let url = &settings.broker.url;
            match RedisStore::connect(url).await {
                Ok(store) => {
                    tracing::info!(url = %url, "redis store connected");
                    let store = Arc::new(store);
                    Backends {
                        broker: Arc::new(RedisBroker::new(url.clone())),
                        presence: store.clone(),
                        history: store,
                    }
                }
                Err(error) => {
                    tracing::warn!(url = %url, %error, "redis unavailable, presence and history stay local");
                    Backends {
                        broker: Arc::new(RedisBroker::new(url.clone())),
                        ..memory_backends()
                    }
                }
            }
        }
    }
}

fn memory_backends() -> Backends {
    Backends {
        broker: Arc::new(MemoryBroker::standalone()),
        presence: Arc::new(MemoryPresenceStore::new()),
        history: Arc::new(MemoryHistoryStore::new()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(tasksync_settings::settings_path);
    let mut settings = tasksync_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings)?;
    settings.validate().context("Invalid settings")?;

    tasksync_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let metrics = match tasksync_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(error) => {
            tracing::warn!(%error, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let backends = build_backends(&settings).await;
    let hub_config = HubConfig::from_settings(&settings);
    let hub = Arc::new(CollabHub::new(
        Arc::new(BroadcastBus::new(backends.broker)),
        backends.presence.clone(),
        backends.history,
        hub_config.clone(),
    ));

    let server_config = ServerConfig::from_settings(&settings.server);
    let mut router = EventRouter::new(server_config.handler_timeout());
    register_defaults(
        &mut router,
        Arc::new(EchoTaskEffects),
        backends.presence,
        hub_config.presence_ttl,
    );
    let message_types = router.message_types().len();

    let server = SyncServer::new(server_config, hub, router, metrics);
    let handle = server.start().await.context("Failed to bind server")?;
    tracing::info!(
        exclusion = hub_config.exclusion.as_str(),
        "tasksync node listening on ws://{} ({message_types} message types registered)",
        handle.addr
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let _ = server.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
