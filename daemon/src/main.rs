use anyhow::Result;
use procwatch_daemon::{
    broadcaster::SubscriberHub,
    config::Config,
    handler::MonitorService,
    socket::{handle_client, SocketServer},
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("procwatch daemon starting...");

    let config_path = Config::config_path();
    let config = if config_path.exists() {
        Config::load(&config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        info!("No config file found, using defaults");
        Config::default()
    };

    let socket_path = config.socket.path.clone().unwrap_or_else(SocketServer::socket_path);
    let server = SocketServer::bind(&socket_path).await?;

    let hub = Arc::new(SubscriberHub::default());
    let state = Arc::new(MonitorService::from_config(&config, hub.clone()));
    state.monitor.set_filter(config.filter.commands.clone()).await;
    state.monitor.start(config.sample_delay()).await;

    info!("Daemon ready, listening for connections...");

    loop {
        match server.accept().await {
            Ok(stream) => {
                let state = Arc::clone(&state);
                let subscription = hub.register();
                let id = subscription.id;
                info!("Subscriber {} connected", id);
                tokio::spawn(async move {
                    let sync_state = Arc::clone(&state);
                    tokio::spawn(async move {
                        sync_state.monitor.handle_new_subscriber(id).await;
                    });
                    handle_client(stream, subscription, Arc::clone(&state)).await;
                    state.hub.unregister(id);
                    info!("Subscriber {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
