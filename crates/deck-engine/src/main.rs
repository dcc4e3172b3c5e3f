use deck_engine::backend::BackendTable;
use deck_engine::{event_channel, logging, socket, BroadcastMessage, Engine};
use deck_proto::config::Config;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so the log layer can use it.
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let log_path = logging::init(broadcast_tx.clone())?;
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let missing = BackendTable::new(config.backends.clone()).missing_programs();
    if !missing.is_empty() {
        warn!("missing backend programs: {}", missing.join(", "));
    }

    let (events_tx, events_rx) = event_channel();
    let engine = Engine::new(config.clone(), events_tx, broadcast_tx);
    let handle = engine.handle();

    if config.control.enabled {
        let listener = socket::bind(&config.control.bind_address, config.control.port).await?;
        let _socket_handle = socket::serve(listener, handle.clone());
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            handle.shutdown();
        }
    });

    info!("Engine initialised, running event loop");
    engine.run(events_rx).await
}
