use vehicle_server::config::ServerConfig;
use vehicle_server::game::GameWorld;
use vehicle_server::net::start_websocket_server;
use vehicle_server::state::SharedGameState;

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(addr = %config.bind_addr, tick_rate = config.tick_rate, "starting vehicle server");

    let state = Arc::new(Mutex::new(SharedGameState::new()));

    // Start WebSocket server
    let server = tokio::spawn(start_websocket_server(
        Arc::clone(&state),
        config.bind_addr.clone(),
    ));

    // The simulation is not Send; it stays on this task.
    let mut ticker = interval(Duration::from_secs_f32(config.tick_dt()));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut game = GameWorld::new(config);

    loop {
        ticker.tick().await;

        if server.is_finished() {
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(%err, "websocket server stopped"),
                Err(err) => error!(%err, "websocket server panicked"),
            }
            anyhow::bail!("websocket server exited");
        }

        let inputs = state.lock().await.take_inputs();
        let snapshot = game.tick(inputs);
        state.lock().await.broadcast_snapshot(&snapshot)?;
    }
}
