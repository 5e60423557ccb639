//! Stack Arena Server
//!
//! Runs the WebSocket server, the ranked matchmaking loop and the bot
//! roster until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use stack_arena::{
    bot::{BotConfig, BotManager, HeuristicEvaluator},
    core::env_parse,
    matchmaking::MatchmakingConfig,
    network::{AuthConfig, GameServer, ServerConfig},
    room::GeneratedPuzzleSource,
    InMemoryUserStore, RoomConfig, ServerContext, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Stack Arena Server v{}", VERSION);

    let server_config = ServerConfig::from_env();
    let auth = AuthConfig::from_env();
    if !auth.is_configured() {
        warn!("No auth key configured, every connection plays as a guest");
    }
    let matchmaking = MatchmakingConfig::from_env();
    let room_config = RoomConfig::from_env();
    let bot_config = BotConfig::from_env();
    let puzzle_set_size = env_parse("PUZZLE_SET_SIZE").unwrap_or(100);

    let ctx = Arc::new(ServerContext::new(
        Arc::new(InMemoryUserStore::new()),
        Arc::new(GeneratedPuzzleSource::new(puzzle_set_size)),
        room_config,
        matchmaking,
    ));

    let server = Arc::new(GameServer::new(server_config, auth, Arc::clone(&ctx)));
    let shutdown = server.shutdown_sender();

    let matchmaking_task = ctx.spawn_matchmaking(shutdown.subscribe());
    let bots = BotManager::new(Arc::clone(&ctx), bot_config, Arc::new(HeuristicEvaluator));
    let bot_tasks = bots.spawn_all(&shutdown).await;

    let running = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { running.run().await });

    let outcome = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            result.context("Failed to listen for Ctrl-C")
        }
        // The server only returns on its own if binding failed
        result = &mut server_task => match result {
            Ok(served) => served.context("Server stopped"),
            Err(join) => Err(join).context("Server task panicked"),
        },
    };

    ctx.shutdown("Server shutting down").await;
    server.shutdown();
    for task in bot_tasks {
        let _ = task.await;
    }
    let _ = matchmaking_task.await;
    outcome?;
    info!("Shutdown complete");
    Ok(())
}
