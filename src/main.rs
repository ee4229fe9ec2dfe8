//! Manhunt client demo binary.
//!
//! Connects to a server, walks the lobby flow once, and logs what happens.
//! Configuration comes from `MANHUNT_HOST`, `MANHUNT_TCP_PORT` and
//! `MANHUNT_UDP_PORT`; log verbosity from `RUST_LOG`.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use manhunt::{Session, SessionConfig};

fn config_from_env() -> Result<SessionConfig> {
    let mut config = SessionConfig::default();
    if let Ok(host) = std::env::var("MANHUNT_HOST") {
        config.host = host;
    }
    if let Ok(port) = std::env::var("MANHUNT_TCP_PORT") {
        config.tcp_port = port.parse().context("MANHUNT_TCP_PORT must be a port")?;
    }
    if let Ok(port) = std::env::var("MANHUNT_UDP_PORT") {
        config.udp_port = port.parse().context("MANHUNT_UDP_PORT must be a port")?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "manhunt=info".into()),
        )
        .init();

    info!(version = manhunt::VERSION, "manhunt client starting");

    let config = config_from_env()?;
    info!(host = %config.host, tcp = config.tcp_port, udp = config.udp_port, "connecting");

    let mut session = Session::new(config);
    let player = session.login().await.context("login failed")?;
    info!(player = %player, "authenticated");

    let lobbies = session.lobbies().await.context("lobby listing failed")?;
    info!(count = lobbies.len(), "open lobbies");

    match session.create_lobby().await.context("create lobby failed")? {
        Some(lobby) => {
            info!(lobby = lobby.id, "lobby created, waiting for players");
            // Pump broadcasts for a little while, then wind down.
            for _ in 0..50 {
                for note in session.pump_events().await? {
                    info!(?note, "event");
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            session.leave_lobby().await.context("leave failed")?;
        }
        None => info!("server refused to create a lobby"),
    }

    session.logout().await;
    info!("done");
    Ok(())
}
