use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use session_core::{Session, SessionConfig, SessionEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Connects one session and prints what it sees until it disconnects.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "session.toml")]
    config: PathBuf,
    /// Session token to register with, overriding the config file.
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    device_token: Option<String>,
    /// Disconnect as soon as the session is connected.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut config = SessionConfig::load(&args.config)?;
    if let Some(token) = args.token {
        config = config.with_session_token(token);
    }
    if let Some(device_token) = args.device_token {
        config.device_token = device_token;
    }
    info!(server = %config.server, "probe: connecting");

    let session = Session::new(config)?;
    let mut events = session.subscribe_events();
    session.connect().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Connected) => {
                    println!(
                        "connected: {} contacts, {} rooms, {} conversations, {} meetings",
                        session.contacts().await.len(),
                        session.rooms().await.len(),
                        session.conversations().await.len(),
                        session.meetings().await.len(),
                    );
                    if args.once {
                        session.disconnect().await;
                    }
                }
                Ok(SessionEvent::Disconnected { error: Some(err) }) => bail!("session failed: {err}"),
                Ok(SessionEvent::Disconnected { error: None }) => {
                    println!("disconnected");
                    return Ok(());
                }
                Ok(event) => println!("{event:?}"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "probe: event stream lagged"),
                Err(RecvError::Closed) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("probe: interrupted, disconnecting");
                session.disconnect().await;
            }
        }
    }
}
