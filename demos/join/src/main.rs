//! Join a space on a host and log what happens.
//!
//! Uses a null media device, so the handshake completes without any real
//! media stack. Ctrl-C leaves the space and closes cleanly.
//!
//!   cargo run -p hostlink-demo-join -- --host localhost:4000 --name Alice

use std::time::Duration;

use hostlink_client::{
    EngineHandle, NullDevice, ReconnectPolicy, SessionConfig, SessionHandle, SessionStore,
    run_session,
};
use hostlink_core::{ConnectionStatus, RequestMessage};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("hostlink_demo_join=info".parse()?)
                .add_directive("hostlink_client=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let host = parse_arg(&args, "--host").unwrap_or_else(|| "localhost:4000".to_string());
    let space = parse_arg(&args, "--space").unwrap_or_else(|| "demo:lobby".to_string());
    let name = parse_arg(&args, "--name").unwrap_or_else(|| "Wanderer".to_string());

    let mut store = SessionStore::new();
    store.set_name(&name);
    let store = store.into_shared();

    let config = SessionConfig::new(&host, &space).with_reconnect(ReconnectPolicy::backoff());
    let (engine, _grounded) = EngineHandle::null();
    let handle = SessionHandle::new();

    tracing::info!("Joining {} on {} as {}", space, host, name);

    let session = run_session(config, store.clone(), NullDevice::default(), engine, &handle);
    tokio::pin!(session);

    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    let mut greeted = false;

    loop {
        tokio::select! {
            result = &mut session => {
                result?;
                break;
            }

            _ = ticker.tick() => {
                let snapshot = store.read().await.snapshot();
                tracing::info!(
                    status = ?snapshot.status,
                    player = ?snapshot.player_id,
                    peers = snapshot.peers.len(),
                    chat = snapshot.chat.len(),
                    "session",
                );
                if snapshot.status == ConnectionStatus::Connected && !greeted {
                    handle.send(RequestMessage::Chat(format!("{name} says hello")));
                    greeted = true;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                handle.disconnect();
            }
        }
    }

    Ok(())
}

fn parse_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
