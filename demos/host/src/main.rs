//! Toy multiplayer host.
//!
//! Speaks just enough of the hostlink protocol to exercise a client: join
//! handling, canned router capabilities, transport creation, chat and
//! roster fan-out. Media packets never flow; this is a signaling host.
//!
//! Run it, then join with the client demo:
//!   cargo run -p hostlink-demo-host -- --port 4000
//!   cargo run -p hostlink-demo-join -- --host localhost:4000

mod server;

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("hostlink_demo_host=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port = parse_arg(&args, "--port").unwrap_or(4000);

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    tracing::info!("Starting host on {}", addr);

    server::run(addr).await
}

fn parse_arg(args: &[String], flag: &str) -> Option<u16> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
