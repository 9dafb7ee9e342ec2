//! Standalone player client binary.
//!
//! Usage:
//!   cargo run -p matrix_client -- [--addr 127.0.0.1:4321] [--name P1]
//!
//! Connects to the display host, binds the player name, then forwards
//! stdin to the game. Steering uses the arrow keys; z/s/q/d boost.

use std::env;

use anyhow::Context;
use matrix_client::client::{stdin_bytes, GameClient};
use tracing::info;

struct Args {
    addr: String,
    name: String,
}

fn parse_args() -> Args {
    let mut parsed = Args {
        addr: "127.0.0.1:4321".to_string(),
        name: "P1".to_string(),
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                parsed.addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                parsed.name = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    parsed
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    info!(addr = %args.addr, name = %args.name, "Connecting");

    let client = GameClient::connect(&args.addr, &args.name)
        .await
        .context("handshake")?;
    info!(player = client.name(), "Connected; forwarding input (Ctrl-D to quit)");

    client.pump_input(stdin_bytes()).await
}
