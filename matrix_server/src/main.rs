//! Standalone display-host binary.
//!
//! Usage:
//!   cargo run -p matrix_server -- [--addr 0.0.0.0:4321] [--program pong]
//!
//! The host owns one pixel surface and runs a single display program at a
//! time. Players connect over TCP and bind a player name; the running game
//! reads their input once per frame.
//!
//! Console commands:
//!   <program>   - Switch to that program (pong, slither, 2048, idle)
//!   programs    - List available programs
//!   quit        - Shut down the host

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use matrix_server::supervisor::{program_names, shared_sink, ProgramHost};
use matrix_shared::config::MatrixConfig;
use matrix_shared::render::PixelGrid;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn parse_args() -> MatrixConfig {
    let mut cfg = MatrixConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.listen_addr = args[i + 1].clone();
                i += 2;
            }
            "--program" if i + 1 < args.len() => {
                cfg.default_program = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.listen_addr, program = %cfg.default_program, "Starting display host");

    let sink = shared_sink(Box::new(PixelGrid::new(cfg.board_size)));
    let mut host = ProgramHost::new(cfg.clone(), sink);
    host.switch(&cfg.default_program)
        .context("start default program")?;

    // Console input channel fed by a blocking stdin thread.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!(
        "Host ready. Type a program name to switch ({}), 'programs' to list, 'quit' to exit.",
        program_names().join(", ")
    );
    println!();

    while let Some(line) = console_rx.recv().await {
        match line.as_str() {
            "quit" | "exit" => {
                info!("Shutting down");
                break;
            }
            "programs" => {
                println!("programs: {}", program_names().join(", "));
            }
            name => match host.switch(name) {
                Ok(_) => {}
                Err(e) => warn!(program = name, error = %e, "switch failed"),
            },
        }
    }
    Ok(())
}
