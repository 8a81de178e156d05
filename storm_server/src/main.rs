//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p storm_server -- [--config server.json] [--addr 0.0.0.0:8000]
//!       [--interval-ms 1000] [--jitter 0.2] [--seed 42]
//!
//! The server accepts client connections, records each client's energy and
//! broadcasts storm parameters to every client once per interval.
//!
//! Console commands:
//!   status  - List sessions and their energies
//!   quit    - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use storm_server::server::StormServer;
use storm_shared::config::ServerConfig;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => ServerConfig::from_file(&args[i + 1])?,
        _ => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.listen_addr = args[i + 1].clone();
                i += 2;
            }
            "--interval-ms" if i + 1 < args.len() => {
                cfg.broadcast_interval_ms = args[i + 1].parse().unwrap_or(cfg.broadcast_interval_ms);
                i += 2;
            }
            "--jitter" if i + 1 < args.len() => {
                cfg.jitter_max = args[i + 1].parse().unwrap_or(cfg.jitter_max);
                i += 2;
            }
            "--seed" if i + 1 < args.len() => {
                cfg.seed = args[i + 1].parse().ok();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.listen_addr, interval_ms = cfg.broadcast_interval_ms, seed = ?cfg.seed, "Starting server");

    let server = StormServer::bind(cfg).await.context("create server")?;
    let handle = server.spawn()?;
    info!(local = %handle.local_addr(), "Server listening");

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for sessions, 'quit' to exit.");
    println!();

    let mut quit = false;
    while let Some(line) = console_rx.recv().await {
        match line.as_str() {
            "status" => {
                let sessions = handle.registry().sessions();
                println!("Sessions: {}", sessions.len());
                for s in sessions {
                    println!("  {}: peer={} energy={:.3}", s.id, s.peer, s.energy);
                }
            }
            "quit" | "exit" => {
                quit = true;
                break;
            }
            other => println!("Unknown command: {other}"),
        }
    }

    // Without a console (stdin closed) the server keeps running.
    if !quit {
        return handle.join().await;
    }

    info!("Server shutting down");
    if let Err(e) = handle.shutdown().await {
        warn!(error = %format!("{e:#}"), "Shutdown did not complete cleanly");
    }
    Ok(())
}
