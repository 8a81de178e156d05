//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p storm_client -- [--config client.json] [--addr 127.0.0.1:8000]
//!       [--particles 5000] [--tick-hz 60] [--send-ms 500] [--seed 42]
//!
//! The client connects to the server, reports its energy, and runs the
//! particle storm using the latest parameters the server broadcast.
//!
//! Console commands:
//!   press    - Report high energy (input held)
//!   release  - Report low energy (input released)
//!   status   - Show storm and particle status
//!   quit     - Exit client

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use rand::{rngs::StdRng, SeedableRng};
use storm_client::client::StormClient;
use storm_client::input::SwitchEnergy;
use storm_shared::config::ClientConfig;
use storm_shared::particles::ParticleSimulation;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

fn parse_args() -> anyhow::Result<ClientConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => ClientConfig::from_file(&args[i + 1])?,
        _ => ClientConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--particles" if i + 1 < args.len() => {
                cfg.particle_count = args[i + 1].parse().unwrap_or(cfg.particle_count);
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(cfg.tick_hz);
                i += 2;
            }
            "--send-ms" if i + 1 < args.len() => {
                cfg.send_interval_ms = args[i + 1].parse().unwrap_or(cfg.send_interval_ms);
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
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, particles = cfg.particle_count, tick_hz = cfg.tick_hz, "Starting client");

    let client = StormClient::connect(&cfg.server_addr)
        .await
        .context("connect")?;

    let (source, switch) = SwitchEnergy::new();
    let mut handle = client.spawn(source, cfg.send_interval());
    let storm = handle.storm();
    // Fails once the receive loop ends and drops its publisher.
    let mut updates = handle.storm();

    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut sim = ParticleSimulation::new(cfg.particle_count, cfg.chunk_size, &mut rng);

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

    println!("Client connected. Type 'press'/'release' to change energy, 'status' for info, 'quit' to exit.");
    println!();

    let mut ticker = tokio::time::interval(cfg.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let log_every = u64::from(cfg.tick_hz.max(1)) * 5;
    let mut last = Instant::now();
    let mut tick: u64 = 0;
    let mut receive_ended = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = (now - last).as_secs_f32();
                last = now;

                let params = storm.current();
                sim.step(dt, &params);
                tick += 1;

                if tick % log_every == 0 {
                    let stats = sim.stats();
                    info!(
                        tick,
                        intensity = params.intensity(),
                        wind = ?params.wind(),
                        mean_radius = stats.mean_radius,
                        max_radius = stats.max_radius,
                        "Storm"
                    );
                }
            }
            Some(line) = console_rx.recv() => match line.as_str() {
                "press" => switch.set_pressed(true),
                "release" => switch.set_pressed(false),
                "status" => {
                    let params = storm.current();
                    let stats = sim.stats();
                    println!("Server: {}", handle.peer());
                    println!("Energy input: {}", if switch.is_pressed() { "pressed" } else { "released" });
                    println!("Intensity: {:.3}  Wind: ({:.3}, {:.3}, {:.3})", params.intensity(), params.wind().x, params.wind().y, params.wind().z);
                    println!("Particles: {}  mean r={:.2}  max r={:.2}  outside={}", sim.len(), stats.mean_radius, stats.max_radius, stats.outside);
                    println!("Send loop running: {}", handle.is_sending());
                }
                "quit" | "exit" => break,
                other => println!("Unknown command: {other}"),
            },
            changed = updates.changed() => {
                if changed.is_err() {
                    receive_ended = true;
                    break;
                }
            }
        }
    }

    if receive_ended {
        match handle.join_receive().await {
            Ok(()) => println!("Disconnected from server."),
            Err(e) => println!("Connection lost: {e:#}"),
        }
    }

    handle.abort();
    info!(ticks = tick, "Client stopped");
    Ok(())
}
