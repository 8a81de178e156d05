//! Server implementation.
//!
//! Three kinds of task run concurrently:
//! - the accept loop, which registers each new connection and spawns its
//!   session handler into a tracked task set;
//! - one handler per session, which reads `EnergyPacket`s and records the
//!   latest energy;
//! - the broadcast loop, which aggregates energies into a `StormPacket` on a
//!   fixed period and writes it to every live session.
//!
//! Any I/O failure on a session removes and closes that session only. A
//! malformed frame is dropped and the session keeps going.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use rand::Rng;
use storm_shared::{
    config::ServerConfig,
    net::{decode_frame, encode_line, EnergyPacket, FrameReader, SessionId},
    storm::StormParameters,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::watch,
    task::{JoinHandle, JoinSet},
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    registry::{Registry, SessionTicket},
    weather::StormGenerator,
};

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Storm aggregation server, bound but not yet running.
pub struct StormServer {
    cfg: ServerConfig,
    listener: TcpListener,
    registry: Arc<Registry>,
    generator: StormGenerator,
}

impl StormServer {
    /// Binds the listener on `cfg.listen_addr`.
    pub async fn bind(cfg: ServerConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&cfg.listen_addr)
            .await
            .with_context(|| format!("tcp bind {}", cfg.listen_addr))?;
        let generator = StormGenerator::from_config(&cfg);
        Ok(Self {
            cfg,
            listener,
            registry: Arc::new(Registry::new()),
            generator,
        })
    }

    /// Replaces the random source used for jitter and wind.
    pub fn with_generator(mut self, generator: StormGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Starts the accept and broadcast loops as tracked tasks.
    pub fn spawn(self) -> anyhow::Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            %local_addr,
            interval_ms = self.cfg.broadcast_interval_ms,
            "Storm server running"
        );

        let accept = tokio::spawn(accept_loop(
            self.listener,
            self.registry.clone(),
            shutdown_rx.clone(),
        ));
        let broadcast = tokio::spawn(broadcast_loop(
            self.registry.clone(),
            self.generator,
            self.cfg.broadcast_interval(),
            self.cfg.write_timeout(),
            shutdown_rx,
        ));

        Ok(ServerHandle {
            local_addr,
            registry: self.registry,
            shutdown_tx,
            accept,
            broadcast,
        })
    }

    /// Runs until the process ends.
    pub async fn run(self) -> anyhow::Result<()> {
        self.spawn()?.join().await
    }
}

/// Running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown_tx: watch::Sender<bool>,
    accept: JoinHandle<()>,
    broadcast: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Stops both loops, closes every session and waits for the tasks.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.shutdown_tx.send_replace(true);
        self.join().await
    }

    /// Waits for both loops to end.
    pub async fn join(self) -> anyhow::Result<()> {
        let Self {
            shutdown_tx,
            accept,
            broadcast,
            ..
        } = self;
        let accepted = accept.await;
        let broadcasted = broadcast.await;
        drop(shutdown_tx);
        accepted.context("accept loop task")?;
        broadcasted.context("broadcast loop task")?;
        Ok(())
    }
}

/// Outcome of writing one packet to every session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOut {
    pub delivered: Vec<SessionId>,
    pub dropped: Vec<SessionId>,
}

/// One broadcast tick.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastReport {
    pub storm: StormParameters,
    pub fan_out: FanOut,
}

/// Resolves once shutdown is requested. A dropped sender means "never".
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    let (reader, writer) = stream.into_split();
                    let ticket = registry.register(peer, writer);
                    info!(session = %ticket.id, %peer, sessions = registry.len(), "Session connected");
                    sessions.spawn(handle_session(registry.clone(), ticket, reader));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(joined) = sessions.join_next() => {
                if let Err(e) = joined {
                    error!(error = %e, "Session task ended abnormally");
                }
            }
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }

    let closed = registry.clear();
    sessions.shutdown().await;
    info!(closed, "Accept loop stopped");
}

/// Removes the session however its handler ends, including by panic.
struct RemoveOnDrop<'a, W> {
    registry: &'a Registry<W>,
    id: SessionId,
}

impl<W> Drop for RemoveOnDrop<'_, W> {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

enum SessionEnd {
    PeerClosed,
    Removed,
    Failed(anyhow::Error),
}

/// Reads energy frames for one session until it closes, fails or is removed.
pub async fn handle_session<R, W>(registry: Arc<Registry<W>>, ticket: SessionTicket, reader: R)
where
    R: AsyncRead + Unpin,
{
    let id = ticket.id;
    let _guard = RemoveOnDrop {
        registry: &registry,
        id,
    };
    let mut frames = FrameReader::new(reader);

    let end = loop {
        let frame = tokio::select! {
            frame = frames.next_frame() => frame,
            _ = ticket.closed() => break SessionEnd::Removed,
        };

        match frame {
            Ok(Some(frame)) => match decode_frame::<EnergyPacket>(&frame) {
                Ok(pkt) if pkt.energy.is_finite() => {
                    if !registry.set_energy(id, pkt.energy) {
                        break SessionEnd::Removed;
                    }
                    trace!(session = %id, energy = pkt.energy, "Energy updated");
                }
                Ok(pkt) => debug!(session = %id, energy = pkt.energy, "Dropped non-finite energy"),
                Err(e) => debug!(session = %id, error = %e, "Dropped malformed frame"),
            },
            Ok(None) => break SessionEnd::PeerClosed,
            Err(e) => break SessionEnd::Failed(e),
        }
    };

    match end {
        SessionEnd::PeerClosed => info!(session = %id, "Session closed by peer"),
        SessionEnd::Removed => info!(session = %id, "Session removed"),
        SessionEnd::Failed(e) => warn!(session = %id, error = %format!("{e:#}"), "Session read failed"),
    }
}

async fn broadcast_loop(
    registry: Arc<Registry>,
    mut generator: StormGenerator,
    interval: Duration,
    write_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wait_for_shutdown(&mut shutdown) => break,
        }

        match broadcast_once(&registry, &mut generator, write_timeout).await {
            Ok(report) => debug!(
                tick,
                intensity = report.storm.intensity(),
                delivered = report.fan_out.delivered.len(),
                dropped = report.fan_out.dropped.len(),
                "Broadcast"
            ),
            Err(e) => warn!(tick, error = %format!("{e:#}"), "Broadcast tick failed"),
        }
        tick += 1;
    }

    info!(ticks = tick, "Broadcast loop stopped");
}

/// Aggregates current energies and writes the resulting packet to everyone.
pub async fn broadcast_once<W, R>(
    registry: &Registry<W>,
    generator: &mut StormGenerator<R>,
    write_timeout: Duration,
) -> anyhow::Result<BroadcastReport>
where
    W: AsyncWrite + Unpin + Send,
    R: Rng,
{
    let storm = generator.next_storm(&registry.energies());
    let line = encode_line(&storm.to_packet()).context("encode storm packet")?;
    let fan_out = fan_out(registry, &line, write_timeout).await;
    Ok(BroadcastReport { storm, fan_out })
}

/// Writes `line` to every session in a point-in-time snapshot.
///
/// Sessions removed after the snapshot are skipped. A session whose write
/// fails or times out is removed; the rest still get the packet.
pub async fn fan_out<W>(registry: &Registry<W>, line: &[u8], write_timeout: Duration) -> FanOut
where
    W: AsyncWrite + Unpin + Send,
{
    let mut out = FanOut::default();

    for (id, writer) in registry.snapshot() {
        if !registry.contains(id) {
            continue;
        }

        let written = tokio::time::timeout(write_timeout, async {
            let mut w = writer.lock().await;
            w.write_all(line).await?;
            w.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => out.delivered.push(id),
            Ok(Err(e)) => {
                warn!(session = %id, error = %e, "Broadcast write failed, dropping session");
                registry.remove(id);
                out.dropped.push(id);
            }
            Err(_) => {
                warn!(session = %id, timeout_ms = write_timeout.as_millis() as u64, "Broadcast write timed out, dropping session");
                registry.remove(id);
                out.dropped.push(id);
            }
        }
    }

    out
}

/// Helper for tests: bind to an ephemeral localhost port.
pub async fn bind_ephemeral(cfg: ServerConfig) -> anyhow::Result<StormServer> {
    let cfg = ServerConfig {
        listen_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        ..cfg
    };
    StormServer::bind(cfg).await
}
