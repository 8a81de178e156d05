//! Client implementation.
//!
//! One TCP connection to the server, driven by two independent tasks:
//! - the send loop reports the local energy on a fixed period;
//! - the receive loop parses `StormPacket`s and publishes the newest one as
//!   the current `StormParameters`.
//!
//! Each loop blocks only on its own half of the socket. When one ends, the
//! other keeps running; there is no reconnect.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use storm_shared::{
    net::{decode_frame, encode_line, FrameReader, StormPacket},
    storm::{storm_channel, StormFeed, StormParameters, StormPublisher},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, trace, warn};

use crate::input::{build_packet, EnergySource};

/// Connected, not yet running client.
#[derive(Debug)]
pub struct StormClient {
    stream: TcpStream,
    peer: SocketAddr,
}

impl StormClient {
    /// Connects to the server. Not retried.
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        info!(server = %addr, "Connecting to storm server");
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect to storm server {addr}"))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let peer = stream.peer_addr().context("peer_addr")?;
        info!(%peer, "Connected to storm server");
        Ok(Self { stream, peer })
    }

    /// Splits the connection and starts both loops.
    pub fn spawn<E>(self, source: E, send_interval: Duration) -> ClientHandle
    where
        E: EnergySource + 'static,
    {
        let (reader, writer) = self.stream.into_split();
        let (publisher, storm) = storm_channel();
        let peer = self.peer;

        let send = tokio::spawn(async move {
            let result = send_loop(writer, source, send_interval).await;
            if let Err(e) = &result {
                warn!(%peer, error = %format!("{e:#}"), "Send loop stopped");
            }
            result
        });

        let receive = tokio::spawn(async move {
            let result = receive_loop(reader, publisher).await;
            match &result {
                Ok(()) => info!(%peer, "Server closed the connection"),
                Err(e) => warn!(%peer, error = %format!("{e:#}"), "Receive loop stopped"),
            }
            result
        });

        ClientHandle {
            peer,
            storm,
            send,
            receive,
        }
    }
}

/// Running client.
pub struct ClientHandle {
    peer: SocketAddr,
    storm: StormFeed,
    /// Ends only with an error: the send loop has no clean exit.
    send: JoinHandle<anyhow::Result<()>>,
    /// `Ok` when the server closed the stream, `Err` on a read failure.
    receive: JoinHandle<anyhow::Result<()>>,
}

impl ClientHandle {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Reader for the latest storm parameters.
    pub fn storm(&self) -> StormFeed {
        self.storm.clone()
    }

    pub fn current(&self) -> StormParameters {
        self.storm.current()
    }

    pub fn is_sending(&self) -> bool {
        !self.send.is_finished()
    }

    pub fn is_receiving(&self) -> bool {
        !self.receive.is_finished()
    }

    /// Waits for the receive loop to end. Call at most once.
    pub async fn join_receive(&mut self) -> anyhow::Result<()> {
        (&mut self.receive).await.context("receive loop task")?
    }

    /// Waits for the send loop to end. Call at most once.
    pub async fn join_send(&mut self) -> anyhow::Result<()> {
        (&mut self.send).await.context("send loop task")?
    }

    /// Stops both loops and drops the connection.
    pub fn abort(&self) {
        self.send.abort();
        self.receive.abort();
    }
}

/// Writes one `EnergyPacket` per `interval`. Returns only on write failure.
pub async fn send_loop<W, E>(mut writer: W, mut source: E, interval: Duration) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    E: EnergySource,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let pkt = build_packet(&mut source);
        let line = encode_line(&pkt)?;
        writer.write_all(&line).await.context("tcp write energy")?;
        writer.flush().await.context("tcp flush energy")?;
        trace!(energy = pkt.energy, "Energy sent");
    }
}

/// Publishes every parsed `StormPacket` until the stream ends.
///
/// Malformed frames are dropped. Returns `Ok` on a clean close.
pub async fn receive_loop<R>(reader: R, publisher: StormPublisher) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameReader::new(reader);
    while let Some(frame) = frames.next_frame().await? {
        match decode_frame::<StormPacket>(&frame) {
            Ok(pkt) => {
                let params = StormParameters::from(pkt);
                publisher.publish(params);
                trace!(intensity = params.intensity(), wind = ?params.wind(), "Storm updated");
            }
            Err(e) => debug!(error = %e, "Dropped malformed storm frame"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use storm_shared::math::Vec3;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    use super::*;
    use crate::input::ConstantEnergy;

    #[tokio::test]
    async fn receive_loop_publishes_latest_and_skips_garbage() {
        let (mut server, client) = duplex(1024);
        let (publisher, feed) = storm_channel();

        server
            .write_all(
                b"{\"intensity\":0.25,\"windDir\":[0.5,0.0,0.5]}\n\
                  garbage\n\
                  {\"intensity\":2.0,\"windDir\":[0.1,0.0,0.9]}\n",
            )
            .await
            .unwrap();
        drop(server);

        receive_loop(client, publisher).await.unwrap();

        let params = feed.current();
        assert_eq!(params.intensity(), 1.0);
        assert_eq!(params.wind(), Vec3::new(0.1, 0.0, 0.9));
    }

    #[tokio::test]
    async fn send_loop_reports_on_each_tick() {
        let (writer, reader) = duplex(1024);
        let mut readings = [0.0f32, 0.2, 1.0].into_iter().cycle();
        let task = tokio::spawn(send_loop(
            writer,
            move || readings.next().unwrap_or_default(),
            Duration::from_millis(10),
        ));

        let mut lines = BufReader::new(reader).lines();
        let mut energies = Vec::new();
        for _ in 0..3 {
            let line = lines.next_line().await.unwrap().expect("energy line");
            let pkt: storm_shared::net::EnergyPacket = decode_frame(line.as_bytes()).unwrap();
            energies.push(pkt.energy);
        }
        assert_eq!(energies, vec![0.0, 0.2, 1.0]);

        drop(lines);
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("send loop should fail once the peer is gone")
            .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn join_send_reports_write_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let client = StormClient::connect(&addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();

        let mut handle = client.spawn(ConstantEnergy(0.7), Duration::from_millis(5));
        drop(server_side);

        let result = tokio::time::timeout(Duration::from_secs(5), handle.join_send())
            .await
            .expect("send loop should stop once the server is gone");
        assert!(result.is_err());
        assert!(!handle.is_sending());
        handle.abort();
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = StormClient::connect(&addr).await.unwrap_err();
        assert!(format!("{err:#}").contains("connect to storm server"));
    }
}
