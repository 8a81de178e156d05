//! Wire protocol.
//!
//! Newline-delimited UTF-8 JSON over TCP, one object per line:
//! - client -> server: `{"energy":0.2}`
//! - server -> client: `{"intensity":0.5,"windDir":[0.3,0.0,0.7]}`
//!
//! There is no handshake, no versioning field and no close message.
//! Disconnection is inferred from the stream (EOF, reset, write failure).

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Port the server listens on in the default deployment.
pub const DEFAULT_PORT: u16 = 8000;

/// Longest accepted line, excluding the terminating newline.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle for one accepted connection. Never reissued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn new_unique() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Client -> server: the client's current energy reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyPacket {
    pub energy: f32,
}

/// Server -> client: aggregated storm parameters for one broadcast tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StormPacket {
    pub intensity: f32,
    #[serde(rename = "windDir")]
    pub wind_dir: [f32; 3],
}

/// Serializes one message and terminates it with `\n`.
pub fn encode_line<T: Serialize>(msg: &T) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize frame")?;
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.extend_from_slice(&payload);
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

/// Parses one frame. Callers treat an error here as a malformed frame.
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(frame).context("deserialize frame")
}

/// Splits a byte stream into newline-terminated frames.
///
/// TCP reads may merge several frames or split one frame across reads;
/// the reader buffers until a full line is available.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            line: Vec::new(),
        }
    }

    /// Returns the next non-empty frame without its line terminator.
    ///
    /// `Ok(None)` means the peer closed the stream cleanly. Bytes left after
    /// the last newline at EOF are returned as a final frame.
    pub async fn next_frame(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        let limit = MAX_FRAME_LEN as u64 + 1;
        loop {
            self.line.clear();
            let n = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.line)
                .await
                .context("tcp read")?;
            if n == 0 {
                return Ok(None);
            }

            let terminated = self.line.last() == Some(&b'\n');
            if !terminated && n as u64 >= limit {
                anyhow::bail!("frame exceeds {MAX_FRAME_LEN} bytes");
            }
            if terminated {
                self.line.pop();
            }
            if self.line.last() == Some(&b'\r') {
                self.line.pop();
            }
            if self.line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(std::mem::take(&mut self.line)));
        }
    }
}
