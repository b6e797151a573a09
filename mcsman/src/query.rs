//! Live player-count queries against a running server's status port.
//!
//! The game protocol answers a short handshake + status exchange with a
//! JSON payload that includes the online player count. One query is one
//! short-lived connection; the Activity Poller and Backup Coordinator only
//! care about the count.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[async_trait]
pub trait PlayerCount: Send + Sync {
    /// Number of players currently online on the server at `port`.
    async fn online(&self, port: u16) -> Result<u32>;
}

/// [`PlayerCount`] speaking the game's status-query protocol.
pub struct StatusPing {
    host: String,
    timeout: Duration,
}

impl StatusPing {
    pub fn new(host: impl Into<String>) -> Self {
        StatusPing {
            host: host.into(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Deserialize)]
struct StatusResponse {
    players: PlayersSection,
}

#[derive(Deserialize)]
struct PlayersSection {
    online: u32,
}

#[async_trait]
impl PlayerCount for StatusPing {
    async fn online(&self, port: u16) -> Result<u32> {
        let payload = tokio::time::timeout(self.timeout, self.exchange(port))
            .await
            .map_err(|_| anyhow::anyhow!("status query to port {port} timed out"))??;
        let status: StatusResponse =
            serde_json::from_str(&payload).context("parsing status payload")?;
        Ok(status.players.online)
    }
}

impl StatusPing {
    async fn exchange(&self, port: u16) -> Result<String> {
        let mut stream = TcpStream::connect((self.host.as_str(), port))
            .await
            .with_context(|| format!("connecting to {}:{port}", self.host))?;

        // Handshake: protocol version -1 (status), host, port, next state 1.
        let mut handshake = Vec::new();
        write_varint(&mut handshake, 0x00);
        write_varint(&mut handshake, -1);
        write_varint(&mut handshake, self.host.len() as i32);
        handshake.extend_from_slice(self.host.as_bytes());
        handshake.extend_from_slice(&port.to_be_bytes());
        write_varint(&mut handshake, 1);
        write_packet(&mut stream, &handshake).await?;

        // Status request is an empty packet with id 0.
        write_packet(&mut stream, &[0x00]).await?;

        // Response: packet id 0, then a length-prefixed JSON string.
        let packet = read_packet(&mut stream).await?;
        let mut cursor = &packet[..];
        let id = read_varint(&mut cursor)?;
        if id != 0x00 {
            bail!("unexpected status packet id {id}");
        }
        let len = read_varint(&mut cursor)? as usize;
        if cursor.len() < len {
            bail!("truncated status payload");
        }
        Ok(String::from_utf8_lossy(&cursor[..len]).into_owned())
    }
}

async fn write_packet(stream: &mut TcpStream, body: &[u8]) -> Result<()> {
    let mut framed = Vec::with_capacity(body.len() + 5);
    write_varint(&mut framed, body.len() as i32);
    framed.extend_from_slice(body);
    stream.write_all(&framed).await.context("writing packet")?;
    Ok(())
}

async fn read_packet(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let len = read_varint_async(stream).await? as usize;
    if len > 1 << 21 {
        bail!("status packet too large: {len} bytes");
    }
    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .await
        .context("reading packet body")?;
    Ok(body)
}

fn write_varint(out: &mut Vec<u8>, value: i32) {
    let mut remaining = value as u32;
    loop {
        let byte = (remaining & 0x7F) as u8;
        remaining >>= 7;
        if remaining == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(input: &mut &[u8]) -> Result<i32> {
    let mut value: u32 = 0;
    for shift in 0..5 {
        let Some((&byte, rest)) = input.split_first() else {
            bail!("truncated varint");
        };
        *input = rest;
        value |= u32::from(byte & 0x7F) << (7 * shift);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    bail!("varint too long")
}

async fn read_varint_async(stream: &mut TcpStream) -> Result<i32> {
    let mut value: u32 = 0;
    for shift in 0..5 {
        let byte = stream.read_u8().await.context("reading varint")?;
        value |= u32::from(byte & 0x7F) << (7 * shift);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    bail!("varint too long")
}
