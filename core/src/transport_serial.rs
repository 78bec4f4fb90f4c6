//! Fallback transport (component I): a byte-stream transport for links with
//! no WebSocket framing of their own (serial/Bluetooth-classic style
//! connections). Generalized to any `AsyncRead + AsyncWrite` so the same
//! code backs a real serial port or, in tests, a plain TCP loopback pair —
//! adapted from the teacher's `Connection`/`Transport` trait split in
//! `core/src/transport.rs`, which drew the same line between "the wire
//! abstraction" and "what concretely implements it".
//!
//! The underlying stream gives no message boundaries, so each write is
//! length-prefixed (`u32` big-endian) before the payload — "1:1 framing"
//! means one `send()` call produces exactly one frame on the wire and one
//! `recv()` call returns exactly one frame back, never partial or coalesced
//! payloads. Content-type restrictions (image/file frames are fallback-only
//! over this transport, and even then are a sync-engine decision) are
//! enforced by the caller (component J), not here.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::transport::TextConnection;

/// Reads fill a buffer of at least this size per syscall; frames longer than
/// a single read are reassembled across reads, never truncated.
pub const RECV_CHUNK_LEN: usize = 1024;

/// A `TextConnection` over any duplex byte stream, length-prefixed framing.
pub struct SerialConnection<S> {
    write_half: Mutex<tokio::io::WriteHalf<S>>,
    read_half: Mutex<tokio::io::ReadHalf<S>>,
    closed: AtomicBool,
}

impl<S> SerialConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            write_half: Mutex::new(write_half),
            read_half: Mutex::new(read_half),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<S> TextConnection for SerialConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + Sync + 'static,
{
    async fn send(&self, text: String) -> anyhow::Result<()> {
        if self.is_closed() {
            anyhow::bail!("connection closed");
        }
        let bytes = text.into_bytes();
        let len: u32 = bytes
            .len()
            .try_into()
            .map_err(|_| anyhow::anyhow!("frame too large for length prefix"))?;

        let mut w = self.write_half.lock().await;
        w.write_all(&len.to_be_bytes()).await?;
        w.write_all(&bytes).await?;
        w.flush().await?;
        Ok(())
    }

    /// Reads exactly one length-prefixed frame, buffering across reads of up
    /// to [`RECV_CHUNK_LEN`] bytes at a time until the frame is complete.
    async fn recv(&self) -> anyhow::Result<String> {
        let mut r = self.read_half.lock().await;

        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf)
            .await
            .map_err(|e| anyhow::anyhow!("connection closed: {e}"))?;
        let len = u32::from_be_bytes(len_buf) as usize;

        let mut payload = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let take = (len - filled).min(RECV_CHUNK_LEN);
            let n = r.read(&mut payload[filled..filled + take]).await?;
            if n == 0 {
                self.closed.store(true, Ordering::SeqCst);
                anyhow::bail!("connection closed mid-frame");
            }
            filled += n;
        }

        String::from_utf8(payload).map_err(|e| anyhow::anyhow!("non-utf8 frame: {e}"))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
