//! Shared transport vocabulary: the `TextConnection` trait both the
//! primary (H) and fallback (I) transports implement, the `ConnectionState`
//! machine (spec §3/§5), and an in-memory connection pair for tests —
//! adapted from the teacher's `Frame`-oriented `Connection`/`MemoryConnection`
//! pattern to the textual wire this protocol actually uses (envelope
//! frames and JSON control frames are both strings, never raw binary).

use crate::crypto::SESSION_KEY_LEN;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// What the sync engine (4.J) needs from a transport to pick it for an
/// outbound send: is it currently usable, and what session key should seal
/// the frame? [`crate::transport_ws::PrimaryTransport`] implements this
/// directly (it owns the handshake); a one-off fallback connection is
/// wrapped in [`StaticKeyedTransport`] once its handshake has run.
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    fn current_state(&self) -> ConnectionState;
    fn session_key(&self) -> Option<[u8; SESSION_KEY_LEN]>;
    async fn send(&self, text: String) -> anyhow::Result<()>;
}

/// Adapts a plain [`TextConnection`] plus the session key from a completed
/// handshake into an [`OutboundTransport`] — the fallback transport (4.I)
/// has no reconnect loop of its own, so "connected" is simply "not closed".
pub struct StaticKeyedTransport {
    conn: Arc<dyn TextConnection>,
    key: [u8; SESSION_KEY_LEN],
}

impl StaticKeyedTransport {
    pub fn new(conn: Arc<dyn TextConnection>, key: [u8; SESSION_KEY_LEN]) -> Self {
        Self { conn, key }
    }
}

#[async_trait]
impl OutboundTransport for StaticKeyedTransport {
    fn current_state(&self) -> ConnectionState {
        if self.conn.is_closed() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Connected
        }
    }

    fn session_key(&self) -> Option<[u8; SESSION_KEY_LEN]> {
        Some(self.key)
    }

    async fn send(&self, text: String) -> anyhow::Result<()> {
        self.conn.send(text).await
    }
}

/// One textual message in, one textual message out — no further framing.
/// Both the WebSocket transport and the byte-stream fallback transport
/// implement this; the handshake (4.G) and sync engine (4.J) are written
/// against it generically.
#[async_trait]
pub trait TextConnection: Send + Sync {
    async fn send(&self, text: String) -> anyhow::Result<()>;
    async fn recv(&self) -> anyhow::Result<String>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

/// Create a pair of connected in-memory text connections, for exercising
/// the handshake and sync engine without a real socket.
pub fn memory_connection_pair() -> (MemoryConnection, MemoryConnection) {
    let (tx_a, rx_a) = mpsc::channel::<String>(64);
    let (tx_b, rx_b) = mpsc::channel::<String>(64);
    let a = MemoryConnection {
        tx: tx_a,
        rx: Arc::new(Mutex::new(rx_b)),
        closed: Arc::new(AtomicBool::new(false)),
    };
    let b = MemoryConnection {
        tx: tx_b,
        rx: Arc::new(Mutex::new(rx_a)),
        closed: Arc::new(AtomicBool::new(false)),
    };
    (a, b)
}

pub struct MemoryConnection {
    tx: mpsc::Sender<String>,
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl TextConnection for MemoryConnection {
    async fn send(&self, text: String) -> anyhow::Result<()> {
        if self.is_closed() {
            anyhow::bail!("connection closed");
        }
        self.tx.send(text).await.map_err(|_| anyhow::anyhow!("send failed"))?;
        Ok(())
    }

    async fn recv(&self) -> anyhow::Result<String> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or_else(|| anyhow::anyhow!("connection closed"))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
