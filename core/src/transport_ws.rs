//! Primary transport (component H): WebSocket-over-TLS, fingerprint-pinned,
//! with capped exponential backoff + jitter reconnection and close-code
//! policy (spec §4.H, §6). The connection state machine and the reconnect
//! loop are adapted from the teacher's `sync.rs::Backoff`/`connect_loop`
//! shape; the close-code vocabulary follows RFC 6455 (1000 normal, 1008
//! policy violation, anything else a transient fault worth retrying).
//!
//! The handshake itself (4.G) runs over [`TextConnection`] immediately after
//! the TLS+WebSocket connection opens, so this module never touches session
//! key material beyond storing the result.

use crate::config::Config;
use crate::crypto::SESSION_KEY_LEN;
use crate::error::ClipError;
use crate::pinning::PinningVerifier;
use crate::session;
use crate::transport::{ConnectionState, OutboundTransport, TextConnection};
use crate::trust::TrustStore;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rsa::{RsaPrivateKey, RsaPublicKey};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

fn ensure_crypto_provider() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// The device's TLS leaf identity: a self-signed certificate whose
/// fingerprint is exactly what gets baked into the QR payload at pairing
/// time. Independent of the long-term RSA identity key used for session-key
/// wrapping (spec §9 — two unrelated keys for two unrelated jobs).
pub struct TlsIdentity {
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
    pub fingerprint: String,
}

impl TlsIdentity {
    pub fn generate_self_signed() -> anyhow::Result<Self> {
        let certified = rcgen::generate_simple_self_signed(vec!["clipbridge-device".to_string()])?;
        let cert_der = certified.cert.der().to_vec();
        let key_der = certified.key_pair.serialize_der();
        let fingerprint = PinningVerifier::fingerprint_of(&cert_der);
        Ok(Self { cert_der, key_der, fingerprint })
    }
}

/// Either half of a TLS connection, so [`WsConnection`] can be one
/// non-generic type regardless of which side opened it.
enum WsStream {
    Client(tokio_rustls::client::TlsStream<TcpStream>),
    Server(tokio_rustls::server::TlsStream<TcpStream>),
}

impl AsyncRead for WsStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WsStream::Client(s) => Pin::new(s).poll_read(cx, buf),
            WsStream::Server(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WsStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            WsStream::Client(s) => Pin::new(s).poll_write(cx, buf),
            WsStream::Server(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WsStream::Client(s) => Pin::new(s).poll_flush(cx),
            WsStream::Server(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WsStream::Client(s) => Pin::new(s).poll_shutdown(cx),
            WsStream::Server(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// A live WebSocket+TLS connection. Implements [`TextConnection`] for the
/// handshake and ordinary frame traffic; separately exposes the close code
/// observed on the wire, since the reconnect policy (spec §4.H) branches on
/// it and that is not part of the generic transport vocabulary.
pub struct WsConnection {
    write: tokio::sync::Mutex<SplitSink<WebSocketStream<WsStream>, WsMessage>>,
    read: tokio::sync::Mutex<SplitStream<WebSocketStream<WsStream>>>,
    closed: AtomicBool,
    last_close_code: AtomicU16,
}

const NO_CLOSE_CODE: u16 = 0;

impl WsConnection {
    fn new(ws: WebSocketStream<WsStream>) -> Self {
        let (write, read) = ws.split();
        Self {
            write: tokio::sync::Mutex::new(write),
            read: tokio::sync::Mutex::new(read),
            closed: AtomicBool::new(false),
            last_close_code: AtomicU16::new(NO_CLOSE_CODE),
        }
    }

    pub fn last_close_code(&self) -> Option<u16> {
        match self.last_close_code.load(Ordering::SeqCst) {
            NO_CLOSE_CODE => None,
            code => Some(code),
        }
    }
}

#[async_trait]
impl TextConnection for WsConnection {
    async fn send(&self, text: String) -> anyhow::Result<()> {
        if self.is_closed() {
            anyhow::bail!("connection closed");
        }
        let mut write = self.write.lock().await;
        write.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    /// Reads past Ping/Pong/Binary frames; returns the next Text frame, or
    /// an error once a Close frame or stream error is observed (the close
    /// code, if any, is recorded for the reconnect loop to consult).
    async fn recv(&self) -> anyhow::Result<String> {
        let mut read = self.read.lock().await;
        loop {
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(text.to_string()),
                Some(Ok(WsMessage::Close(frame))) => {
                    self.record_close(frame.as_ref());
                    anyhow::bail!("connection closed by peer");
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.closed.store(true, Ordering::SeqCst);
                    anyhow::bail!("websocket error: {e}");
                }
                None => {
                    self.closed.store(true, Ordering::SeqCst);
                    anyhow::bail!("connection closed");
                }
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl WsConnection {
    fn record_close(&self, frame: Option<&CloseFrame>) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(frame) = frame {
            self.last_close_code.store(u16::from(frame.code), Ordering::SeqCst);
        }
    }
}

/// Dials and TLS-upgrades to `host:port`, distinguishing a pinning rejection
/// (`ClipError::CertUntrusted` — spec §7: abort, no reconnect) from every
/// other failure along the way (`ClipError::TransientNet` — worth retrying).
async fn connect_tls_ws(host: &str, port: u16, trust: Arc<dyn TrustStore>) -> Result<WsConnection, ClipError> {
    ensure_crypto_provider();

    let tcp = TcpStream::connect((host, port)).await.map_err(|e| ClipError::TransientNet(e.to_string()))?;
    let verifier = Arc::new(PinningVerifier::new(trust));
    let tls_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));

    let server_name = match host.parse::<IpAddr>() {
        Ok(ip) => ServerName::IpAddress(ip.into()),
        Err(_) => ServerName::try_from(host.to_string()).map_err(|e| ClipError::TransientNet(e.to_string()))?,
    };

    let tls_stream = connector.connect(server_name, tcp).await.map_err(|e| classify_tls_error(&e))?;
    let url = format!("wss://{host}:{port}/");
    let (ws, _response) = tokio_tungstenite::client_async(url, WsStream::Client(tls_stream))
        .await
        .map_err(|e| ClipError::TransientNet(e.to_string()))?;
    Ok(WsConnection::new(ws))
}

/// `PinningVerifier` reports rejection as `rustls::Error::General("CERT_UNTRUSTED: ...")`
/// (the only verifier error this codebase's TLS config can produce); anything
/// else reaching here is a transport-level fault, not a trust decision.
fn classify_tls_error(err: &io::Error) -> ClipError {
    let text = err.to_string();
    if text.contains("CERT_UNTRUSTED") {
        ClipError::CertUntrusted(text)
    } else {
        ClipError::TransientNet(text)
    }
}

/// Accept a single inbound connection: TLS handshake with the device's own
/// self-signed identity, then the WebSocket upgrade. One call per peer; the
/// caller loops over `listener.accept()` for a long-running server.
pub async fn accept_tls_ws(tcp: TcpStream, identity: &TlsIdentity) -> anyhow::Result<WsConnection> {
    ensure_crypto_provider();

    let cert = CertificateDer::from(identity.cert_der.clone());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.key_der.clone()));
    let tls_config = rustls::ServerConfig::builder().with_no_client_auth().with_single_cert(vec![cert], key)?;
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(tls_config));

    let tls_stream = acceptor.accept(tcp).await?;
    let ws = tokio_tungstenite::accept_async(WsStream::Server(tls_stream)).await?;
    Ok(WsConnection::new(ws))
}

/// Capped exponential backoff with jitter: `d(n) = min(base*2^(n-1), max) +
/// jitter(0, 1000ms)` (spec §4.H). Resets on every successful handshake.
#[derive(Debug, Clone)]
struct Backoff {
    base_ms: u64,
    max_ms: u64,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    fn new(config: &Config) -> Self {
        Self {
            base_ms: config.reconnect_base_ms,
            max_ms: config.reconnect_max_ms,
            max_attempts: config.reconnect_max_attempts,
            attempt: 0,
        }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let shift = (self.attempt - 1).min(63);
        let exp = self.base_ms.saturating_mul(1u64 << shift);
        let capped = exp.min(self.max_ms);
        let jitter: u64 = rand::random::<u64>() % 1001;
        Duration::from_millis(capped + jitter)
    }
}

/// What to do once the current connection has dropped, based on the close
/// code observed (spec §4.H, §6): normal close never reconnects; a policy
/// violation never reconnects either, and additionally discards the session
/// key; anything else is a transient fault worth retrying, also discarding
/// the key since a fresh handshake is required on the new connection.
enum CloseAction {
    Stop,
    ReconnectAndClearKey,
}

fn classify_close(code: Option<u16>) -> CloseAction {
    match code {
        Some(1000) => CloseAction::Stop,
        Some(1008) => CloseAction::Stop,
        _ => CloseAction::ReconnectAndClearKey,
    }
}

/// The primary transport: owns the [`ConnectionState`] machine, the session
/// key for as long as the current connection lives, and the reconnect loop.
/// `incoming` carries every frame received after the handshake completes
/// (control frames and encrypted envelopes alike — classification is the
/// sync engine's job, component J).
pub struct PrimaryTransport {
    config: Config,
    state_tx: watch::Sender<ConnectionState>,
    session_key: Mutex<Option<[u8; SESSION_KEY_LEN]>>,
    conn: Mutex<Option<Arc<WsConnection>>>,
    stop: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
}

impl PrimaryTransport {
    pub fn new(config: Config) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            config,
            state_tx,
            session_key: Mutex::new(None),
            conn: Mutex::new(None),
            stop: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
        })
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn session_key(&self) -> Option<[u8; SESSION_KEY_LEN]> {
        *self.session_key.lock().unwrap()
    }

    pub async fn send(&self, text: String) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap().clone();
        match conn {
            Some(conn) => conn.send(text).await,
            None => anyhow::bail!("not connected"),
        }
    }

    /// Stop reconnecting and close the current connection, if any — the
    /// caller is giving up on this peer (spec §5: cancellation is always
    /// explicit, never silent).
    pub async fn disconnect(&self) {
        let _ = self.state_tx.send(ConnectionState::Disconnecting);
        self.stop.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        if let Some(conn) = self.conn.lock().unwrap().take() {
            conn.close();
        }
        *self.session_key.lock().unwrap() = None;
        let _ = self.state_tx.send(ConnectionState::Disconnected);
    }

    /// Dial `host:port`, handshake, and stay connected — reconnecting with
    /// backoff on transient loss — until `disconnect()` is called or the
    /// close-code policy says to stop. Every received frame after the
    /// handshake is forwarded on the returned channel.
    pub fn connect_client(
        self: &Arc<Self>,
        host: String,
        port: u16,
        peer_public_key: Arc<RsaPublicKey>,
        trust: Arc<dyn TrustStore>,
    ) -> mpsc::Receiver<String> {
        let (incoming_tx, incoming_rx) = mpsc::channel(64);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_client_loop(host, port, peer_public_key, trust, incoming_tx).await;
        });
        incoming_rx
    }

    async fn run_client_loop(
        self: Arc<Self>,
        host: String,
        port: u16,
        peer_public_key: Arc<RsaPublicKey>,
        trust: Arc<dyn TrustStore>,
        incoming_tx: mpsc::Sender<String>,
    ) {
        let mut backoff = Backoff::new(&self.config);

        'reconnect: loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let _ = self.state_tx.send(ConnectionState::Connecting);

            let connected = connect_tls_ws(&host, port, Arc::clone(&trust)).await;
            let conn = match connected {
                Ok(conn) => Arc::new(conn),
                // CERT_UNTRUSTED is a trust decision, not a transient fault
                // (spec §7): abort outright, never retry the same peer.
                Err(ClipError::CertUntrusted(_)) => {
                    let _ = self.state_tx.send(ConnectionState::Disconnected);
                    break 'reconnect;
                }
                Err(_) => {
                    if !self.wait_for_retry(&mut backoff).await {
                        break 'reconnect;
                    }
                    continue 'reconnect;
                }
            };

            match session::run_client_handshake(&*conn as &dyn TextConnection, &peer_public_key).await {
                Ok(key) => {
                    backoff.reset();
                    *self.session_key.lock().unwrap() = Some(key);
                    *self.conn.lock().unwrap() = Some(Arc::clone(&conn));
                    let _ = self.state_tx.send(ConnectionState::Connected);
                }
                // WRAP_FAIL / UNWRAP_FAIL / HANDSHAKE_REJECTED: close with
                // policy-violation semantics, no reconnect (spec §7) — these
                // are compatibility/trust failures, not transient faults.
                Err(ClipError::WrapFail(_)) | Err(ClipError::UnwrapFail(_)) | Err(ClipError::HandshakeRejected(_)) => {
                    conn.close();
                    let _ = self.state_tx.send(ConnectionState::Disconnected);
                    break 'reconnect;
                }
                Err(_) => {
                    conn.close();
                    if !self.wait_for_retry(&mut backoff).await {
                        break 'reconnect;
                    }
                    continue 'reconnect;
                }
            }

            loop {
                match conn.recv().await {
                    Ok(text) => {
                        if incoming_tx.send(text).await.is_err() {
                            self.disconnect().await;
                            return;
                        }
                    }
                    Err(_) => break,
                }
            }

            let code = conn.last_close_code();
            *self.conn.lock().unwrap() = None;
            *self.session_key.lock().unwrap() = None;
            let _ = self.state_tx.send(ConnectionState::Disconnected);

            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            match classify_close(code) {
                CloseAction::Stop => break,
                CloseAction::ReconnectAndClearKey => {
                    if !self.wait_for_retry(&mut backoff).await {
                        break;
                    }
                }
            }
        }
    }

    /// Sleep for the next backoff delay, interruptibly — `disconnect()`
    /// wakes this early. Returns `false` once the attempt budget is spent.
    async fn wait_for_retry(&self, backoff: &mut Backoff) -> bool {
        if backoff.exhausted() {
            let _ = self.state_tx.send(ConnectionState::Disconnected);
            return false;
        }
        let delay = backoff.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.stop_notify.notified() => {}
        }
        !self.stop.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutboundTransport for PrimaryTransport {
    fn current_state(&self) -> ConnectionState {
        PrimaryTransport::current_state(self)
    }

    fn session_key(&self) -> Option<[u8; SESSION_KEY_LEN]> {
        PrimaryTransport::session_key(self)
    }

    async fn send(&self, text: String) -> anyhow::Result<()> {
        PrimaryTransport::send(self, text).await
    }
}

/// Accept exactly one peer on `listener`, run the server side of the
/// handshake, and return the live connection plus the agreed session key.
/// A long-running listener loop just calls this in a cycle, handing each
/// connection off to the sync engine (component J).
pub async fn serve_one(
    listener: &TcpListener,
    identity: &TlsIdentity,
    own_private_key: &RsaPrivateKey,
) -> Result<(Arc<WsConnection>, [u8; SESSION_KEY_LEN]), ClipError> {
    let (tcp, _peer_addr) = listener
        .accept()
        .await
        .map_err(|e| ClipError::TransientNet(e.to_string()))?;
    let conn = accept_tls_ws(tcp, identity)
        .await
        .map_err(|e| ClipError::TransientNet(e.to_string()))?;
    let conn = Arc::new(conn);
    let key = session::run_server_handshake(&*conn as &dyn TextConnection, own_private_key).await?;
    Ok((conn, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::DecodeRsaPrivateKey;
    use std::sync::Arc;

    fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let pem = include_str!("../testdata/test_rsa2048.pem");
        let sk = RsaPrivateKey::from_pkcs1_pem(pem).unwrap();
        let pk = RsaPublicKey::from(&sk);
        (sk, pk)
    }

    #[test]
    fn backoff_matches_spec_formula() {
        let config = Config { reconnect_base_ms: 2_000, reconnect_max_ms: 60_000, reconnect_max_attempts: 10, ..Config::default() };
        let mut b = Backoff::new(&config);
        let d1 = b.next_delay().as_millis() as u64;
        assert!((2_000..=3_000).contains(&d1));
        let d2 = b.next_delay().as_millis() as u64;
        assert!((4_000..=5_000).contains(&d2));
        let d3 = b.next_delay().as_millis() as u64;
        assert!((8_000..=9_000).contains(&d3));
    }

    #[test]
    fn backoff_saturates_at_max() {
        let config = Config { reconnect_base_ms: 2_000, reconnect_max_ms: 10_000, reconnect_max_attempts: 20, ..Config::default() };
        let mut b = Backoff::new(&config);
        for _ in 0..10 {
            b.next_delay();
        }
        let d = b.next_delay().as_millis() as u64;
        assert!(d >= 10_000 && d <= 11_000);
    }

    #[test]
    fn backoff_exhausts_after_max_attempts() {
        let config = Config { reconnect_max_attempts: 3, ..Config::default() };
        let mut b = Backoff::new(&config);
        assert!(!b.exhausted());
        b.next_delay();
        b.next_delay();
        b.next_delay();
        assert!(b.exhausted());
        b.reset();
        assert!(!b.exhausted());
    }

    #[test]
    fn close_code_policy() {
        assert!(matches!(classify_close(Some(1000)), CloseAction::Stop));
        assert!(matches!(classify_close(Some(1008)), CloseAction::Stop));
        assert!(matches!(classify_close(Some(1006)), CloseAction::ReconnectAndClearKey));
        assert!(matches!(classify_close(None), CloseAction::ReconnectAndClearKey));
    }

    #[tokio::test]
    async fn end_to_end_loopback_handshake_and_frame() {
        use crate::trust::{now_ms, Device, MemoryTrustStore};
        use uuid::Uuid;

        let identity = TlsIdentity::generate_self_signed().unwrap();
        let (server_sk, server_pk) = test_keypair();
        let _ = server_pk;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let trust: Arc<dyn TrustStore> = Arc::new(MemoryTrustStore::new());
        trust
            .insert(Device {
                id: Uuid::new_v4(),
                name: "Server".into(),
                public_key: "unused".into(),
                certificate_fingerprint: identity.fingerprint.clone(),
                last_seen: now_ms(),
                is_trusted: true,
                fallback_address: None,
            })
            .unwrap();

        let server_task = tokio::spawn(async move {
            let (conn, key) = serve_one(&listener, &identity, &server_sk).await.unwrap();
            conn.send("hello-from-server".to_string()).await.unwrap();
            key
        });

        let config = Config::default();
        let transport = PrimaryTransport::new(config);
        let (_client_sk, client_pk) = test_keypair();
        let mut incoming = transport.connect_client("127.0.0.1".to_string(), addr.port(), Arc::new(client_pk), trust);

        let server_key = server_task.await.unwrap();

        let mut state = transport.state();
        loop {
            if *state.borrow() == ConnectionState::Connected {
                break;
            }
            state.changed().await.unwrap();
        }
        assert_eq!(transport.session_key(), Some(server_key));

        let frame = incoming.recv().await.unwrap();
        assert_eq!(frame, "hello-from-server");

        transport.disconnect().await;
    }

    /// A peer whose certificate fingerprint was never pinned must never
    /// reach `Connected`, and the client must give up rather than retry
    /// forever against the same untrusted peer (spec §7: `CERT_UNTRUSTED`
    /// aborts, no reconnect).
    #[tokio::test]
    async fn untrusted_peer_never_connects_and_stops_without_reconnecting() {
        let identity = TlsIdentity::generate_self_signed().unwrap();
        let (_server_sk, _server_pk) = test_keypair();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Empty trust store: the server's self-signed fingerprint is pinned
        // nowhere, so the verifier must reject it.
        let trust: Arc<dyn TrustStore> = Arc::new(crate::trust::MemoryTrustStore::new());

        let server_task = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let _ = accept_tls_ws(tcp, &identity).await;
        });

        let config = Config { reconnect_base_ms: 50, reconnect_max_ms: 100, reconnect_max_attempts: 10, ..Config::default() };
        let transport = PrimaryTransport::new(config);
        let (_client_sk, client_pk) = test_keypair();
        let _incoming = transport.connect_client("127.0.0.1".to_string(), addr.port(), Arc::new(client_pk), trust);

        let mut state = transport.state();
        let outcome = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if *state.borrow() == ConnectionState::Connected {
                    return;
                }
                state.changed().await.unwrap();
            }
        })
        .await;
        assert!(outcome.is_err(), "an untrusted peer must never reach Connected");

        // Give the reconnect loop time to have looped repeatedly if it were
        // going to, then confirm it settled rather than still spinning.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(transport.current_state(), ConnectionState::Disconnected);

        let _ = server_task.await;
    }
}
