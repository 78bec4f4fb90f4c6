//! CI-oriented end-to-end harness for clipbridge.
//!
//! Runs entirely on one machine (a GitHub Actions runner, a laptop): no BLE,
//! no OS clipboard hook, no UI. `handshake` proves a real TLS+WebSocket
//! connection, fingerprint pin, and RSA-OAEP session-key exchange complete
//! end to end; `bench-latency` drives the same stack in a tight loopback
//! echo loop and reports round-trip percentiles via the shared `bench`
//! module.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clipbridge_cli::bench;
use clipbridge_core::transport_ws::{serve_one, TlsIdentity};
use clipbridge_core::{Config, ConnectionState, Device, MemoryTrustStore, PrimaryTransport, TrustStore};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "clipbridge-e2e", version, about = "clipbridge end-to-end CI harness")]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Pair, handshake, and exchange one frame over a real loopback
    /// TLS+WebSocket connection. Exits non-zero on any failure.
    Handshake,

    /// Round-trip N encrypted envelope frames over a loopback echo
    /// connection and report latency percentiles.
    BenchLatency {
        #[arg(long, default_value_t = 200)]
        iterations: usize,
        #[arg(long, default_value_t = 256)]
        payload_bytes: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();
    match args.cmd {
        Cmd::Handshake => run_handshake().await,
        Cmd::BenchLatency { iterations, payload_bytes } => run_bench_latency(iterations, payload_bytes).await,
    }
}

/// A fixed 2048-bit test key, not a secret — this harness never talks to
/// anything but itself over loopback.
fn harness_keypair() -> (RsaPrivateKey, RsaPublicKey) {
    let pem = include_str!("../../../core/testdata/test_rsa2048.pem");
    let sk = RsaPrivateKey::from_pkcs1_pem(pem).expect("bundled test key parses");
    let pk = RsaPublicKey::from(&sk);
    (sk, pk)
}

async fn run_handshake() -> Result<()> {
    let identity = TlsIdentity::generate_self_signed().context("generate self-signed TLS identity")?;
    let (server_key, client_pk) = harness_keypair();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let trust: Arc<dyn TrustStore> = Arc::new(MemoryTrustStore::new());
    trust.insert(Device {
        id: uuid::Uuid::new_v4(),
        name: "e2e-harness-server".into(),
        public_key: "unused".into(),
        certificate_fingerprint: identity.fingerprint.clone(),
        last_seen: clipbridge_core::trust::now_ms(),
        is_trusted: true,
        fallback_address: None,
    })?;

    let server = tokio::spawn(async move {
        let (conn, _key) = serve_one(&listener, &identity, &server_key).await?;
        conn.send("e2e-ping".to_string()).await?;
        anyhow::Ok(())
    });

    let transport = PrimaryTransport::new(Config::default());
    let mut incoming = transport.connect_client(addr.ip().to_string(), addr.port(), Arc::new(client_pk), trust);

    let mut state = transport.state();
    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);
    loop {
        if *state.borrow() == ConnectionState::Connected {
            break;
        }
        tokio::select! {
            r = state.changed() => { r?; }
            _ = &mut deadline => anyhow::bail!("handshake did not complete within 5s"),
        }
    }

    let frame = tokio::time::timeout(Duration::from_secs(5), incoming.recv())
        .await
        .context("timed out waiting for post-handshake frame")?
        .context("connection closed before sending a frame")?;
    anyhow::ensure!(frame == "e2e-ping", "unexpected frame: {frame}");

    server.await.context("server task panicked")??;
    transport.disconnect().await;
    println!("handshake ok, session established and one frame exchanged");
    Ok(())
}

async fn run_bench_latency(iterations: usize, payload_bytes: usize) -> Result<()> {
    let identity = TlsIdentity::generate_self_signed().context("generate self-signed TLS identity")?;
    let (server_key, client_pk) = harness_keypair();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let trust: Arc<dyn TrustStore> = Arc::new(MemoryTrustStore::new());
    trust.insert(Device {
        id: uuid::Uuid::new_v4(),
        name: "e2e-harness-server".into(),
        public_key: "unused".into(),
        certificate_fingerprint: identity.fingerprint.clone(),
        last_seen: clipbridge_core::trust::now_ms(),
        is_trusted: true,
        fallback_address: None,
    })?;

    // Server: echo every frame straight back, unread — the point is to
    // measure transport + framing overhead, not envelope crypto cost (that
    // is already covered by core::crypto's own unit tests).
    let echo_server = tokio::spawn(async move {
        let (conn, _key) = serve_one(&listener, &identity, &server_key).await?;
        for _ in 0..iterations {
            let text = conn.recv().await?;
            conn.send(text).await?;
        }
        anyhow::Ok(())
    });

    let transport = PrimaryTransport::new(Config::default());
    let mut incoming = transport.connect_client(addr.ip().to_string(), addr.port(), Arc::new(client_pk), trust);

    let mut state = transport.state();
    while *state.borrow() != ConnectionState::Connected {
        state.changed().await?;
    }

    let payload = "x".repeat(payload_bytes);
    let mut samples = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let start = Instant::now();
        transport.send(payload.clone()).await?;
        let echoed = tokio::time::timeout(Duration::from_secs(5), incoming.recv())
            .await
            .context("timed out waiting for echo")?
            .context("connection closed mid-benchmark")?;
        anyhow::ensure!(echoed == payload, "echo mismatch");
        samples.push(start.elapsed().as_secs_f64() * 1000.0);
    }

    echo_server.await.context("echo server task panicked")??;
    transport.disconnect().await;

    match bench::summarize(&samples) {
        Some(summary) => println!("{summary}"),
        None => println!("no samples collected"),
    }
    Ok(())
}
