use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clipbridge_cli::{
    default_rsa_key_path, default_tls_identity_path, default_trust_path, load_or_create_rsa_keypair,
    load_or_create_tls_identity, local_ipv4, parse_rsa_public_key_spki_b64, preview, rsa_public_key_spki_b64,
};
use clipbridge_core::{
    ClipboardContent, ClipboardStore, Config, FileTrustStore, MockClipboard, NoopNotifier, PairingManager,
    PrimaryTransport, QrPayload, SyncEngine, TrustStore,
};
use clipbridge_core::pairing::NoopAssociator;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "clipbridge", version, about = "Clipboard-sync pairing, serving, and sending over a pinned-cert LAN link")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,

    /// Directory holding the device's keys, trust store and clipboard history.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate (or reuse) this device's RSA identity and TLS leaf cert.
    Keygen,

    /// Print the QR payload a peer scans to pair with this device.
    Qr {
        #[arg(long, default_value = "this-device")]
        name: String,
        #[arg(long)]
        port: Option<u16>,
    },

    /// Consume a peer's QR payload: probe it, then trust it.
    Pair {
        /// The QR payload JSON, as printed by `clipbridge qr` on the peer.
        qr: String,
    },

    /// List paired devices.
    #[command(name = "trust:list")]
    TrustList,

    /// Remove a paired device by id.
    #[command(name = "trust:rm")]
    TrustRm {
        #[arg(long)]
        id: Uuid,
    },

    /// Accept one inbound connection and run the sync engine until it drops.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },

    /// Dial a paired device and run the sync engine until disconnected.
    Connect {
        #[arg(long)]
        host: String,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        device_id: Uuid,
    },
}

fn config_dir(cli: &Cli) -> PathBuf {
    cli.config_dir.clone().unwrap_or_else(clipbridge_cli::default_config_dir)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let dir = config_dir(&cli);
    std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

    match cli.cmd {
        Command::Keygen => cmd_keygen(&dir),
        Command::Qr { name, port } => cmd_qr(&dir, &name, port),
        Command::Pair { qr } => cmd_pair(&dir, &qr).await,
        Command::TrustList => cmd_trust_list(&dir),
        Command::TrustRm { id } => cmd_trust_rm(&dir, id),
        Command::Serve { port } => cmd_serve(&dir, port).await,
        Command::Connect { host, port, device_id } => cmd_connect(&dir, &host, port, device_id).await,
    }
}

fn rsa_path(dir: &PathBuf) -> PathBuf {
    dir.join(default_rsa_key_path().file_name().unwrap())
}
fn tls_path(dir: &PathBuf) -> PathBuf {
    dir.join(default_tls_identity_path().file_name().unwrap())
}
fn trust_path(dir: &PathBuf) -> PathBuf {
    dir.join(default_trust_path().file_name().unwrap())
}
fn history_path(dir: &PathBuf) -> PathBuf {
    dir.join("clipboard_items.json")
}

fn cmd_keygen(dir: &PathBuf) -> Result<()> {
    let key = load_or_create_rsa_keypair(&rsa_path(dir))?;
    let identity = load_or_create_tls_identity(&tls_path(dir))?;
    println!("RSA identity ready ({} bits)", key.size() * 8);
    println!("TLS fingerprint: {}", identity.fingerprint);
    Ok(())
}

fn cmd_qr(dir: &PathBuf, name: &str, port: Option<u16>) -> Result<()> {
    let key = load_or_create_rsa_keypair(&rsa_path(dir))?;
    let identity = load_or_create_tls_identity(&tls_path(dir))?;
    let pk = RsaPublicKey::from(&key);
    let port = port.unwrap_or_else(|| Config::default().default_port);
    let ip = local_ipv4().context("could not determine a local IPv4 address")?;

    let payload = QrPayload {
        n: name.to_string(),
        ip,
        p: port,
        k: rsa_public_key_spki_b64(&pk)?,
        fp: identity.fingerprint,
    };
    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}

async fn cmd_pair(dir: &PathBuf, qr: &str) -> Result<()> {
    let trust = Arc::new(FileTrustStore::new(trust_path(dir))?);
    let mgr = PairingManager::new(trust, Arc::new(NoopAssociator), Duration::from_secs(3));
    let device = mgr.pair(qr).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("paired with {} ({})", device.name, device.id);
    Ok(())
}

fn cmd_trust_list(dir: &PathBuf) -> Result<()> {
    let trust = FileTrustStore::new(trust_path(dir))?;
    for device in trust.list()? {
        println!(
            "{}  {:<20}  {}  trusted={}",
            device.id, device.name, device.certificate_fingerprint, device.is_trusted
        );
    }
    Ok(())
}

fn cmd_trust_rm(dir: &PathBuf, id: Uuid) -> Result<()> {
    let trust = FileTrustStore::new(trust_path(dir))?;
    if trust.delete(id)? {
        println!("removed {id}");
    } else {
        println!("no such device: {id}");
    }
    Ok(())
}

/// A local key distinct from any transport session key, sealing clipboard
/// content at rest (spec §9). Derived deterministically per config dir so a
/// restart can still open the same history file; a production build would
/// keep this behind OS keychain storage instead.
fn local_history_key(dir: &PathBuf) -> [u8; 32] {
    let marker = dir.join(".history_key_seed");
    if let Ok(existing) = std::fs::read(&marker) {
        if existing.len() == 32 {
            let mut key = [0u8; 32];
            key.copy_from_slice(&existing);
            return key;
        }
    }
    let key = clipbridge_core::crypto::fresh_session_key();
    let _ = std::fs::write(&marker, key);
    key
}

async fn cmd_serve(dir: &PathBuf, port: Option<u16>) -> Result<()> {
    let own_key = load_or_create_rsa_keypair(&rsa_path(dir))?;
    let identity = load_or_create_tls_identity(&tls_path(dir))?;
    let config = Config::default();
    let port = port.unwrap_or(config.default_port);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    println!("listening on 0.0.0.0:{port}, fingerprint {}", identity.fingerprint);
    tracing::info!(port, fingerprint = %identity.fingerprint, "listening for a primary-transport connection");

    let (conn, session_key) = clipbridge_core::transport_ws::serve_one(&listener, &identity, &own_key)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "handshake failed");
            anyhow::anyhow!("{e}")
        })?;
    println!("handshake complete");
    tracing::info!("session handshake complete, session key established");

    let transport: Arc<dyn clipbridge_core::OutboundTransport> =
        Arc::new(clipbridge_core::StaticKeyedTransport::new(conn.clone(), session_key));
    let store = Arc::new(ClipboardStore::open(history_path(dir), local_history_key(dir))?);
    let clipboard = Arc::new(MockClipboard::new());
    let engine = SyncEngine::new(clipboard.clone(), store.clone(), transport, Arc::new(NoopNotifier), Uuid::new_v4(), config);

    let (incoming_tx, incoming_rx) = tokio::sync::mpsc::channel(64);
    tokio::spawn(async move {
        loop {
            match conn.recv().await {
                Ok(text) => {
                    if incoming_tx.send(text).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    engine.start(incoming_rx)?;

    run_stdin_copy_loop(&clipboard, &store).await
}

async fn cmd_connect(dir: &PathBuf, host: &str, port: Option<u16>, device_id: Uuid) -> Result<()> {
    let trust = Arc::new(FileTrustStore::new(trust_path(dir))?);
    let device = trust
        .get_by_id(device_id)?
        .context("no such paired device — run `clipbridge pair` first")?;
    let peer_pk = parse_rsa_public_key_spki_b64(&device.public_key)?;

    let config = Config::default();
    let port = port.unwrap_or(config.default_port);
    let transport = PrimaryTransport::new(config.clone());
    let incoming = transport.connect_client(host.to_string(), port, Arc::new(peer_pk), trust);

    let store = Arc::new(ClipboardStore::open(history_path(dir), local_history_key(dir))?);
    let clipboard = Arc::new(MockClipboard::new());
    let engine = SyncEngine::new(clipboard.clone(), store.clone(), transport.clone(), Arc::new(NoopNotifier), Uuid::new_v4(), config);
    engine.start(incoming)?;

    println!("connecting to {host}:{port} (fingerprint pinned to {})...", device.certificate_fingerprint);
    tracing::info!(host, port, fingerprint = %device.certificate_fingerprint, "connecting to paired device");

    let mut state = transport.state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            tracing::info!(state = ?*state.borrow(), "connection state changed");
        }
    });

    run_stdin_copy_loop(&clipboard, &store).await
}

/// Demo loop: each typed line becomes an outbound clipboard copy; items
/// arriving from the peer print as they land in the store. Good enough to
/// drive the sync engine from a terminal without a real OS clipboard hook.
async fn run_stdin_copy_loop(clipboard: &Arc<MockClipboard>, store: &Arc<ClipboardStore>) -> Result<()> {
    let watcher = {
        let mut items = store.items_flow();
        tokio::spawn(async move {
            loop {
                if items.changed().await.is_err() {
                    break;
                }
                if let Some(newest) = items.borrow().first() {
                    println!("[received] {}", preview(&newest.content, 120));
                }
            }
        })
    };

    println!("type clipboard text and press enter; Ctrl-D to quit");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        clipboard.simulate_copy(ClipboardContent::Text(line));
        io::stdout().flush().ok();
    }

    watcher.abort();
    Ok(())
}
