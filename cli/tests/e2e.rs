//! Scenario 1 (pairing and handshake): a QR payload describing a reachable
//! peer is decoded, the peer is probed, a trusted `Device` is persisted, and
//! a real TLS+WebSocket connection to that peer completes the RSA-OAEP
//! session-key handshake.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clipbridge_core::pairing::NoopAssociator;
use clipbridge_core::session;
use clipbridge_core::transport_ws::{accept_tls_ws, TlsIdentity};
use clipbridge_core::{Config, ConnectionState, MemoryTrustStore, PairingManager, PrimaryTransport, TextConnection, TrustStore};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

fn host_keypair() -> (RsaPrivateKey, RsaPublicKey) {
    let pem = include_str!("../../core/testdata/test_rsa2048.pem");
    let sk = RsaPrivateKey::from_pkcs1_pem(pem).unwrap();
    let pk = RsaPublicKey::from(&sk);
    (sk, pk)
}

#[tokio::test]
async fn pair_then_handshake_end_to_end() {
    let identity = TlsIdentity::generate_self_signed().unwrap();
    let (host_sk, host_pk) = host_keypair();
    let host_pk_b64 = STANDARD.encode(host_pk.to_public_key_der().unwrap().as_bytes());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // The host accepts connections in a loop: the pairing reachability
    // probe opens and immediately drops a bare TCP connection (no TLS), and
    // the real WebSocket client dials in right after — the host must not
    // mistake the first for the second.
    let host_fp = identity.fingerprint.clone();
    let fingerprint_for_server = host_fp.clone();
    let server = tokio::spawn(async move {
        loop {
            let (tcp, _peer) = listener.accept().await.unwrap();
            match accept_tls_ws(tcp, &identity).await {
                Ok(conn) => {
                    let conn = Arc::new(conn);
                    if let Ok(key) = session::run_server_handshake(&*conn as &dyn TextConnection, &host_sk).await {
                        return (conn, key, fingerprint_for_server);
                    }
                }
                Err(_) => continue,
            }
        }
    });

    let qr = serde_json::json!({
        "n": "TestHost",
        "ip": addr.ip().to_string(),
        "p": addr.port(),
        "k": host_pk_b64,
        "fp": host_fp,
    })
    .to_string();

    let trust = Arc::new(MemoryTrustStore::new());
    let mgr = PairingManager::new(trust.clone(), Arc::new(NoopAssociator), Duration::from_secs(3));
    let device = mgr.pair(&qr).await.expect("pairing should succeed against a reachable host");

    assert!(device.is_trusted);
    assert_eq!(device.certificate_fingerprint, host_fp);
    assert_eq!(trust.list_trusted(), vec![host_fp.clone()]);

    let peer_pk = Arc::new(RsaPublicKey::from_public_key_der(&STANDARD.decode(&device.public_key).unwrap()).unwrap());

    let transport = PrimaryTransport::new(Config::default());
    let mut incoming = transport.connect_client(addr.ip().to_string(), addr.port(), peer_pk, trust.clone());

    let mut state = transport.state();
    loop {
        if *state.borrow() == ConnectionState::Connected {
            break;
        }
        state.changed().await.unwrap();
    }

    let (conn, server_key, fingerprint) = server.await.unwrap();
    assert_eq!(transport.session_key(), Some(server_key));
    assert_eq!(fingerprint, host_fp);

    conn.send("post-handshake-frame".to_string()).await.unwrap();
    let frame = incoming.recv().await.unwrap();
    assert_eq!(frame, "post-handshake-frame");

    transport.disconnect().await;
}
