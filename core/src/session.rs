//! Session handshake (component G): the key-exchange protocol that runs
//! exactly once per transport connection, before any clipboard frame is
//! legal. Written against [`crate::transport::TextConnection`] so both the
//! primary and fallback transports share one implementation.

use crate::crypto;
use crate::error::ClipError;
use crate::protocol::{AckStatus, ControlFrame};
use crate::transport::TextConnection;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::{RsaPrivateKey, RsaPublicKey};

/// Client side: generate the session key, wrap it for the peer, send
/// `key_exchange`, and wait for the ack. On success the key is ready to use
/// as the session AEAD key; on any failure the caller must close with
/// policy-violation and must not schedule a reconnect — this is a
/// trust/compatibility failure, not a transient network fault.
pub async fn run_client_handshake(
    conn: &dyn TextConnection,
    peer_public_key: &RsaPublicKey,
) -> Result<[u8; crypto::SESSION_KEY_LEN], ClipError> {
    let key = crypto::fresh_session_key();
    let wrapped = crypto::wrap_session_key(peer_public_key, &key)?;

    let frame = ControlFrame::KeyExchange {
        encrypted_key: STANDARD.encode(&wrapped),
    };
    let wire = crate::protocol::encode_control_frame(&frame).map_err(|e| ClipError::HandshakeRejected(e.to_string()))?;
    conn.send(wire)
        .await
        .map_err(|e| ClipError::SendFail(e.to_string()))?;

    let reply = conn.recv().await.map_err(|e| ClipError::TransientNet(e.to_string()))?;
    match crate::protocol::decode_control_frame(&reply) {
        Ok(Some(ControlFrame::KeyExchangeAck { status: AckStatus::Ok, .. })) => Ok(key),
        Ok(Some(ControlFrame::KeyExchangeAck { status: AckStatus::Error, message })) => {
            Err(ClipError::HandshakeRejected(message.unwrap_or_default()))
        }
        // Anything else — wrong control-frame type, an encrypted frame, or
        // unparseable input — is a frame arriving out of order during
        // Connecting. Policy violation, not a transient fault.
        _ => Err(ClipError::HandshakeRejected("out-of-order frame during handshake".into())),
    }
}

/// Server side: wait for `key_exchange`, unwrap with the local private key,
/// and ack. Returns the session key on success.
pub async fn run_server_handshake(
    conn: &dyn TextConnection,
    own_private_key: &RsaPrivateKey,
) -> Result<[u8; crypto::SESSION_KEY_LEN], ClipError> {
    let incoming = conn.recv().await.map_err(|e| ClipError::TransientNet(e.to_string()))?;
    let frame = match crate::protocol::decode_control_frame(&incoming) {
        Ok(Some(ControlFrame::KeyExchange { encrypted_key })) => encrypted_key,
        _ => {
            let _ = send_ack(conn, AckStatus::Error, Some("expected key_exchange".into())).await;
            return Err(ClipError::HandshakeRejected("out-of-order frame during handshake".into()));
        }
    };

    let wrapped = STANDARD.decode(&frame).map_err(|e| ClipError::UnwrapFail(e.to_string()))?;

    match crypto::unwrap_session_key(own_private_key, &wrapped) {
        Ok(key) => {
            send_ack(conn, AckStatus::Ok, None).await.map_err(|e| ClipError::SendFail(e.to_string()))?;
            Ok(key)
        }
        Err(e) => {
            let _ = send_ack(conn, AckStatus::Error, Some(e.to_string())).await;
            Err(e)
        }
    }
}

async fn send_ack(conn: &dyn TextConnection, status: AckStatus, message: Option<String>) -> anyhow::Result<()> {
    let frame = ControlFrame::KeyExchangeAck { status, message };
    let wire = crate::protocol::encode_control_frame(&frame)?;
    conn.send(wire).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory_connection_pair;
    use rsa::pkcs1::DecodeRsaPrivateKey;

    fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let pem = include_str!("../testdata/test_rsa2048.pem");
        let sk = RsaPrivateKey::from_pkcs1_pem(pem).unwrap();
        let pk = RsaPublicKey::from(&sk);
        (sk, pk)
    }

    #[tokio::test]
    async fn successful_handshake_both_sides_agree_on_key() {
        let (client_conn, server_conn) = memory_connection_pair();
        let (sk, pk) = test_keypair();

        let (client_result, server_result) = tokio::join!(
            run_client_handshake(&client_conn, &pk),
            run_server_handshake(&server_conn, &sk),
        );

        let client_key = client_result.unwrap();
        let server_key = server_result.unwrap();
        assert_eq!(client_key, server_key);
    }

    #[tokio::test]
    async fn out_of_order_frame_is_rejected_not_transient() {
        // A frame of the wrong type arrives in place of the ack the client
        // is waiting for — an illegal receive during Connecting.
        let (client_conn, server_conn) = memory_connection_pair();
        server_conn
            .send(r#"{"type":"connection_status","status":"up","timestamp":1}"#.to_string())
            .await
            .unwrap();

        let (_, pk) = test_keypair();
        let result = run_client_handshake(&client_conn, &pk).await;
        assert!(matches!(result, Err(ClipError::HandshakeRejected(_))));
    }

    #[tokio::test]
    async fn server_rejects_non_key_exchange_first_frame() {
        let (client_conn, server_conn) = memory_connection_pair();
        client_conn
            .send(r#"{"type":"connection_status","status":"up","timestamp":1}"#.to_string())
            .await
            .unwrap();

        let (sk, _) = test_keypair();
        let result = run_server_handshake(&server_conn, &sk).await;
        assert!(matches!(result, Err(ClipError::HandshakeRejected(_))));
    }

    #[tokio::test]
    async fn ack_error_propagates_as_handshake_rejected() {
        let (client_conn, server_conn) = memory_connection_pair();
        let (_, pk) = test_keypair();

        let client_task = tokio::spawn(async move { run_client_handshake(&client_conn, &pk).await });

        // Drain the key_exchange the client sent, then respond with error.
        let _ = server_conn.recv().await.unwrap();
        send_ack(&server_conn, AckStatus::Error, Some("nope".into())).await.unwrap();

        let result = client_task.await.unwrap();
        assert!(matches!(result, Err(ClipError::HandshakeRejected(msg)) if msg == "nope"));
    }
}
