//! Pairing manager (component E): decode the QR payload, probe reachability,
//! and seed the trust store. This module never touches the transport
//! directly — "trigger the transport to connect" (spec step 5) is the
//! caller's job once it holds the freshly-persisted [`Device`]; keeping
//! pairing decoupled from a live connection mirrors the teacher's own
//! separation between `pairing.rs` and `transport.rs`.

use crate::error::ClipError;
use crate::trust::{now_ms, Device, TrustStore};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use uuid::Uuid;

/// The QR payload, wire-exact field names (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QrPayload {
    pub n: String,
    pub ip: String,
    pub p: u16,
    pub k: String,
    pub fp: String,
}

impl QrPayload {
    pub fn decode(qr_text: &str) -> Result<Self, ClipError> {
        serde_json::from_str(qr_text).map_err(|e| ClipError::QrMalformed(e.to_string()))
    }
}

/// Host-OS "companion device" association. Informational only — not a
/// security boundary, the trust anchor is already pinned by the time this
/// runs — so a failure here must never invalidate the trust already
/// persisted.
pub trait Associator: Send + Sync {
    fn associate(&self, device: &Device) -> anyhow::Result<()>;
}

/// Default associator for platforms with no such hook.
pub struct NoopAssociator;

impl Associator for NoopAssociator {
    fn associate(&self, _device: &Device) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct PairingManager<S: TrustStore> {
    trust: Arc<S>,
    associator: Arc<dyn Associator>,
    reachability_timeout: Duration,
}

impl<S: TrustStore> PairingManager<S> {
    pub fn new(trust: Arc<S>, associator: Arc<dyn Associator>, reachability_timeout: Duration) -> Self {
        Self {
            trust,
            associator,
            reachability_timeout,
        }
    }

    /// Run the full pairing contract. On success, exactly one `Device` row
    /// has been committed to the trust store; on any failure, nothing is
    /// persisted (step ordering: probe before persist).
    pub async fn pair(&self, qr_text: &str) -> Result<Device, ClipError> {
        let payload = QrPayload::decode(qr_text)?;

        self.probe_reachable(&payload.ip, payload.p).await?;

        let device = Device {
            id: Uuid::new_v4(),
            name: payload.n,
            public_key: payload.k,
            certificate_fingerprint: payload.fp,
            last_seen: now_ms(),
            is_trusted: true,
            fallback_address: None,
        };

        self.trust
            .insert(device.clone())
            .map_err(|e| ClipError::QrMalformed(format!("trust store insert failed: {e}")))?;

        // Best-effort; a failure here does not unwind the committed Device.
        let _ = self.associator.associate(&device);

        Ok(device)
    }

    async fn probe_reachable(&self, ip: &str, port: u16) -> Result<(), ClipError> {
        let addr: SocketAddr = format!("{ip}:{port}")
            .parse()
            .map_err(|_| ClipError::Unreachable(format!("{ip}:{port}")))?;

        match timeout(self.reachability_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(())
            }
            _ => Err(ClipError::Unreachable(format!("{ip}:{port}"))),
        }
    }
}
