//! Pinning validator (component F): the `rustls` `ServerCertVerifier` that
//! replaces CA trust with a single check — does the leaf certificate's
//! SHA-256 fingerprint match a pin held by a trusted device? Hostname
//! verification is deliberately never performed (spec §9): clients connect
//! by IP, and SAN matching would add nothing the fingerprint pin doesn't
//! already guarantee.
//!
//! This runs synchronously inside the TLS handshake (§5) — it must never
//! suspend, so it calls [`TrustStore::list_trusted`] directly rather than
//! through an async path.

use crate::trust::TrustStore;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct PinningVerifier {
    trust: Arc<dyn TrustStore>,
}

impl fmt::Debug for PinningVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinningVerifier").finish()
    }
}

impl PinningVerifier {
    pub fn new(trust: Arc<dyn TrustStore>) -> Self {
        Self { trust }
    }

    /// `"SHA256:" + sha256_hex_upper(DER(cert))` — the same canonicalization
    /// used at pairing time, so a QR-pinned fingerprint compares equal to
    /// what the handshake computes here.
    pub fn fingerprint_of(der: &[u8]) -> String {
        let digest = Sha256::digest(der);
        format!("SHA256:{}", hex::encode_upper(digest))
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let fingerprint = Self::fingerprint_of(end_entity.as_ref());

        if self.trust.list_trusted().iter().any(|pin| pin == &fingerprint) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(format!("CERT_UNTRUSTED: {fingerprint}")))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
