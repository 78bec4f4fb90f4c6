//! Helpers shared by the `clipbridge` and `clipbridge-e2e` binaries: on-disk
//! key/identity material and the small bits of host discovery a pairing QR
//! needs. Everything that is actually protocol logic — pairing, transport,
//! the sync engine — lives in `clipbridge_core`; this crate only wires it to
//! a terminal and a home directory.

pub mod bench;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clipbridge_core::TlsIdentity;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};

pub const RSA_KEY_BITS: usize = 2048;

pub fn home_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home);
    }
    PathBuf::from(".")
}

pub fn default_config_dir() -> PathBuf {
    home_dir().join(".clipbridge")
}

pub fn default_rsa_key_path() -> PathBuf {
    default_config_dir().join("identity_rsa.pem")
}

pub fn default_tls_identity_path() -> PathBuf {
    default_config_dir().join("tls_identity.json")
}

pub fn default_trust_path() -> PathBuf {
    default_config_dir().join("trust.json")
}

/// Load the device's long-term RSA keypair (spec §4.A/§4.G), generating and
/// persisting a fresh 2048-bit key on first use.
pub fn load_or_create_rsa_keypair(path: &Path) -> Result<RsaPrivateKey> {
    if path.exists() {
        let pem = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        RsaPrivateKey::from_pkcs1_pem(&pem).context("parse PKCS#1 RSA private key")
    } else {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).context("generate RSA keypair")?;
        let pem = key.to_pkcs1_pem(rsa::pkcs1::LineEnding::LF).context("encode RSA private key")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, pem.as_bytes()).with_context(|| format!("write {}", path.display()))?;
        Ok(key)
    }
}

/// Base64 of the X.509 SubjectPublicKeyInfo DER encoding — the wire form
/// `Device.public_key`/`QrPayload.k` use (spec §3, §6).
pub fn rsa_public_key_spki_b64(pk: &RsaPublicKey) -> Result<String> {
    let der = pk.to_public_key_der().context("encode RSA public key as SPKI")?;
    Ok(STANDARD.encode(der.as_bytes()))
}

pub fn parse_rsa_public_key_spki_b64(s: &str) -> Result<RsaPublicKey> {
    let der = STANDARD.decode(s).context("decode base64 SPKI")?;
    RsaPublicKey::from_public_key_der(&der).context("parse SPKI DER")
}

#[derive(Serialize, Deserialize)]
struct TlsIdentityFile {
    cert_der_b64: String,
    key_der_b64: String,
    fingerprint: String,
}

/// Load the device's self-signed TLS leaf identity (spec §9: independent of
/// the RSA identity key), generating one on first use. Its fingerprint is
/// exactly what gets baked into the QR payload at pairing time.
pub fn load_or_create_tls_identity(path: &Path) -> Result<TlsIdentity> {
    if path.exists() {
        let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let file: TlsIdentityFile = serde_json::from_str(&data)?;
        Ok(TlsIdentity {
            cert_der: STANDARD.decode(file.cert_der_b64).context("decode cert DER")?,
            key_der: STANDARD.decode(file.key_der_b64).context("decode key DER")?,
            fingerprint: file.fingerprint,
        })
    } else {
        let identity = TlsIdentity::generate_self_signed().context("generate self-signed TLS identity")?;
        let file = TlsIdentityFile {
            cert_der_b64: STANDARD.encode(&identity.cert_der),
            key_der_b64: STANDARD.encode(&identity.key_der),
            fingerprint: identity.fingerprint.clone(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&file)?)
            .with_context(|| format!("write {}", path.display()))?;
        Ok(identity)
    }
}

/// Best-effort local IPv4 address, for the convenience of printing a QR
/// payload's `ip` field. Uses the usual "connect a UDP socket, read back the
/// local address the kernel picked" trick — no packet is ever sent.
pub fn local_ipv4() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}

/// A short preview of a string for log/print output, never exceeding `n`
/// characters (measured in `char`s, not bytes, so it never splits a
/// multi-byte UTF-8 sequence).
pub fn preview(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_string();
    }
    let truncated: String = s.chars().take(n).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsa_keypair_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_rsa.pem");

        let key1 = load_or_create_rsa_keypair(&path).unwrap();
        let key2 = load_or_create_rsa_keypair(&path).unwrap();
        assert_eq!(key1, key2);
    }

    #[test]
    fn rsa_public_key_spki_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_rsa.pem");
        let key = load_or_create_rsa_keypair(&path).unwrap();
        let pk = RsaPublicKey::from(&key);

        let b64 = rsa_public_key_spki_b64(&pk).unwrap();
        let parsed = parse_rsa_public_key_spki_b64(&b64).unwrap();
        assert_eq!(pk, parsed);
    }

    #[test]
    fn tls_identity_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tls.json");

        let id1 = load_or_create_tls_identity(&path).unwrap();
        let id2 = load_or_create_tls_identity(&path).unwrap();
        assert_eq!(id1.cert_der, id2.cert_der);
        assert_eq!(id1.fingerprint, id2.fingerprint);
    }

    #[test]
    fn preview_truncates_long_strings_on_char_boundaries() {
        assert_eq!(preview("hello", 80), "hello");
        let long = "x".repeat(100);
        let p = preview(&long, 80);
        assert_eq!(p.chars().count(), 81);
        assert!(p.ends_with('…'));
    }

    #[test]
    fn preview_handles_multibyte_text_without_panicking() {
        let text = "🎉".repeat(50);
        let p = preview(&text, 10);
        assert_eq!(p.chars().count(), 11);
    }
}
