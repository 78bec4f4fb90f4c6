//! AES-256-GCM sealing, RSA-OAEP-SHA256 session-key wrapping, and SHA-256
//! digests. This is the only place raw key material is touched directly.

use crate::error::ClipError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

pub const IV_LEN: usize = 12;
pub const SESSION_KEY_LEN: usize = 32;

/// AES-256-GCM seal. Returns `(iv, ciphertext_with_tag)`. A fresh
/// CSPRNG IV is drawn on every call — reusing an IV under the same key
/// breaks GCM's authentication guarantee, so this is the only way to
/// produce a ciphertext.
pub fn encrypt(key: &[u8; SESSION_KEY_LEN], plaintext: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("AES-256-GCM encryption of a bounded plaintext cannot fail");
    (iv.to_vec(), ciphertext)
}

/// AES-256-GCM open. Fails with `DecryptAuth` if the IV length is wrong or
/// the authentication tag does not verify.
pub fn decrypt(key: &[u8; SESSION_KEY_LEN], iv: &[u8], ciphertext_with_tag: &[u8]) -> Result<Vec<u8>, ClipError> {
    if iv.len() != IV_LEN {
        return Err(ClipError::DecryptAuth);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    cipher
        .decrypt(nonce, ciphertext_with_tag)
        .map_err(|_| ClipError::DecryptAuth)
}

/// RSA-OAEP-SHA256/MGF1-SHA256 key wrap of a session key under the peer's
/// long-term public key.
pub fn wrap_session_key(peer_public_key: &RsaPublicKey, key_bytes: &[u8; SESSION_KEY_LEN]) -> Result<Vec<u8>, ClipError> {
    let mut rng = rand::thread_rng();
    peer_public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), key_bytes)
        .map_err(|e| ClipError::WrapFail(e.to_string()))
}

/// Inverse of [`wrap_session_key`]. Fails with `UnwrapFail` on a padding
/// error or if the recovered plaintext is not exactly 32 bytes.
pub fn unwrap_session_key(own_private_key: &RsaPrivateKey, wrapped: &[u8]) -> Result<[u8; SESSION_KEY_LEN], ClipError> {
    let plain = own_private_key
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|e| ClipError::UnwrapFail(e.to_string()))?;
    plain
        .try_into()
        .map_err(|_| ClipError::UnwrapFail("unexpected session key length".into()))
}

/// 32 fresh CSPRNG bytes — the session key material before wrapping.
pub fn fresh_session_key() -> [u8; SESSION_KEY_LEN] {
    let mut key = [0u8; SESSION_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Uppercase hex SHA-256 digest, 64 characters.
pub fn sha256_hex_upper(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode_upper(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::DecodeRsaPrivateKey;

    fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        // Fixed 2048-bit key baked in for fast, deterministic tests; real
        // callers generate with `RsaPrivateKey::new`.
        let pem = include_str!("../testdata/test_rsa2048.pem");
        let sk = RsaPrivateKey::from_pkcs1_pem(pem).expect("valid test key");
        let pk = RsaPublicKey::from(&sk);
        (sk, pk)
    }

    #[test]
    fn round_trip_any_text() {
        let key = fresh_session_key();
        for text in ["", "hello", "a longer string with spaces and 🎉 emoji"] {
            let (iv, ct) = encrypt(&key, text.as_bytes());
            let pt = decrypt(&key, &iv, &ct).unwrap();
            assert_eq!(pt, text.as_bytes());
        }
    }

    #[test]
    fn iv_is_fresh_per_call() {
        let key = fresh_session_key();
        let (iv1, _) = encrypt(&key, b"same plaintext");
        let (iv2, _) = encrypt(&key, b"same plaintext");
        assert_ne!(iv1, iv2);
        assert_eq!(iv1.len(), IV_LEN);
    }

    #[test]
    fn flipped_ciphertext_bit_fails_auth() {
        let key = fresh_session_key();
        let (iv, mut ct) = encrypt(&key, b"tamper me");
        ct[0] ^= 0x01;
        assert!(matches!(decrypt(&key, &iv, &ct), Err(ClipError::DecryptAuth)));
    }

    #[test]
    fn flipped_iv_bit_fails_auth() {
        let key = fresh_session_key();
        let (mut iv, ct) = encrypt(&key, b"tamper me");
        iv[0] ^= 0x01;
        assert!(matches!(decrypt(&key, &iv, &ct), Err(ClipError::DecryptAuth)));
    }

    #[test]
    fn wrong_iv_length_fails_closed() {
        let key = fresh_session_key();
        let (_, ct) = encrypt(&key, b"x");
        assert!(matches!(decrypt(&key, &[0u8; 4], &ct), Err(ClipError::DecryptAuth)));
    }

    #[test]
    fn sha256_hex_upper_is_64_uppercase_chars() {
        let digest = sha256_hex_upper(b"hello");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        // stable across calls
        assert_eq!(digest, sha256_hex_upper(b"hello"));
    }

    #[test]
    fn rsa_wrap_unwrap_round_trip() {
        let (sk, pk) = test_keypair();
        let key = fresh_session_key();
        let wrapped = wrap_session_key(&pk, &key).unwrap();
        let unwrapped = unwrap_session_key(&sk, &wrapped).unwrap();
        assert_eq!(key, unwrapped);
    }

    #[test]
    fn rsa_unwrap_rejects_garbage() {
        let (sk, _) = test_keypair();
        assert!(unwrap_session_key(&sk, b"not a valid ciphertext at all").is_err());
    }
}
