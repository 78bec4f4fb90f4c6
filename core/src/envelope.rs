//! The textual wire envelope for encrypted clipboard frames:
//! `b64(iv) + "|" + b64(ciphertext_with_tag)`.
//!
//! Base64 uses the URL-unsafe standard alphabet. The sender always emits
//! padding; the parser accepts both padded and unpadded input on either
//! side of the `|`.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;

const SEPARATOR: char = '|';

/// Encode an `(iv, ciphertext_with_tag)` pair into the wire envelope.
pub fn encode_envelope(iv: &[u8], ciphertext_with_tag: &[u8]) -> String {
    format!("{}{}{}", STANDARD.encode(iv), SEPARATOR, STANDARD.encode(ciphertext_with_tag))
}

/// Parse a wire envelope back into `(iv, ciphertext_with_tag)`.
pub fn decode_envelope(frame: &str) -> Option<(Vec<u8>, Vec<u8>)> {
    let (iv_part, ct_part) = frame.split_once(SEPARATOR)?;
    let iv = decode_either_padding(iv_part)?;
    let ct = decode_either_padding(ct_part)?;
    Some((iv, ct))
}

fn decode_either_padding(s: &str) -> Option<Vec<u8>> {
    STANDARD.decode(s).or_else(|_| STANDARD_NO_PAD.decode(s)).ok()
}

/// True if `frame` looks like an encrypted envelope rather than a JSON
/// control frame: contains the separator and fails to parse as JSON. This
/// mirrors the receive-time classification rule — malformed input that
/// matches neither shape is the caller's concern to drop and log.
pub fn looks_like_envelope(frame: &str) -> bool {
    frame.contains(SEPARATOR) && serde_json::from_str::<serde_json::Value>(frame).is_err()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let iv = vec![1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let ct = vec![9u8, 9, 9, 9, 9];
        let wire = encode_envelope(&iv, &ct);
        let (iv2, ct2) = decode_envelope(&wire).unwrap();
        assert_eq!(iv, iv2);
        assert_eq!(ct, ct2);
    }

    #[test]
    fn accepts_unpadded_input() {
        let iv = vec![1u8; 12];
        let ct = vec![2u8; 5];
        let unpadded = format!(
            "{}|{}",
            base64::engine::general_purpose::STANDARD_NO_PAD.encode(&iv),
            base64::engine::general_purpose::STANDARD_NO_PAD.encode(&ct)
        );
        let (iv2, ct2) = decode_envelope(&unpadded).unwrap();
        assert_eq!(iv, iv2);
        assert_eq!(ct, ct2);
    }

    #[test]
    fn missing_separator_is_rejected() {
        assert!(decode_envelope("noseparatorhere").is_none());
    }

    #[test]
    fn classification_distinguishes_json_and_envelope() {
        assert!(looks_like_envelope("aGVsbG8=|d29ybGQ="));
        assert!(!looks_like_envelope(r#"{"type":"key_exchange","encrypted_key":"abc"}"#));
        assert!(!looks_like_envelope("garbage with no pipe"));
    }
}
